//! Streaming compression codecs.
//!
//! Each codec is identified by a stable tag byte recorded once in the
//! header; an archive uses exactly one codec for every block. Encoders are
//! created fresh per block so each block is an independent stream and can
//! be decompressed in isolation.

use std::io::{self, BufReader, Read, Write};

use crate::{ArchiveError, Result};

/// Codec selector. The discriminants are the on-disk tag bytes. Tag 3 is
/// reserved and never produced by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip = 0,
    Zstd = 1,
    Lz4 = 2,
    Snappy = 4,
    Brotli = 5,
    Xz = 6,
}

/// Compression speed levels, mapped per codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Fastest,
    Default,
    Better,
    Best,
}

impl Codec {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Codec::Gzip),
            1 => Ok(Codec::Zstd),
            2 => Ok(Codec::Lz4),
            3 => Err(ArchiveError::Config("codec tag 3 is reserved".into())),
            4 => Ok(Codec::Snappy),
            5 => Ok(Codec::Brotli),
            6 => Ok(Codec::Xz),
            other => Err(ArchiveError::Config(format!("unknown codec tag {}", other))),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
            Codec::Snappy => "snappy",
            Codec::Brotli => "brotli",
            Codec::Xz => "xz",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "gzip" => Ok(Codec::Gzip),
            "zstd" => Ok(Codec::Zstd),
            "lz4" => Ok(Codec::Lz4),
            "snappy" => Ok(Codec::Snappy),
            "brotli" => Ok(Codec::Brotli),
            "xz" => Ok(Codec::Xz),
            other => Err(ArchiveError::Config(format!("unknown codec '{}'", other))),
        }
    }

    /// Opens a fresh streaming encoder writing compressed bytes into `w`.
    /// The encoder borrows `w` so the caller keeps access to it (and to any
    /// byte counting it performs) after [`Encoder::finish`].
    pub fn encoder<'a, W: Write>(self, speed: Speed, w: &'a mut W) -> Result<Encoder<'a, W>> {
        Ok(match self {
            Codec::Gzip => {
                let level = match speed {
                    Speed::Fastest => flate2::Compression::fast(),
                    Speed::Default => flate2::Compression::new(6),
                    Speed::Better => flate2::Compression::new(8),
                    Speed::Best => flate2::Compression::best(),
                };
                Encoder::Gzip(flate2::write::GzEncoder::new(w, level))
            }
            Codec::Zstd => {
                let level = match speed {
                    Speed::Fastest => 1,
                    Speed::Default => 3,
                    Speed::Better => 9,
                    Speed::Best => 19,
                };
                Encoder::Zstd(zstd::stream::write::Encoder::new(w, level)?)
            }
            Codec::Lz4 => Encoder::Lz4(lz4_flex::frame::FrameEncoder::new(w)),
            Codec::Snappy => Encoder::Snappy(snap::write::FrameEncoder::new(w)),
            Codec::Brotli => {
                let quality = match speed {
                    Speed::Fastest => 1,
                    Speed::Default => 6,
                    Speed::Better => 9,
                    Speed::Best => 11,
                };
                Encoder::Brotli(brotli::CompressorWriter::new(w, 32 * 1024, quality, 22))
            }
            Codec::Xz => {
                let preset = match speed {
                    Speed::Fastest => 1,
                    Speed::Default => 6,
                    Speed::Better => 8,
                    Speed::Best => 9,
                };
                Encoder::Xz(xz2::write::XzEncoder::new(w, preset))
            }
        })
    }

    /// Opens a streaming decoder over the compressed bytes in `r`.
    pub fn decoder<R: Read>(self, r: R) -> Result<Decoder<R>> {
        Ok(match self {
            Codec::Gzip => Decoder::Gzip(flate2::read::GzDecoder::new(r)),
            Codec::Zstd => Decoder::Zstd(zstd::stream::read::Decoder::new(r)?),
            Codec::Lz4 => Decoder::Lz4(lz4_flex::frame::FrameDecoder::new(r)),
            Codec::Snappy => Decoder::Snappy(snap::read::FrameDecoder::new(r)),
            Codec::Brotli => Decoder::Brotli(brotli::Decompressor::new(r, 32 * 1024)),
            Codec::Xz => Decoder::Xz(xz2::read::XzDecoder::new(r)),
        })
    }
}

/// A streaming encoder for one block. Must be finished explicitly so the
/// codec trailer lands in the underlying writer.
pub enum Encoder<'a, W: Write> {
    Gzip(flate2::write::GzEncoder<&'a mut W>),
    Zstd(zstd::stream::write::Encoder<'static, &'a mut W>),
    Lz4(lz4_flex::frame::FrameEncoder<&'a mut W>),
    Snappy(snap::write::FrameEncoder<&'a mut W>),
    Brotli(brotli::CompressorWriter<&'a mut W>),
    Xz(xz2::write::XzEncoder<&'a mut W>),
    /// Non-compressing passthrough, used when `no_compress` is set.
    Store(&'a mut W),
}

/// Opens the non-compressing passthrough encoder.
pub fn store_encoder<W: Write>(w: &mut W) -> Encoder<'_, W> {
    Encoder::Store(w)
}

impl<W: Write> Encoder<'_, W> {
    /// Completes the stream, flushing every trailer byte into the
    /// underlying writer.
    pub fn finish(self) -> io::Result<()> {
        match self {
            Encoder::Gzip(enc) => enc.finish().map(drop),
            Encoder::Zstd(enc) => enc.finish().map(drop),
            Encoder::Lz4(enc) => enc
                .finish()
                .map(drop)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
            Encoder::Snappy(mut enc) => {
                enc.flush()?;
                enc.into_inner().map(drop).map_err(|e| e.into_error())
            }
            Encoder::Brotli(mut enc) => {
                // The final meta-block is emitted when the writer drops.
                enc.flush()?;
                drop(enc);
                Ok(())
            }
            Encoder::Xz(enc) => enc.finish().map(drop),
            Encoder::Store(w) => w.flush(),
        }
    }
}

impl<W: Write> Write for Encoder<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(enc) => enc.write(buf),
            Encoder::Zstd(enc) => enc.write(buf),
            Encoder::Lz4(enc) => enc.write(buf),
            Encoder::Snappy(enc) => enc.write(buf),
            Encoder::Brotli(enc) => enc.write(buf),
            Encoder::Xz(enc) => enc.write(buf),
            Encoder::Store(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(enc) => enc.flush(),
            Encoder::Zstd(enc) => enc.flush(),
            Encoder::Lz4(enc) => enc.flush(),
            Encoder::Snappy(enc) => enc.flush(),
            Encoder::Brotli(enc) => enc.flush(),
            Encoder::Xz(enc) => enc.flush(),
            Encoder::Store(w) => w.flush(),
        }
    }
}

/// A streaming decoder over one block.
pub enum Decoder<R: Read> {
    Gzip(flate2::read::GzDecoder<R>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
    Lz4(lz4_flex::frame::FrameDecoder<R>),
    Snappy(snap::read::FrameDecoder<R>),
    Brotli(brotli::Decompressor<R>),
    Xz(xz2::read::XzDecoder<R>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Gzip(dec) => dec.read(buf),
            Decoder::Zstd(dec) => dec.read(buf),
            Decoder::Lz4(dec) => dec.read(buf),
            Decoder::Snappy(dec) => dec.read(buf),
            Decoder::Brotli(dec) => dec.read(buf),
            Decoder::Xz(dec) => dec.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Codec; 6] = [
        Codec::Gzip,
        Codec::Zstd,
        Codec::Lz4,
        Codec::Snappy,
        Codec::Brotli,
        Codec::Xz,
    ];

    #[test]
    fn tags_round_trip() {
        for c in ALL {
            assert_eq!(Codec::from_tag(c.tag()).unwrap(), c);
            assert_eq!(Codec::from_name(c.name()).unwrap(), c);
        }
        assert!(Codec::from_tag(3).is_err());
        assert!(Codec::from_tag(7).is_err());
    }

    #[test]
    fn every_codec_round_trips_a_block() {
        let data: Vec<u8> = (0..100_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
        for c in ALL {
            let mut compressed = Vec::new();
            let mut enc = c.encoder(Speed::Fastest, &mut compressed).unwrap();
            enc.write_all(&data).unwrap();
            enc.finish().unwrap();
            assert!(!compressed.is_empty(), "{}", c.name());

            let mut dec = c.decoder(compressed.as_slice()).unwrap();
            let mut out = Vec::new();
            dec.read_to_end(&mut out).unwrap();
            assert_eq!(out, data, "{}", c.name());
        }
    }

    #[test]
    fn store_passes_bytes_through() {
        let mut out = Vec::new();
        let mut enc = store_encoder(&mut out);
        enc.write_all(b"uncompressed bytes").unwrap();
        enc.finish().unwrap();
        assert_eq!(out, b"uncompressed bytes");
    }

    #[test]
    fn speed_levels_produce_valid_streams() {
        let data = vec![42u8; 64 * 1024];
        for speed in [Speed::Fastest, Speed::Default, Speed::Better, Speed::Best] {
            let mut compressed = Vec::new();
            let mut enc = Codec::Zstd.encoder(speed, &mut compressed).unwrap();
            enc.write_all(&data).unwrap();
            enc.finish().unwrap();
            let mut dec = Codec::Zstd.decoder(compressed.as_slice()).unwrap();
            let mut out = Vec::new();
            dec.read_to_end(&mut out).unwrap();
            assert_eq!(out, data);
        }
    }
}
