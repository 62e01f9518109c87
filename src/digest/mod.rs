//! Pluggable checksum digests.
//!
//! Each digest is identified by a stable tag byte recorded in the header.
//! Finalized sums are truncated to the configured stored length; digests
//! shorter than that length are right-padded with zero bytes, so every
//! stored digest occupies exactly `digest_len` bytes on disk.

use sha2::{Digest as _, Sha256};

use crate::{ArchiveError, Result};

static CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// Digest selector. The discriminants are the on-disk tag bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digest {
    Crc32 = 0,
    Crc16 = 1,
    Xxh3 = 2,
    Sha256 = 3,
    Blake3 = 4,
}

impl Digest {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Digest::Crc32),
            1 => Ok(Digest::Crc16),
            2 => Ok(Digest::Xxh3),
            3 => Ok(Digest::Sha256),
            4 => Ok(Digest::Blake3),
            other => Err(ArchiveError::Config(format!("unknown digest tag {}", other))),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Digest::Crc32 => "crc32",
            Digest::Crc16 => "crc16",
            Digest::Xxh3 => "xxhash",
            Digest::Sha256 => "sha256",
            Digest::Blake3 => "blake3",
        }
    }

    /// Parses a user-facing name, as accepted on the command line.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "crc32" => Ok(Digest::Crc32),
            "crc16" => Ok(Digest::Crc16),
            "xxhash" | "xxh3" => Ok(Digest::Xxh3),
            "sha256" => Ok(Digest::Sha256),
            "blake3" => Ok(Digest::Blake3),
            other => Err(ArchiveError::Config(format!("unknown digest '{}'", other))),
        }
    }

    /// Creates a fresh incremental hasher for this digest.
    pub fn hasher(self) -> Hasher {
        match self {
            Digest::Crc32 => Hasher::Crc32(crc32fast::Hasher::new()),
            Digest::Crc16 => Hasher::Crc16(CRC16.digest()),
            Digest::Xxh3 => Hasher::Xxh3(xxhash_rust::xxh3::Xxh3::new()),
            Digest::Sha256 => Hasher::Sha256(Sha256::new()),
            Digest::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

/// An in-progress digest computation. Supports reset / update / finalize.
pub enum Hasher {
    Crc32(crc32fast::Hasher),
    Crc16(crc::Digest<'static, u16>),
    Xxh3(xxhash_rust::xxh3::Xxh3),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Crc32(h) => h.update(data),
            Hasher::Crc16(h) => h.update(data),
            Hasher::Xxh3(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn reset(&mut self) {
        *self = match self {
            Hasher::Crc32(_) => Hasher::Crc32(crc32fast::Hasher::new()),
            Hasher::Crc16(_) => Hasher::Crc16(CRC16.digest()),
            Hasher::Xxh3(_) => Hasher::Xxh3(xxhash_rust::xxh3::Xxh3::new()),
            Hasher::Sha256(_) => Hasher::Sha256(Sha256::new()),
            Hasher::Blake3(_) => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        };
    }

    /// Finalizes into exactly `len` bytes: truncated when the raw sum is
    /// longer, zero-padded when shorter.
    pub fn finalize(self, len: u8) -> Vec<u8> {
        let raw: Vec<u8> = match self {
            Hasher::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            Hasher::Crc16(h) => h.finalize().to_be_bytes().to_vec(),
            Hasher::Xxh3(h) => h.digest().to_be_bytes().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        };
        let mut out = raw;
        out.resize(len as usize, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Digest; 5] = [
        Digest::Crc32,
        Digest::Crc16,
        Digest::Xxh3,
        Digest::Sha256,
        Digest::Blake3,
    ];

    #[test]
    fn tags_round_trip() {
        for d in ALL {
            assert_eq!(Digest::from_tag(d.tag()).unwrap(), d);
            assert_eq!(Digest::from_name(d.name()).unwrap(), d);
        }
        assert!(Digest::from_tag(9).is_err());
    }

    #[test]
    fn incremental_matches_one_shot() {
        for d in ALL {
            let mut a = d.hasher();
            a.update(b"hello ");
            a.update(b"world");
            let mut b = d.hasher();
            b.update(b"hello world");
            assert_eq!(a.finalize(32), b.finalize(32), "{}", d.name());
        }
    }

    #[test]
    fn short_digests_zero_pad() {
        let mut h = Digest::Crc16.hasher();
        h.update(b"data");
        let sum = h.finalize(8);
        assert_eq!(sum.len(), 8);
        assert_eq!(&sum[2..], &[0u8; 6]);
    }

    #[test]
    fn long_digests_truncate() {
        let mut h = Digest::Sha256.hasher();
        h.update(b"data");
        let short = h.finalize(4);
        let mut h = Digest::Sha256.hasher();
        h.update(b"data");
        let full = h.finalize(32);
        assert_eq!(short, full[..4]);
    }

    #[test]
    fn reset_clears_state() {
        let mut h = Digest::Blake3.hasher();
        h.update(b"junk");
        h.reset();
        h.update(b"data");
        let mut fresh = Digest::Blake3.hasher();
        fresh.update(b"data");
        assert_eq!(h.finalize(32), fresh.finalize(32));
    }
}
