//! Little-endian binary framing helpers.
//!
//! Every integer in the archive is little-endian. Strings are
//! length-prefixed: a u16 byte count followed by UTF-8 bytes.

use std::io::{self, Read, Write};

use crate::{ArchiveError, Result};

/// Writes a length-prefixed string. Strings longer than 65535 bytes do not
/// fit the u16 prefix and are rejected.
pub fn write_lp_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(ArchiveError::Format(format!(
            "string too long: {} bytes",
            bytes.len()
        )));
    }
    w.write_all(&(bytes.len() as u16).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

/// Reads a length-prefixed string, validating UTF-8.
pub fn read_lp_string<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u16(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| ArchiveError::Format("invalid UTF-8 string".into()))
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

pub fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(i64::from_le_bytes(b))
}

/// A tiny writer adapter that counts bytes passed through. Used to measure
/// the on-disk size of each compressed block.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lp_string_round_trip() {
        let mut buf = Vec::new();
        write_lp_string(&mut buf, "dir1/файл.txt").unwrap();
        let mut cur = std::io::Cursor::new(buf);
        assert_eq!(read_lp_string(&mut cur).unwrap(), "dir1/файл.txt");
    }

    #[test]
    fn lp_string_rejects_invalid_utf8() {
        let mut buf = vec![2u8, 0, 0xff, 0xfe];
        let mut cur = std::io::Cursor::new(&mut buf);
        assert!(read_lp_string(&mut cur).is_err());
    }

    #[test]
    fn lp_string_rejects_oversize() {
        let huge = "x".repeat(70_000);
        let mut buf = Vec::new();
        assert!(write_lp_string(&mut buf, &huge).is_err());
    }

    #[test]
    fn counting_writer_counts() {
        let mut cw = CountingWriter::new(Vec::new());
        cw.write_all(b"hello").unwrap();
        cw.write_all(b" world").unwrap();
        assert_eq!(cw.count(), 11);
    }
}
