//! Multi-file archive backing.
//!
//! An archive may be split ("spanned") across several files of a fixed size
//! limit. [`SpanWriter`] produces the pieces and renames them into their
//! final `1-N.name` form on close; [`SpanReader`] reassembles a spanned set
//! (or a single plain file) into one seekable byte stream.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{ArchiveError, Result};

/// Buffered random-access reader over a possibly-spanned archive. Seeking
/// through the `BufReader` discards its buffer, so workers can hop between
/// block offsets freely.
pub type BinReader = BufReader<SpanReader>;

/// Opens the archive at `path`, resolving span pieces if the plain file
/// does not exist. Buffer size follows the block size: four blocks deep.
pub fn open_reader(path: &Path, buffer: usize) -> Result<BinReader> {
    let span = SpanReader::open(path)?;
    Ok(BufReader::with_capacity(buffer, span))
}

/// Read half of the span machinery: presents one or more files as a single
/// contiguous, seekable stream.
pub struct SpanReader {
    files: Vec<File>,
    sizes: Vec<u64>,
    size: u64,
    pos: u64,
}

/// Locates the files backing `base`: the file itself, or numbered span
/// pieces `1-N.name` .. `N-N.name` living next to it.
fn find_span_files(base: &Path) -> Result<Vec<PathBuf>> {
    if base.is_file() {
        return Ok(vec![base.to_path_buf()]);
    }
    let dir = base.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or_else(|| Path::new("."));
    let name = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::Format("invalid archive name".into()))?;

    // 1-N.name style: the first piece tells us the total.
    for entry in fs::read_dir(dir).map_err(|e| ArchiveError::io(e, dir))? {
        let entry = entry.map_err(|e| ArchiveError::io(e, dir))?;
        let fname = entry.file_name();
        let Some(fname) = fname.to_str() else { continue };
        let Some(rest) = fname.strip_prefix("1-") else { continue };
        let Some(total_str) = rest.strip_suffix(&format!(".{}", name)) else { continue };
        let Ok(total) = total_str.parse::<usize>() else { continue };
        let mut out = Vec::with_capacity(total);
        for i in 1..=total {
            let p = dir.join(format!("{}-{}.{}", i, total, name));
            if !p.is_file() {
                return Err(ArchiveError::Format(format!(
                    "missing span piece: {}",
                    p.display()
                )));
            }
            out.push(p);
        }
        return Ok(out);
    }

    // Unrenamed 1.name style, counting up until a gap.
    let mut out = Vec::new();
    for i in 1.. {
        let p = dir.join(format!("{}.{}", i, name));
        if !p.is_file() {
            break;
        }
        out.push(p);
    }
    if out.is_empty() {
        return Err(ArchiveError::io(
            io::Error::from(io::ErrorKind::NotFound),
            base,
        ));
    }
    Ok(out)
}

impl SpanReader {
    pub fn open(base: &Path) -> Result<Self> {
        let paths = find_span_files(base)?;
        let mut sr = SpanReader { files: Vec::new(), sizes: Vec::new(), size: 0, pos: 0 };
        for p in paths {
            let f = File::open(&p).map_err(|e| ArchiveError::io(e, &p))?;
            let len = f.metadata().map_err(|e| ArchiveError::io(e, &p))?.len();
            sr.files.push(f);
            sr.sizes.push(len);
            sr.size += len;
        }
        Ok(sr)
    }

    /// Total byte length across all pieces.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn piece_at(&self, pos: u64) -> (usize, u64) {
        let mut off = pos;
        for (i, s) in self.sizes.iter().enumerate() {
            if off < *s {
                return (i, off);
            }
            off -= s;
        }
        (self.files.len() - 1, *self.sizes.last().unwrap_or(&0))
    }
}

impl Read for SpanReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let (idx, off) = self.piece_at(self.pos);
        let f = &mut self.files[idx];
        f.seek(SeekFrom::Start(off))?;
        let remaining = self.sizes[idx] - off;
        let want = buf.len().min(remaining as usize);
        let n = f.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SpanReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let abs = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => self.size as i64 + n,
        };
        if abs < 0 || abs as u64 > self.size {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid seek"));
        }
        self.pos = abs as u64;
        Ok(self.pos)
    }
}

/// Write half: emits pieces as `1.name`, `2.name`, ... while writing and
/// renames them to `1-N.name` .. `N-N.name` (or the bare name when a single
/// piece sufficed) on [`SpanWriter::close`]. Tracks one absolute position,
/// so seeking back (the header patch, a retry rollback) never disturbs
/// pieces already on disk.
pub struct SpanWriter {
    base: PathBuf,
    limit: u64,
    files: Vec<File>,
    names: Vec<PathBuf>,
    pos: u64,
}

impl SpanWriter {
    pub fn create(base: &Path, limit: u64) -> Result<Self> {
        assert!(limit > 0, "span limit must be positive");
        let mut sw = SpanWriter {
            base: base.to_path_buf(),
            limit,
            files: Vec::new(),
            names: Vec::new(),
            pos: 0,
        };
        sw.new_piece()?;
        Ok(sw)
    }

    fn dir_and_name(&self) -> (PathBuf, String) {
        let dir = self.base.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = dir.unwrap_or_else(|| Path::new(".")).to_path_buf();
        let name = self.base.file_name().unwrap_or_default().to_string_lossy().into_owned();
        (dir, name)
    }

    fn new_piece(&mut self) -> Result<()> {
        let (dir, name) = self.dir_and_name();
        let path = dir.join(format!("{}.{}", self.files.len() + 1, name));
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ArchiveError::io(e, &path))?;
        self.files.push(f);
        self.names.push(path);
        Ok(())
    }

    /// Drop any bytes past `len`. Pieces wholly beyond the cut are removed.
    pub fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        let keep = ((len + self.limit - 1) / self.limit).max(1) as usize;
        while self.files.len() > keep {
            self.files.pop();
            if let Some(name) = self.names.pop() {
                fs::remove_file(name)?;
            }
        }
        let last_len = len - (keep as u64 - 1) * self.limit;
        if let Some(last) = self.files.last() {
            last.set_len(last_len)?;
        }
        self.pos = self.pos.min(len);
        Ok(())
    }

    /// Flushes, syncs and renames pieces into their final span names.
    pub fn close(mut self) -> Result<()> {
        for f in &mut self.files {
            f.sync_all().map_err(ArchiveError::from)?;
        }
        let total = self.files.len();
        let (dir, name) = self.dir_and_name();
        self.files.clear();
        if total == 1 {
            fs::rename(&self.names[0], &self.base).map_err(|e| ArchiveError::io(e, &self.base))?;
            return Ok(());
        }
        for (i, piece) in self.names.iter().enumerate() {
            let final_name = dir.join(format!("{}-{}.{}", i + 1, total, name));
            fs::rename(piece, &final_name).map_err(|e| ArchiveError::io(e, &final_name))?;
        }
        Ok(())
    }
}

impl Write for SpanWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut total = 0;
        let mut p = buf;
        while !p.is_empty() {
            let idx = (self.pos / self.limit) as usize;
            let off = self.pos % self.limit;
            if idx == self.files.len() {
                self.new_piece()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            }
            let space = (self.limit - off) as usize;
            let f = &mut self.files[idx];
            f.seek(SeekFrom::Start(off))?;
            let n = f.write(&p[..p.len().min(space)])?;
            self.pos += n as u64;
            total += n;
            p = &p[n..];
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        for f in &mut self.files {
            f.flush()?;
        }
        Ok(())
    }
}

impl Seek for SpanWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let SeekFrom::Start(offset) = pos else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "span writer only supports absolute seeks",
            ));
        };
        let extent = self.files.len() as u64 * self.limit;
        if offset > extent {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past written data",
            ));
        }
        self.pos = offset;
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn span_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arc.goxa");
        let data: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();

        let mut sw = SpanWriter::create(&base, 4096).unwrap();
        sw.write_all(&data).unwrap();
        sw.close().unwrap();

        assert!(!base.exists());
        assert!(dir.path().join("1-10.arc.goxa").exists());

        let mut sr = SpanReader::open(&base).unwrap();
        assert_eq!(sr.len(), data.len() as u64);
        let mut out = Vec::new();
        sr.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn span_reader_seeks_across_pieces() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arc.goxa");
        let data: Vec<u8> = (0u8..=255).cycle().take(3000).collect();

        let mut sw = SpanWriter::create(&base, 1000).unwrap();
        sw.write_all(&data).unwrap();
        sw.close().unwrap();

        let mut sr = SpanReader::open(&base).unwrap();
        sr.seek(SeekFrom::Start(1500)).unwrap();
        let mut buf = [0u8; 100];
        sr.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[1500..1600]);
    }

    #[test]
    fn seeking_back_leaves_later_pieces_intact() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arc.goxa");
        let data = vec![0x11u8; 2500];

        let mut sw = SpanWriter::create(&base, 1000).unwrap();
        sw.write_all(&data).unwrap();
        // Patch the first bytes in place, like the two-pass header write.
        sw.seek(SeekFrom::Start(0)).unwrap();
        sw.write_all(&[0x22u8; 16]).unwrap();
        sw.close().unwrap();

        let mut sr = SpanReader::open(&base).unwrap();
        assert_eq!(sr.len(), 2500);
        let mut out = Vec::new();
        sr.read_to_end(&mut out).unwrap();
        assert_eq!(&out[..16], &[0x22u8; 16]);
        assert_eq!(&out[16..], &data[16..]);
    }

    #[test]
    fn single_piece_renames_to_base() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arc.goxa");
        let mut sw = SpanWriter::create(&base, 1 << 20).unwrap();
        sw.write_all(b"small").unwrap();
        sw.close().unwrap();
        assert!(base.exists());
    }
}
