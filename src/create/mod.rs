//! Archive writer pipeline.
//!
//! Writing is two-pass: a placeholder header with zeroed trailer offset and
//! archive size is emitted first, the payload and trailer follow, and the
//! real header (whose serialized length is guaranteed to match the
//! placeholder) is patched in at offset zero. That requires a seekable
//! sink; non-seekable destinations are buffered through a temporary file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::archive::{encode_header, encode_trailer, Block, EntryKind, FileEntry};
use crate::config::ArchiveConfig;
use crate::flags::{F_CHECKSUMS, F_NO_COMPRESS};
use crate::progress::{Progress, ProgressReader, ProgressWriter, Snapshot, Ticker};
use crate::span::SpanWriter;
use crate::walk::walk_paths;
use crate::wire::CountingWriter;
use crate::{ArchiveError, Result, DEFAULT_BLOCK_SIZE};

/// Outcome of a create operation.
#[derive(Debug)]
pub struct CreateSummary {
    pub files: usize,
    pub dirs: usize,
    pub archive_size: u64,
    pub warnings: Vec<String>,
}

/// The archive byte sink: a plain file or a spanned set of files.
enum Sink {
    File(File),
    Span(SpanWriter),
}

impl Sink {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        match self {
            Sink::File(f) => f.set_len(len),
            Sink::Span(s) => s.truncate_to(len),
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            Sink::File(f) => f.sync_all().map_err(ArchiveError::from),
            Sink::Span(s) => s.close(),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Span(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Span(s) => s.flush(),
        }
    }
}

impl Seek for Sink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Sink::File(f) => f.seek(pos),
            Sink::Span(s) => s.seek(pos),
        }
    }
}

/// Creates an archive at `archive_path` from the given input roots.
/// `render` receives periodic progress snapshots when provided.
pub fn create<F>(
    config: &ArchiveConfig,
    inputs: &[PathBuf],
    archive_path: &Path,
    render: Option<F>,
) -> Result<CreateSummary>
where
    F: Fn(Snapshot) + Send + 'static,
{
    config.validate()?;

    if !config.force && archive_path.exists() {
        return Err(ArchiveError::Policy(format!(
            "archive {} already exists",
            archive_path.display()
        )));
    }

    let sink = match config.span_size {
        Some(limit) => Sink::Span(SpanWriter::create(archive_path, limit)?),
        None => {
            let f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(archive_path)
                .map_err(|e| ArchiveError::io(e, archive_path))?;
            Sink::File(f)
        }
    };

    let space_dir = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    write_archive(config, inputs, sink, Some(space_dir), render)
}

/// Creates an archive into an arbitrary (possibly non-seekable) writer by
/// staging through an unnamed temporary file, then streaming the finished
/// bytes out.
pub fn create_to_stream<W, F>(
    config: &ArchiveConfig,
    inputs: &[PathBuf],
    out: &mut W,
    render: Option<F>,
) -> Result<CreateSummary>
where
    W: Write,
    F: Fn(Snapshot) + Send + 'static,
{
    config.validate()?;
    if config.span_size.is_some() {
        return Err(ArchiveError::Config(
            "spanning requires a file destination".into(),
        ));
    }

    let tmp = tempfile::tempfile()?;
    let sink = Sink::File(tmp.try_clone()?);
    let summary = write_archive(config, inputs, sink, None, render)?;

    let mut staged = tmp;
    staged.seek(SeekFrom::Start(0))?;
    io::copy(&mut staged, out)?;
    out.flush()?;
    Ok(summary)
}

fn write_archive<F>(
    config: &ArchiveConfig,
    inputs: &[PathBuf],
    sink: Sink,
    space_dir: Option<PathBuf>,
    render: Option<F>,
) -> Result<CreateSummary>
where
    F: Fn(Snapshot) + Send + 'static,
{
    let inventory = walk_paths(config, inputs)?;
    let mut warnings = inventory.warnings;
    let dirs = inventory.dirs;
    let files = inventory.files;

    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    if config.space_check {
        if let Some(dir) = space_dir {
            if let Some(warning) = crate::space::check_space(&dir, total_bytes)? {
                warnings.push(warning);
            }
        }
    }

    let progress = Progress::new(total_bytes);
    let ticker = render.map(|f| Ticker::start(progress.clone(), f));

    let block_size = config.effective_block_size();
    let placeholder = encode_header(
        &dirs,
        &files,
        0,
        0,
        config.features,
        config.codec.tag(),
        config.digest,
        config.digest_len,
        block_size,
    )?;
    let header_len = placeholder.len();

    let buffer = buffer_size(block_size);
    let mut out = BufWriter::with_capacity(buffer, ProgressWriter::new(sink, progress.clone()));
    out.write_all(&placeholder)?;

    let (files, trailer_offset) =
        write_entries(config, header_len as u64, &mut out, files, &progress, &mut warnings)?;

    let trailer = encode_trailer(&files, config.digest, config.digest_len);
    out.write_all(&trailer)?;
    out.flush()?;

    let archive_size = trailer_offset + trailer.len() as u64;

    let final_header = encode_header(
        &dirs,
        &files,
        trailer_offset,
        archive_size,
        config.features,
        config.codec.tag(),
        config.digest,
        config.digest_len,
        block_size,
    )?;
    if final_header.len() != header_len {
        return Err(ArchiveError::Format(
            "header length changed between passes".into(),
        ));
    }
    out.seek(SeekFrom::Start(0))?;
    out.write_all(&final_header)?;
    out.flush()?;

    let mut sink = out
        .into_inner()
        .map_err(|e| ArchiveError::from(io::Error::new(io::ErrorKind::Other, e.to_string())))?
        .into_inner();
    // A rolled-back retry may have left stale bytes past the trailer.
    sink.truncate_to(archive_size)?;
    sink.finish()?;

    if let Some(t) = ticker {
        t.stop();
    }

    Ok(CreateSummary {
        files: files.len(),
        dirs: dirs.len(),
        archive_size,
        warnings,
    })
}

fn buffer_size(block_size: u32) -> usize {
    let base = if block_size == 0 { DEFAULT_BLOCK_SIZE } else { block_size };
    base as usize * 4
}

fn mod_time_secs(md: &fs::Metadata) -> i64 {
    filetime::FileTime::from_last_modification_time(md).unix_seconds()
}

/// Streams every regular file's payload, recording blocks as it goes.
/// Returns the (possibly updated) entries and the trailer offset.
fn write_entries<W: Write + Seek>(
    config: &ArchiveConfig,
    header_len: u64,
    out: &mut W,
    files: Vec<FileEntry>,
    progress: &Arc<Progress>,
    warnings: &mut Vec<String>,
) -> Result<(Vec<FileEntry>, u64)> {
    let checksums = config.features.is_set(F_CHECKSUMS);
    let no_compress = config.features.is_set(F_NO_COMPRESS);
    let block_size = config.effective_block_size();
    let digest_len = config.digest_len as u64;
    let read_buffer = buffer_size(block_size);

    let mut c_offset = header_len;
    let mut chunk = vec![0u8; block_size as usize];
    let mut entries = Vec::with_capacity(files.len());

    'entries: for mut entry in files {
        progress.set_file(&entry.path);
        if entry.kind != EntryKind::Regular {
            entry.offset = 0;
            entries.push(entry);
            continue;
        }

        let mut attempt = 0u32;
        let mut had_change = false;
        loop {
            attempt += 1;
            let start_offset = c_offset;

            let mut src = match File::open(&entry.src_path) {
                Ok(f) => f,
                Err(e) => {
                    if config.force {
                        warnings.push(format!("unable to open {}: {}", entry.path, e));
                        entry.offset = 0;
                        entry.blocks.clear();
                        entries.push(entry);
                        continue 'entries;
                    }
                    return Err(ArchiveError::io(e, &entry.src_path));
                }
            };
            let stat_start = src
                .metadata()
                .map_err(|e| ArchiveError::io(e, &entry.src_path))?;

            if checksums {
                let mut hasher = config.digest.hasher();
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let n = src.read(&mut buf).map_err(|e| ArchiveError::io(e, &entry.src_path))?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                src.seek(SeekFrom::Start(0))
                    .map_err(|e| ArchiveError::io(e, &entry.src_path))?;
                out.write_all(&hasher.finalize(config.digest_len))?;
            }

            entry.offset = start_offset;
            let mut pos = start_offset + if checksums { digest_len } else { 0 };
            let mut blocks: Vec<Block> = Vec::new();
            let mut reader = ProgressReader::new(
                BufReader::with_capacity(read_buffer, &mut src),
                progress.clone(),
            );

            if block_size == 0 {
                let block_offset = pos;
                let mut counter = CountingWriter::new(&mut *out);
                let mut enc = if no_compress {
                    crate::codec::store_encoder(&mut counter)
                } else {
                    config.codec.encoder(config.speed, &mut counter)?
                };
                io::copy(&mut reader, &mut enc)?;
                enc.finish()?;
                let written = counter.count();
                pos += written;
                blocks.push(Block { offset: block_offset, size: written });
            } else {
                loop {
                    let n = read_full(&mut reader, &mut chunk)?;
                    if n > 0 {
                        let block_offset = pos;
                        let mut counter = CountingWriter::new(&mut *out);
                        let mut enc = config.codec.encoder(config.speed, &mut counter)?;
                        enc.write_all(&chunk[..n])?;
                        enc.finish()?;
                        pos += counter.count();
                        blocks.push(Block { offset: block_offset, size: counter.count() });
                    }
                    if n < chunk.len() {
                        break;
                    }
                }
            }
            drop(reader);

            // Catch sources mutating underneath us.
            match fs::metadata(&entry.src_path) {
                Ok(stat_end)
                    if stat_end.len() != stat_start.len()
                        || filetime::FileTime::from_last_modification_time(&stat_end)
                            != filetime::FileTime::from_last_modification_time(&stat_start) =>
                {
                    had_change = true;
                    if config.retries == 0 || attempt < config.retries {
                        warnings.push(format!("file changed during read: {} (retrying)", entry.path));
                        out.seek(SeekFrom::Start(start_offset))?;
                        c_offset = start_offset;
                        std::thread::sleep(Duration::from_secs(config.retry_delay));
                        continue;
                    }
                    if config.fail_on_change {
                        return Err(ArchiveError::FileChanged(entry.src_path.clone()));
                    }
                    warnings.push(format!(
                        "file changed during read: {} (keeping last attempt)",
                        entry.path
                    ));
                    entry.size = stat_end.len();
                    entry.mod_time = mod_time_secs(&stat_end);
                    entry.changed = true;
                    entry.blocks = blocks;
                    c_offset = pos;
                    entries.push(entry);
                    continue 'entries;
                }
                Ok(stat_end) => {
                    entry.size = stat_end.len();
                    entry.mod_time = mod_time_secs(&stat_end);
                }
                Err(_) => {
                    // Source vanished after reading; keep what was streamed.
                    entry.size = stat_start.len();
                    entry.mod_time = mod_time_secs(&stat_start);
                }
            }
            entry.changed = had_change;
            entry.blocks = blocks;
            c_offset = pos;
            entries.push(entry);
            break;
        }
    }

    Ok((entries, c_offset))
}

/// Reads until `buf` is full or the stream ends; returns bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
