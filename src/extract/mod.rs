//! Archive reader pipeline.
//!
//! Parsing is strict: the header digest is verified by re-serializing the
//! parsed metadata through the writer's own encoder and comparing digest
//! suffixes, the trailer digest likewise, and the archive's physical length
//! must match the header's recorded size before any file is written.
//!
//! Extraction fans the file list out over a fixed worker pool. Every worker
//! opens its own reader over the archive, so no file handle (and no seek
//! position) is ever shared between threads. With compression disabled the
//! files are extracted sequentially instead; parallel raw copies would only
//! contend on the disk.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::archive::{
    encode_header, encode_trailer, Block, DirEntry, EntryKind, FileEntry,
};
use crate::codec::Codec;
use crate::config::ArchiveConfig;
use crate::digest::Digest;
use crate::flags::{
    BitFlags, F_ABSOLUTE_PATHS, F_CHECKSUMS, F_MOD_TIMES, F_NO_COMPRESS, F_PERMISSIONS,
};
use crate::paths::{clean_path, is_selected, safe_join};
use crate::progress::{Progress, ProgressReader, Snapshot, Ticker};
use crate::span::open_reader;
use crate::wire::{read_i64, read_lp_string, read_u16, read_u32, read_u64, read_u8};
use crate::{ArchiveError, Result, DEFAULT_BLOCK_SIZE, MAGIC, PROTO_VERSION, ZIP_BOMB_MIN_SIZE};

/// Parsed archive metadata: everything needed to list or extract.
#[derive(Debug)]
pub struct ArchiveInfo {
    pub version: u16,
    pub flags: BitFlags,
    pub codec: Codec,
    pub digest: Digest,
    pub digest_len: u8,
    pub block_size: u32,
    pub trailer_offset: u64,
    pub archive_size: u64,
    pub dirs: Vec<DirEntry>,
    pub files: Vec<FileEntry>,
}

/// Outcome of an extract operation.
#[derive(Debug)]
pub struct ExtractSummary {
    pub files_extracted: u64,
    pub dirs_created: u64,
    pub checksums_verified: u64,
    pub skipped: u64,
    pub warnings: Vec<String>,
}

fn buffer_size(block_size: u32) -> usize {
    let base = if block_size == 0 { DEFAULT_BLOCK_SIZE } else { block_size };
    base as usize * 4
}

/// Parses and verifies the header and trailer of the archive at `path`.
pub fn parse_archive(config: &ArchiveConfig, path: &Path) -> Result<ArchiveInfo> {
    let mut arc = open_reader(path, buffer_size(config.block_size))?;
    let physical_len = arc.get_ref().len();

    let mut magic = [0u8; 4];
    arc.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ArchiveError::Format(
            "file does not appear to be a goxa archive".into(),
        ));
    }

    let version = read_u16(&mut arc)?;
    if version != PROTO_VERSION {
        return Err(ArchiveError::Format(format!(
            "unsupported archive version {}",
            version
        )));
    }

    let flags = BitFlags(read_u64(&mut arc)?);
    let codec = Codec::from_tag(read_u8(&mut arc)?)?;
    let digest = Digest::from_tag(read_u8(&mut arc)?)?;
    let digest_len = read_u8(&mut arc)?;
    if digest_len == 0 || digest_len > 32 {
        return Err(ArchiveError::Format(format!(
            "digest length {} out of range 1..=32",
            digest_len
        )));
    }
    let block_size = read_u32(&mut arc)?;
    let trailer_offset = read_u64(&mut arc)?;
    let archive_size = read_u64(&mut arc)?;

    if physical_len != archive_size {
        return Err(ArchiveError::Integrity(format!(
            "archive size mismatch: header says {}, file is {}",
            archive_size, physical_len
        )));
    }

    let dir_count = read_u64(&mut arc)?;
    if dir_count > config.max_entries {
        return Err(ArchiveError::Format(format!(
            "directory count {} exceeds sanity bound {}",
            dir_count, config.max_entries
        )));
    }
    let mut dirs = Vec::with_capacity(dir_count as usize);
    for _ in 0..dir_count {
        let mode = if flags.is_set(F_PERMISSIONS) { read_u32(&mut arc)? } else { 0 };
        let mod_time = if flags.is_set(F_MOD_TIMES) { read_i64(&mut arc)? } else { 0 };
        let path = read_lp_string(&mut arc)?;
        dirs.push(DirEntry { path, mode, mod_time });
    }

    let file_count = read_u64(&mut arc)?;
    if file_count > config.max_entries {
        return Err(ArchiveError::Format(format!(
            "file count {} exceeds sanity bound {}",
            file_count, config.max_entries
        )));
    }
    let mut files = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let size = read_u64(&mut arc)?;
        let mode = if flags.is_set(F_PERMISSIONS) { read_u32(&mut arc)? } else { 0 };
        let mod_time = if flags.is_set(F_MOD_TIMES) { read_i64(&mut arc)? } else { 0 };
        let path = read_lp_string(&mut arc)?;
        let kind = EntryKind::from_tag(read_u8(&mut arc)?)?;
        let link_target = if matches!(kind, EntryKind::Symlink | EntryKind::Hardlink) {
            read_lp_string(&mut arc)?
        } else {
            String::new()
        };
        let changed = read_u8(&mut arc)? != 0;

        let mut entry = FileEntry::new(path, PathBuf::new(), kind);
        entry.size = size;
        entry.mode = mode;
        entry.mod_time = mod_time;
        entry.link_target = link_target;
        entry.changed = changed;
        files.push(entry);
    }

    // The header digest seals everything parsed so far. Rebuild the image
    // with the writer's encoder and compare suffixes.
    let mut stored_digest = vec![0u8; digest_len as usize];
    arc.read_exact(&mut stored_digest)?;
    let image = encode_header(
        &dirs,
        &files,
        trailer_offset,
        archive_size,
        flags,
        codec.tag(),
        digest,
        digest_len,
        block_size,
    )?;
    if image[image.len() - digest_len as usize..] != stored_digest[..] {
        return Err(ArchiveError::Integrity("header digest mismatch".into()));
    }

    arc.seek(SeekFrom::Start(trailer_offset))?;
    for entry in &mut files {
        let count = read_u32(&mut arc)?;
        if count > config.max_blocks_per_file {
            return Err(ArchiveError::Format(format!(
                "block count {} exceeds sanity bound {}",
                count, config.max_blocks_per_file
            )));
        }
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = read_u64(&mut arc)?;
            let size = read_u64(&mut arc)?;
            blocks.push(Block { offset, size });
        }
        if let Some(first) = blocks.first() {
            entry.offset = if flags.is_set(F_CHECKSUMS) {
                first.offset.checked_sub(digest_len as u64).ok_or_else(|| {
                    ArchiveError::Format(format!("block offset underflow for {}", entry.path))
                })?
            } else {
                first.offset
            };
        }
        entry.blocks = blocks;
    }

    let mut stored_trailer_digest = vec![0u8; digest_len as usize];
    arc.read_exact(&mut stored_trailer_digest)?;
    let trailer_image = encode_trailer(&files, digest, digest_len);
    if trailer_image[trailer_image.len() - digest_len as usize..] != stored_trailer_digest[..] {
        return Err(ArchiveError::Integrity("trailer digest mismatch".into()));
    }

    Ok(ArchiveInfo {
        version,
        flags,
        codec,
        digest,
        digest_len,
        block_size,
        trailer_offset,
        archive_size,
        dirs,
        files,
    })
}

/// One entry of a [`ArchiveListing`].
#[derive(Debug, Serialize)]
pub struct ListEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub size: u64,
    pub mode: u32,
    pub mod_time: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub link_target: String,
}

/// Structured listing of an archive, serializable to JSON.
#[derive(Debug, Serialize)]
pub struct ArchiveListing {
    pub version: u16,
    pub flags: Vec<&'static str>,
    pub compression: &'static str,
    pub checksum: &'static str,
    pub checksum_length: u8,
    pub block_size: u32,
    pub archive_size: u64,
    pub dirs: Vec<ListEntry>,
    pub files: Vec<ListEntry>,
}

/// Lists the selected entries of an archive without extracting anything.
pub fn list(config: &ArchiveConfig, path: &Path, selection: &[String]) -> Result<ArchiveListing> {
    let info = parse_archive(config, path)?;
    let dirs = info
        .dirs
        .iter()
        .filter(|d| is_selected(&d.path, selection))
        .map(|d| ListEntry {
            path: d.path.clone(),
            kind: "dir",
            size: 0,
            mode: d.mode,
            mod_time: d.mod_time,
            link_target: String::new(),
        })
        .collect();
    let files = info
        .files
        .iter()
        .filter(|f| is_selected(&f.path, selection))
        .map(|f| ListEntry {
            path: f.path.clone(),
            kind: f.kind.name(),
            size: f.size,
            mode: f.mode,
            mod_time: f.mod_time,
            link_target: f.link_target.clone(),
        })
        .collect();
    Ok(ArchiveListing {
        version: info.version,
        flags: info.flags.names(),
        compression: info.codec.name(),
        checksum: info.digest.name(),
        checksum_length: info.digest_len,
        block_size: info.block_size,
        archive_size: info.archive_size,
        dirs,
        files,
    })
}

struct Counters {
    extracted: AtomicU64,
    verified: AtomicU64,
    skipped: AtomicU64,
    warnings: Mutex<Vec<String>>,
}

impl Counters {
    fn warn(&self, msg: String) {
        if let Ok(mut w) = self.warnings.lock() {
            w.push(msg);
        }
    }
}

/// Extracts the selected entries of the archive at `path` beneath
/// `destination`. `render` receives periodic progress snapshots.
pub fn extract<F>(
    config: &ArchiveConfig,
    path: &Path,
    destination: &Path,
    selection: &[String],
    render: Option<F>,
) -> Result<ExtractSummary>
where
    F: Fn(Snapshot) + Send + 'static,
{
    let info = parse_archive(config, path)?;

    let selected_files: Vec<&FileEntry> = info
        .files
        .iter()
        .filter(|f| is_selected(&f.path, selection))
        .collect();
    let selected_dirs: Vec<&DirEntry> = info
        .dirs
        .iter()
        .filter(|d| is_selected(&d.path, selection))
        .collect();

    fs::create_dir_all(destination).map_err(|e| ArchiveError::io(e, destination))?;

    let counters = Counters {
        extracted: AtomicU64::new(0),
        verified: AtomicU64::new(0),
        skipped: AtomicU64::new(0),
        warnings: Mutex::new(Vec::new()),
    };

    let total_bytes: u64 = selected_files.iter().map(|f| f.size).sum();
    if config.space_check {
        if let Some(warning) = crate::space::check_space(destination, total_bytes)? {
            counters.warn(warning);
        }
    }

    let progress = Progress::new(total_bytes);
    let ticker = render.map(|f| Ticker::start(progress.clone(), f));

    let mut dirs_created = 0u64;
    for dir in &selected_dirs {
        match make_dir(&info, destination, dir) {
            Ok(()) => dirs_created += 1,
            Err(e) if config.force => counters.warn(format!("{}", e)),
            Err(e) => return Err(e),
        }
    }

    let run_one = |entry: &FileEntry| -> std::result::Result<(), ArchiveError> {
        match extract_file(config, &info, path, destination, entry, &progress, &counters) {
            Ok(()) => Ok(()),
            Err(e) if config.force => {
                counters.warn(format!("{}: {}", entry.path, e));
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(e),
        }
    };

    if info.flags.is_set(F_NO_COMPRESS) {
        for entry in &selected_files {
            run_one(entry)?;
        }
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads())
            .build()
            .map_err(|e| ArchiveError::Config(format!("worker pool: {}", e)))?;
        pool.install(|| {
            use rayon::prelude::*;
            selected_files.par_iter().try_for_each(|entry| run_one(entry))
        })?;
    }

    if let Some(t) = ticker {
        t.stop();
    }

    Ok(ExtractSummary {
        files_extracted: counters.extracted.load(Ordering::Relaxed),
        dirs_created,
        checksums_verified: counters.verified.load(Ordering::Relaxed),
        skipped: counters.skipped.load(Ordering::Relaxed),
        warnings: counters.warnings.into_inner().unwrap_or_default(),
    })
}

fn make_dir(info: &ArchiveInfo, destination: &Path, dir: &DirEntry) -> Result<()> {
    let dir_path = resolve_output(info.flags, destination, &dir.path)?;
    fs::create_dir_all(&dir_path).map_err(|e| ArchiveError::io(e, &dir_path))?;
    if info.flags.is_set(F_PERMISSIONS) {
        set_mode(&dir_path, dir.mode)?;
    }
    if info.flags.is_set(F_MOD_TIMES) {
        let t = filetime::FileTime::from_unix_time(dir.mod_time, 0);
        let _ = filetime::set_file_times(&dir_path, t, t);
    }
    Ok(())
}

fn resolve_output(flags: BitFlags, destination: &Path, stored: &str) -> Result<PathBuf> {
    if flags.is_set(F_ABSOLUTE_PATHS) {
        Ok(clean_path(Path::new(stored)))
    } else {
        safe_join(destination, Path::new(stored))
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| ArchiveError::io(e, path))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

/// Reports whether the entry's stored/on-disk size ratio marks it as a
/// potential zip bomb. Returns `(on_disk, ratio, is_bomb)`.
fn zip_bomb_ratio(entry: &FileEntry, max_ratio: f64) -> (u64, f64, bool) {
    let on_disk = entry.stored_size();
    if on_disk == 0 || on_disk < ZIP_BOMB_MIN_SIZE {
        return (on_disk, 0.0, false);
    }
    let ratio = entry.size as f64 / on_disk as f64;
    (on_disk, ratio, ratio > max_ratio)
}

fn extract_file(
    config: &ArchiveConfig,
    info: &ArchiveInfo,
    archive_path: &Path,
    destination: &Path,
    entry: &FileEntry,
    progress: &Arc<Progress>,
    counters: &Counters,
) -> Result<()> {
    if entry.kind == EntryKind::Other {
        return Ok(());
    }

    let final_path = resolve_output(info.flags, destination, &entry.path)?;

    if matches!(entry.kind, EntryKind::Symlink | EntryKind::Hardlink) {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(e, parent))?;
        }
        if config.force && final_path.symlink_metadata().is_ok() {
            let _ = fs::remove_file(&final_path);
        }
        match entry.kind {
            EntryKind::Symlink => {
                #[cfg(unix)]
                std::os::unix::fs::symlink(&entry.link_target, &final_path)
                    .map_err(|e| ArchiveError::io(e, &final_path))?;
                #[cfg(not(unix))]
                return Err(ArchiveError::Policy(format!(
                    "cannot recreate symlink {} on this platform",
                    entry.path
                )));
            }
            _ => {
                fs::hard_link(&entry.link_target, &final_path)
                    .map_err(|e| ArchiveError::io(e, &final_path))?;
            }
        }
        counters.extracted.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    // A zero offset means the payload was never written (skipped source or
    // an empty file in block mode).
    if entry.offset == 0 {
        counters.skipped.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    if entry.changed {
        counters.warn(format!("{} changed while it was archived", entry.path));
    }

    if config.bomb_check {
        let (on_disk, ratio, bomb) = zip_bomb_ratio(entry, config.bomb_ratio);
        if bomb {
            return Err(ArchiveError::Policy(format!(
                "potential zip bomb: {} expands from {} to {} bytes (x{:.0})",
                entry.path, on_disk, entry.size, ratio
            )));
        }
    }

    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::io(e, parent))?;
    }

    let out_file = open_output(config, info.flags, &final_path, entry.mode)?;

    progress.set_file(&entry.path);

    let mut arc = open_reader(archive_path, buffer_size(info.block_size))?;
    arc.seek(SeekFrom::Start(entry.offset))?;

    let mut expected = vec![0u8; info.digest_len as usize];
    if info.flags.is_set(F_CHECKSUMS) {
        arc.read_exact(&mut expected)
            .map_err(|e| ArchiveError::io(e, archive_path))?;
    }

    let mut hasher = info
        .flags
        .is_set(F_CHECKSUMS)
        .then(|| info.digest.hasher());
    let mut out = io::BufWriter::with_capacity(
        buffer_size(info.block_size),
        crate::progress::ProgressWriter::new(out_file, progress.clone()),
    );
    let mut written_total = 0u64;

    for block in &entry.blocks {
        arc.seek(SeekFrom::Start(block.offset))?;
        let limited = (&mut arc).take(block.size);
        written_total += if info.flags.is_set(F_NO_COMPRESS) {
            let counted = ProgressReader::new(limited, progress.clone());
            stream_copy(counted, &mut out, hasher.as_mut())?
        } else {
            // Count decompressed bytes so the percentage tracks the
            // recorded file sizes.
            let counted = ProgressReader::new(info.codec.decoder(limited)?, progress.clone());
            stream_copy(counted, &mut out, hasher.as_mut())?
        };
    }
    out.flush()?;
    drop(out);

    // The recorded size is the contract for what the blocks decompress to.
    // Entries accepted after a mid-read change are exempt.
    if !entry.changed && written_total != entry.size {
        return Err(ArchiveError::Integrity(format!(
            "{}: decompressed {} bytes, expected {}",
            entry.path, written_total, entry.size
        )));
    }

    if info.flags.is_set(F_PERMISSIONS) {
        set_mode(&final_path, entry.mode)?;
    }
    if info.flags.is_set(F_MOD_TIMES) {
        let t = filetime::FileTime::from_unix_time(entry.mod_time, 0);
        let _ = filetime::set_file_times(&final_path, t, t);
    }

    if let Some(hasher) = hasher {
        let sum = hasher.finalize(info.digest_len);
        if sum == expected {
            counters.verified.fetch_add(1, Ordering::Relaxed);
        } else if config.force {
            counters.warn(format!("checksum mismatch for {}", entry.path));
        } else {
            return Err(ArchiveError::Integrity(format!(
                "checksum mismatch for {}",
                entry.path
            )));
        }
    }

    counters.extracted.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

fn open_output(
    config: &ArchiveConfig,
    flags: BitFlags,
    path: &Path,
    mode: u32,
) -> Result<fs::File> {
    let mode = if flags.is_set(F_PERMISSIONS) { mode & 0o7777 } else { 0o644 };
    let mut opts = OpenOptions::new();
    opts.write(true);
    if config.force {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    opts.open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            ArchiveError::Policy(format!(
                "{} already exists (use force to overwrite)",
                path.display()
            ))
        } else {
            ArchiveError::io(e, path)
        }
    })
}

/// Copies `src` to `out`, optionally teeing into a digest. Returns bytes
/// copied.
fn stream_copy<R: Read, W: Write>(
    mut src: R,
    out: &mut W,
    mut hasher: Option<&mut crate::digest::Hasher>,
) -> Result<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        out.write_all(&buf[..n])?;
        if let Some(h) = &mut hasher {
            h.update(&buf[..n]);
        }
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_bomb_needs_large_payload_and_ratio() {
        let max = crate::ZIP_BOMB_RATIO;
        let mut entry = FileEntry::new("f".into(), PathBuf::new(), EntryKind::Regular);
        entry.size = 500;
        entry.blocks = vec![Block { offset: 0, size: 100 }];
        assert!(!zip_bomb_ratio(&entry, max).2, "small payloads are never bombs");

        entry.blocks = vec![Block { offset: 0, size: ZIP_BOMB_MIN_SIZE }];
        entry.size = ZIP_BOMB_MIN_SIZE * 50;
        assert!(!zip_bomb_ratio(&entry, max).2, "ratio 50 is under the limit");

        entry.size = ZIP_BOMB_MIN_SIZE * 200;
        assert!(zip_bomb_ratio(&entry, max).2, "ratio 200 trips the guard");
    }
}
