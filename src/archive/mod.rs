//! Archive entry types plus header and trailer serialization.
//!
//! The same encoder is used when writing an archive and when verifying one:
//! the reader re-serializes the metadata it parsed and compares digest
//! suffixes byte for byte, so any drift between the two paths is caught
//! immediately.
//!
//! Header layout (all integers little-endian):
//!
//! ```text
//! magic "GOXA" | version u16 | flags u64 | codec u8 | digest u8
//! | digest_len u8 | block_size u32 | trailer_offset u64 | archive_size u64
//! | dir_count u64 | dir records | file_count u64 | file records
//! | header digest
//! ```
//!
//! A dir record is `[mode u32?][mtime i64?][path]`; a file record is
//! `[size u64][mode u32?][mtime i64?][path][type u8][link target?]
//! [changed u8]`, where optional fields follow the feature flags and the
//! link target is present for symlink and hardlink entries only.
//!
//! The trailer holds, per file and in header order, `[block_count u32]`
//! followed by `(offset u64, size u64)` pairs, then the trailer digest.

use std::path::PathBuf;

use crate::digest::Digest;
use crate::flags::{BitFlags, F_MOD_TIMES, F_PERMISSIONS};
use crate::wire::write_lp_string;
use crate::{Result, MAGIC, PROTO_VERSION};

/// What a file record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular = 0,
    Symlink = 1,
    Hardlink = 2,
    /// Device, fifo or socket; recorded with size 0 and no payload.
    Other = 3,
}

impl EntryKind {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(EntryKind::Regular),
            1 => Ok(EntryKind::Symlink),
            2 => Ok(EntryKind::Hardlink),
            3 => Ok(EntryKind::Other),
            other => Err(crate::ArchiveError::Format(format!(
                "unknown entry type {}",
                other
            ))),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            EntryKind::Regular => "file",
            EntryKind::Symlink => "symlink",
            EntryKind::Hardlink => "hardlink",
            EntryKind::Other => "other",
        }
    }
}

/// One contiguous on-disk run holding a (possibly compressed) chunk of a
/// file body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Absolute byte offset into the archive.
    pub offset: u64,
    /// Bytes occupied on disk.
    pub size: u64,
}

/// An empty directory recorded in the header. Non-empty directories are
/// implied by the files they contain.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: String,
    pub mode: u32,
    pub mod_time: i64,
}

/// A file record: regular file, symlink, hardlink or special entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path as recorded in the archive.
    pub path: String,
    /// Where the walker found the file. Empty when parsed from an archive.
    pub src_path: PathBuf,
    /// Symlink or hardlink target.
    pub link_target: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub mod_time: i64,
    /// The source mutated while it was being read and the bytes were
    /// accepted as-is.
    pub changed: bool,
    /// Byte offset of this file's payload (including any digest prefix).
    /// 0 means the payload was skipped.
    pub offset: u64,
    pub blocks: Vec<Block>,
}

impl FileEntry {
    pub fn new(path: String, src_path: PathBuf, kind: EntryKind) -> Self {
        Self {
            path,
            src_path,
            link_target: String::new(),
            kind,
            size: 0,
            mode: 0,
            mod_time: 0,
            changed: false,
            offset: 0,
            blocks: Vec::new(),
        }
    }

    /// Sum of on-disk block sizes.
    pub fn stored_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }
}

/// Serializes the complete header image, digest suffix included. The
/// length depends only on the entry inventory, the flags and the digest
/// length, never on the payload, which is what makes the two-pass
/// placeholder overwrite possible.
pub fn encode_header(
    dirs: &[DirEntry],
    files: &[FileEntry],
    trailer_offset: u64,
    archive_size: u64,
    flags: BitFlags,
    codec_tag: u8,
    digest: Digest,
    digest_len: u8,
    block_size: u32,
) -> Result<Vec<u8>> {
    let mut header = Vec::with_capacity(64 + 32 * (dirs.len() + files.len()));

    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&PROTO_VERSION.to_le_bytes());
    header.extend_from_slice(&flags.0.to_le_bytes());
    header.push(codec_tag);
    header.push(digest.tag());
    header.push(digest_len);
    header.extend_from_slice(&block_size.to_le_bytes());
    header.extend_from_slice(&trailer_offset.to_le_bytes());
    header.extend_from_slice(&archive_size.to_le_bytes());

    header.extend_from_slice(&(dirs.len() as u64).to_le_bytes());
    for dir in dirs {
        if flags.is_set(F_PERMISSIONS) {
            header.extend_from_slice(&dir.mode.to_le_bytes());
        }
        if flags.is_set(F_MOD_TIMES) {
            header.extend_from_slice(&dir.mod_time.to_le_bytes());
        }
        write_lp_string(&mut header, &dir.path)?;
    }

    header.extend_from_slice(&(files.len() as u64).to_le_bytes());
    for file in files {
        header.extend_from_slice(&file.size.to_le_bytes());
        if flags.is_set(F_PERMISSIONS) {
            header.extend_from_slice(&file.mode.to_le_bytes());
        }
        if flags.is_set(F_MOD_TIMES) {
            header.extend_from_slice(&file.mod_time.to_le_bytes());
        }
        write_lp_string(&mut header, &file.path)?;
        header.push(file.kind.tag());
        if matches!(file.kind, EntryKind::Symlink | EntryKind::Hardlink) {
            write_lp_string(&mut header, &file.link_target)?;
        }
        header.push(file.changed as u8);
    }

    let mut hasher = digest.hasher();
    hasher.update(&header);
    header.extend_from_slice(&hasher.finalize(digest_len));
    Ok(header)
}

/// Serializes the trailer: per-file block tables in header order, sealed
/// with the trailer digest.
pub fn encode_trailer(files: &[FileEntry], digest: Digest, digest_len: u8) -> Vec<u8> {
    let mut trailer = Vec::with_capacity(16 * files.len());
    for file in files {
        trailer.extend_from_slice(&(file.blocks.len() as u32).to_le_bytes());
        for block in &file.blocks {
            trailer.extend_from_slice(&block.offset.to_le_bytes());
            trailer.extend_from_slice(&block.size.to_le_bytes());
        }
    }
    let mut hasher = digest.hasher();
    hasher.update(&trailer);
    trailer.extend_from_slice(&hasher.finalize(digest_len));
    trailer
}
