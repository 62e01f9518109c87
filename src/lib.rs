//! # goxa Core Library
//!
//! This crate provides the core functionality for the `goxa` archiver.
//!
//! It is designed to be used by the `goxa` command-line application, but its
//! public API can also be used to programmatically create, inspect, and
//! extract `.goxa` archives.
//!
//! ## Key Modules
//!
//! - [`archive`]: Entry types plus header and trailer serialization.
//! - [`create`]: The two-pass writer pipeline.
//! - [`extract`]: Header parsing, verification and parallel extraction.
//! - [`codec`]: Streaming compressor/decompressor registry.
//! - [`digest`]: Incremental checksum registry.
//! - [`walk`]: Deterministic inventory of directories and files.

pub mod archive;
pub mod cli;
pub mod codec;
pub mod config;
pub mod create;
pub mod digest;
pub mod extract;
pub mod flags;
pub mod paths;
pub mod progress;
pub mod space;
pub mod span;
pub mod walk;
pub mod wire;

pub mod error;
pub use error::ArchiveError;

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Magic bytes at the start of every archive.
pub const MAGIC: &[u8; 4] = b"GOXA";

/// The only protocol version this implementation reads and writes.
pub const PROTO_VERSION: u16 = 2;

/// Default block size for block-granular storage (512 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 512 * 1024;

/// Span size used when spanning is requested without an explicit limit:
/// FAT32-safe 4 GiB - 64 KiB.
pub const FAT32_SPAN_SIZE: u64 = 4 * 1024 * 1024 * 1024 - 64 * 1024;

/// Minimum on-disk payload before the zip-bomb ratio check applies (10 MiB).
pub const ZIP_BOMB_MIN_SIZE: u64 = 10 * 1024 * 1024;

/// Stored-size over on-disk-size ratio above which a file is treated as a
/// potential zip bomb.
pub const ZIP_BOMB_RATIO: f64 = 100.0;
