//! Engine configuration.
//!
//! The original tooling in this space tends to scatter knobs across global
//! state; here a single immutable [`ArchiveConfig`] is built once by the
//! caller and passed by reference to every operation.

use crate::codec::{Codec, Speed};
use crate::digest::Digest;
use crate::flags::BitFlags;
use crate::DEFAULT_BLOCK_SIZE;

/// Holds every knob the archive engine consults. Construct one with
/// [`ArchiveConfig::default`] and adjust fields before handing it to
/// [`crate::create::create`] or [`crate::extract::extract`].
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Feature flags recorded in the header at create time.
    pub features: BitFlags,
    /// Compression codec for the whole archive.
    pub codec: Codec,
    /// Compression speed level.
    pub speed: Speed,
    /// Digest algorithm for header, trailer and per-file checksums.
    pub digest: Digest,
    /// Stored digest length in bytes (1..=32). Raw digests are truncated or
    /// zero-padded to this length.
    pub digest_len: u8,
    /// Uncompressed bytes per block. 0 means a single block per file, which
    /// is forced when `no_compress` is set.
    pub block_size: u32,
    /// Downgrade per-entry errors to warnings and keep going.
    pub force: bool,
    /// Re-read attempts when a source file changes mid-stream. 0 retries
    /// forever.
    pub retries: u32,
    /// Seconds to sleep between such attempts.
    pub retry_delay: u64,
    /// Fail the whole create when a file keeps changing instead of
    /// accepting the bytes read.
    pub fail_on_change: bool,
    /// Refuse suspicious compression ratios at extract.
    pub bomb_check: bool,
    /// Stored-size over on-disk-size ratio beyond which a file is treated
    /// as a potential zip bomb.
    pub bomb_ratio: f64,
    /// Check free disk space before writing.
    pub space_check: bool,
    /// Split archive output across files of this size, if set.
    pub span_size: Option<u64>,
    /// Worker threads for parallel extraction. 0 = available parallelism.
    pub threads: usize,
    /// Upper bound on dir/file counts accepted from a header.
    pub max_entries: u64,
    /// Upper bound on blocks accepted per file from a trailer.
    pub max_blocks_per_file: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            features: crate::flags::F_CHECKSUMS,
            codec: Codec::Zstd,
            speed: Speed::Fastest,
            digest: Digest::Blake3,
            digest_len: 32,
            block_size: DEFAULT_BLOCK_SIZE,
            force: false,
            retries: 3,
            retry_delay: 5,
            fail_on_change: false,
            bomb_check: true,
            bomb_ratio: crate::ZIP_BOMB_RATIO,
            space_check: true,
            span_size: None,
            threads: 0,
            max_entries: 1_000_000,
            max_blocks_per_file: 1 << 24,
        }
    }
}

impl ArchiveConfig {
    /// Effective block size for writing: `no_compress` always stores each
    /// file as a single contiguous run.
    pub fn effective_block_size(&self) -> u32 {
        if self.features.is_set(crate::flags::F_NO_COMPRESS) {
            0
        } else if self.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size
        }
    }

    /// Worker count for parallel extraction.
    pub fn worker_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Validates digest length and codec/digest availability.
    pub fn validate(&self) -> crate::Result<()> {
        if self.digest_len == 0 || self.digest_len > 32 {
            return Err(crate::ArchiveError::Config(format!(
                "digest length {} out of range 1..=32",
                self.digest_len
            )));
        }
        Ok(())
    }
}
