//! Command-line surface: argument parsing and config construction.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::codec::{Codec, Speed};
use crate::config::ArchiveConfig;
use crate::digest::Digest;
use crate::flags::{
    F_ABSOLUTE_PATHS, F_CHECKSUMS, F_INCLUDE_HIDDEN, F_MOD_TIMES, F_NO_COMPRESS, F_PERMISSIONS,
    F_SPECIAL_FILES,
};
use crate::{Result, FAT32_SPAN_SIZE};

#[derive(Parser, Debug)]
#[command(name = "goxa", version, about = "File-tree archiver", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create a new archive from files and directories.
    #[command(alias = "c")]
    Create(CreateOpts),

    /// Extract files from an archive.
    #[command(alias = "x")]
    Extract(ExtractOpts),

    /// List the contents of an archive without extracting it.
    #[command(alias = "l")]
    List(ListOpts),
}

#[derive(clap::Args, Clone, Debug)]
pub struct CreateOpts {
    /// One or more input files or directories.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output archive path. Use "-" to stream to stdout.
    #[arg(short, long, default_value = "archive.goxa")]
    pub output: PathBuf,

    /// Compression codec: gzip, zstd, lz4, snappy, brotli, xz.
    #[arg(long, default_value = "zstd")]
    pub codec: String,

    /// Compression level: fastest, default, better, best.
    #[arg(long, default_value = "fastest")]
    pub level: String,

    /// Checksum digest: crc32, crc16, xxhash, sha256, blake3.
    #[arg(long, default_value = "blake3")]
    pub digest: String,

    /// Stored digest length in bytes (1-32).
    #[arg(long, default_value_t = 32)]
    pub digest_len: u8,

    /// Uncompressed bytes per block. 0 stores each file as one block.
    #[arg(long, default_value_t = crate::DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,

    /// Store absolute canonical paths.
    #[arg(short = 'a', long)]
    pub absolute: bool,

    /// Record unix permissions.
    #[arg(short = 'p', long)]
    pub permissions: bool,

    /// Record modification times.
    #[arg(short = 'm', long)]
    pub mod_times: bool,

    /// Skip per-file checksums (enabled by default).
    #[arg(long)]
    pub no_checksums: bool,

    /// Store payload without compression.
    #[arg(short = 'n', long)]
    pub no_compress: bool,

    /// Include hidden (dot-prefixed) entries.
    #[arg(short = 'i', long)]
    pub hidden: bool,

    /// Record devices, fifos and sockets as zero-length entries.
    #[arg(long)]
    pub special: bool,

    /// Overwrite an existing archive and downgrade per-file errors to
    /// warnings.
    #[arg(short, long)]
    pub force: bool,

    /// Re-read attempts when a source changes mid-stream. 0 retries
    /// forever.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Seconds between such attempts.
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Fail the create when a file keeps changing.
    #[arg(long)]
    pub fail_on_change: bool,

    /// Skip the free-disk-space check.
    #[arg(long)]
    pub no_space_check: bool,

    /// Split the archive across files of SIZE bytes (FAT32-safe size when
    /// SIZE is omitted).
    #[arg(long, value_name = "SIZE", num_args = 0..=1, default_missing_value = "0")]
    pub span: Option<u64>,

    /// Render a progress bar on stderr.
    #[arg(long)]
    pub progress: bool,
}

impl CreateOpts {
    /// Builds the engine configuration for this invocation.
    pub fn config(&self) -> Result<ArchiveConfig> {
        let mut config = ArchiveConfig::default();
        config.codec = Codec::from_name(&self.codec)?;
        config.speed = parse_level(&self.level)?;
        config.digest = Digest::from_name(&self.digest)?;
        config.digest_len = self.digest_len;
        config.block_size = self.block_size;
        if self.absolute {
            config.features.set(F_ABSOLUTE_PATHS);
        }
        if self.permissions {
            config.features.set(F_PERMISSIONS);
        }
        if self.mod_times {
            config.features.set(F_MOD_TIMES);
        }
        if self.no_checksums {
            config.features.clear(F_CHECKSUMS);
        }
        if self.no_compress {
            config.features.set(F_NO_COMPRESS);
        }
        if self.hidden {
            config.features.set(F_INCLUDE_HIDDEN);
        }
        if self.special {
            config.features.set(F_SPECIAL_FILES);
        }
        config.force = self.force;
        config.retries = self.retries;
        config.retry_delay = self.retry_delay;
        config.fail_on_change = self.fail_on_change;
        config.space_check = !self.no_space_check;
        config.span_size = self.span.map(|s| if s == 0 { FAT32_SPAN_SIZE } else { s });
        config.validate()?;
        Ok(config)
    }
}

#[derive(clap::Args, Clone, Debug)]
pub struct ExtractOpts {
    /// The archive to extract.
    #[arg(required = true)]
    pub archive: PathBuf,

    /// Only extract entries equal to or beneath these stored paths.
    pub files: Vec<String>,

    /// Destination directory. Defaults to the archive name without its
    /// extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite existing files and keep going past per-file errors.
    #[arg(short, long)]
    pub force: bool,

    /// Worker threads for parallel extraction. 0 = all cores.
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Skip the zip-bomb ratio check.
    #[arg(long)]
    pub no_bomb_check: bool,

    /// Skip the free-disk-space check.
    #[arg(long)]
    pub no_space_check: bool,

    /// Render a progress bar on stderr.
    #[arg(long)]
    pub progress: bool,
}

impl ExtractOpts {
    pub fn config(&self) -> ArchiveConfig {
        let mut config = ArchiveConfig::default();
        config.force = self.force;
        config.threads = self.threads;
        config.bomb_check = !self.no_bomb_check;
        config.space_check = !self.no_space_check;
        config
    }

    /// The destination directory: explicit, or derived from the archive
    /// name.
    pub fn destination(&self) -> PathBuf {
        if let Some(out) = &self.output {
            return out.clone();
        }
        let name = self
            .archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".into());
        PathBuf::from(strip_archive_ext(&name).to_string())
    }
}

#[derive(clap::Args, Clone, Debug)]
pub struct ListOpts {
    /// The archive to list.
    #[arg(required = true)]
    pub archive: PathBuf,

    /// Only list entries equal to or beneath these stored paths.
    pub files: Vec<String>,

    /// Emit the listing as JSON.
    #[arg(long)]
    pub json: bool,
}

fn parse_level(level: &str) -> Result<Speed> {
    match level {
        "fastest" => Ok(Speed::Fastest),
        "default" => Ok(Speed::Default),
        "better" => Ok(Speed::Better),
        "best" => Ok(Speed::Best),
        other => Err(crate::ArchiveError::Config(format!(
            "unknown level '{}'",
            other
        ))),
    }
}

/// Strips the `.goxa` suffix to derive a default extraction destination.
pub fn strip_archive_ext(name: &str) -> &str {
    name.strip_suffix(".goxa").unwrap_or(name)
}

/// Parses command-line arguments and returns the command to execute.
pub fn run() -> Result<Commands> {
    let args = Args::parse();
    Ok(args.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ext() {
        assert_eq!(strip_archive_ext("backup.goxa"), "backup");
        assert_eq!(strip_archive_ext("backup.tar"), "backup.tar");
    }

    #[test]
    fn level_names_parse() {
        assert!(parse_level("fastest").is_ok());
        assert!(parse_level("best").is_ok());
        assert!(parse_level("turbo").is_err());
    }

    #[test]
    fn create_opts_build_feature_flags() {
        let args = Args::parse_from([
            "goxa", "create", "-p", "-m", "-i", "--no-compress", "--codec", "lz4", "in",
        ]);
        let Commands::Create(opts) = args.command else {
            panic!("expected create");
        };
        let config = opts.config().unwrap();
        assert!(config.features.is_set(F_PERMISSIONS));
        assert!(config.features.is_set(F_MOD_TIMES));
        assert!(config.features.is_set(F_INCLUDE_HIDDEN));
        assert!(config.features.is_set(F_NO_COMPRESS));
        assert!(config.features.is_set(F_CHECKSUMS));
        assert_eq!(config.codec, Codec::Lz4);
        assert_eq!(config.effective_block_size(), 0);
    }
}
