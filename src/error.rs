use std::path::PathBuf;

/// The primary error type for all operations in the `goxa` crate.
#[derive(Debug)]
pub enum ArchiveError {
    /// The archive bytes do not parse: wrong magic, unknown version,
    /// malformed length prefix, invalid UTF-8, or an entry count beyond the
    /// configured sanity bound.
    Format(String),

    /// A digest or size cross-check failed: header, trailer or per-file
    /// digest mismatch, or the archive length disagrees with the header.
    Integrity(String),

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    Io { source: std::io::Error, path: PathBuf },

    /// A stored path escaped the extraction root or collided with an
    /// absolute path.
    Path { path: PathBuf, reason: String },

    /// A source file kept changing during archiving and `fail_on_change`
    /// is set.
    FileChanged(PathBuf),

    /// A policy refused the operation: zip-bomb ratio exceeded, not enough
    /// free disk space, or an existing file without `force`.
    Policy(String),

    /// The requested configuration is unusable: unknown codec or digest
    /// tag, out-of-range digest length, contradictory flags.
    Config(String),
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Format(msg) => write!(f, "format error: {}", msg),
            ArchiveError::Integrity(msg) => write!(f, "integrity error: {}", msg),
            ArchiveError::Io { source, path } => {
                if path.as_os_str().is_empty() {
                    write!(f, "I/O error: {}", source)
                } else {
                    write!(f, "I/O error on path '{}': {}", path.display(), source)
                }
            }
            ArchiveError::Path { path, reason } => {
                write!(f, "illegal path '{}': {}", path.display(), reason)
            }
            ArchiveError::FileChanged(path) => {
                write!(f, "file changed during archiving: {}", path.display())
            }
            ArchiveError::Policy(msg) => write!(f, "refused: {}", msg),
            ArchiveError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io { source: err, path: PathBuf::new() }
    }
}

impl ArchiveError {
    /// Attach a path to a bare I/O error.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchiveError::Io { source, path: path.into() }
    }
}
