//! Path walker: turns input roots into the archive inventory.
//!
//! The inventory is a pair of lexicographically sorted lists: directories
//! that are empty after filtering, and files. Non-empty directories are
//! implied by the files beneath them and are not recorded.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

use crate::archive::{DirEntry, EntryKind, FileEntry};
use crate::config::ArchiveConfig;
use crate::flags::{F_INCLUDE_HIDDEN, F_PERMISSIONS, F_SPECIAL_FILES};
use crate::paths::stored_path;
use crate::{ArchiveError, Result};

/// The walker's output: sorted empty directories, sorted files, and any
/// warnings produced while skipping unreadable entries under `force`.
pub struct Inventory {
    pub dirs: Vec<DirEntry>,
    pub files: Vec<FileEntry>,
    pub warnings: Vec<String>,
}

struct DirState {
    entry_count: usize,
    mode: u32,
    mod_time: i64,
}

fn unix_mode(md: &Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        md.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        let _ = md;
        0
    }
}

fn mod_time_secs(md: &Metadata) -> i64 {
    FileTime::from_last_modification_time(md).unix_seconds()
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn gather_meta(config: &ArchiveConfig, stored: String, src: &Path, md: &Metadata) -> FileEntry {
    let kind = if md.file_type().is_file() {
        EntryKind::Regular
    } else if md.file_type().is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    };
    let mut entry = FileEntry::new(stored, src.to_path_buf(), kind);
    entry.mod_time = mod_time_secs(md);
    if config.features.is_set(F_PERMISSIONS) {
        entry.mode = unix_mode(md);
    }
    match kind {
        EntryKind::Regular => entry.size = md.len(),
        EntryKind::Symlink => {
            if let Ok(target) = std::fs::read_link(src) {
                entry.link_target = target.to_string_lossy().into_owned();
            }
        }
        _ => {}
    }
    entry
}

/// Walks the input roots and produces the sorted inventory.
pub fn walk_paths(config: &ArchiveConfig, roots: &[PathBuf]) -> Result<Inventory> {
    let include_hidden = config.features.is_set(F_INCLUDE_HIDDEN);
    let special_files = config.features.is_set(F_SPECIAL_FILES);

    let mut states: HashMap<String, DirState> = HashMap::new();
    let mut files: Vec<FileEntry> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for root in roots {
        let md = std::fs::symlink_metadata(root).map_err(|e| ArchiveError::io(e, root))?;

        // A root that is not a directory becomes at most one file entry.
        if !md.is_dir() {
            let name = root.file_name().unwrap_or_default();
            if include_hidden || !is_hidden(name) {
                if md.file_type().is_file() || special_files || md.file_type().is_symlink() {
                    let stored = stored_path(config.features, root, root);
                    files.push(gather_meta(config, stored, root, &md));
                }
            }
            continue;
        }

        states.insert(
            stored_path(config.features, root, root),
            DirState { entry_count: 0, mode: unix_mode(&md), mod_time: mod_time_secs(&md) },
        );

        let mut it = WalkDir::new(root).min_depth(1).follow_links(false).into_iter();
        while let Some(next) = it.next() {
            let entry = match next {
                Ok(e) => e,
                Err(e) => {
                    if config.force {
                        warnings.push(format!("skipping unreadable entry: {}", e));
                        continue;
                    }
                    return Err(ArchiveError::io(
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::Other)),
                        root,
                    ));
                }
            };

            if !include_hidden && is_hidden(entry.file_name()) {
                // Skipping a hidden directory prunes its whole subtree.
                if entry.file_type().is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }

            // The parent saw a surviving child, so it is not empty.
            if let Some(parent) = entry.path().parent() {
                let parent_key = stored_path(config.features, root, parent);
                if let Some(st) = states.get_mut(&parent_key) {
                    st.entry_count += 1;
                }
            }

            let md = match entry.metadata() {
                Ok(md) => md,
                Err(e) => {
                    if config.force {
                        warnings.push(format!(
                            "skipping {}: {}",
                            entry.path().display(),
                            e
                        ));
                        continue;
                    }
                    return Err(ArchiveError::io(
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::Other)),
                        entry.path(),
                    ));
                }
            };

            let stored = stored_path(config.features, root, entry.path());
            if md.is_dir() {
                states.insert(
                    stored,
                    DirState {
                        entry_count: 0,
                        mode: unix_mode(&md),
                        mod_time: mod_time_secs(&md),
                    },
                );
            } else if md.file_type().is_file() || md.file_type().is_symlink() || special_files {
                files.push(gather_meta(config, stored, entry.path(), &md));
            }
        }
    }

    // Only directories nothing survived under are recorded.
    let mut dirs: Vec<DirEntry> = states
        .into_iter()
        .filter(|(_, st)| st.entry_count == 0)
        .map(|(path, st)| DirEntry { path, mode: st.mode, mod_time: st.mod_time })
        .collect();

    dirs.sort_by(|a, b| a.path.cmp(&b.path));
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(Inventory { dirs, files, warnings })
}
