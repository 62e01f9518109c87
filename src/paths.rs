//! Stored-path canonicalization and extraction-root containment.

use std::path::{Component, Path, PathBuf};

use crate::flags::{BitFlags, F_ABSOLUTE_PATHS};
use crate::{ArchiveError, Result};

/// Lexically cleans a path: collapses `.` segments, resolves `..` against
/// preceding components, and never touches the filesystem. Mirrors the
/// cleaning the archive format assumes for stored paths.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    let mut absolute = false;
    for comp in path.components() {
        match comp {
            Component::RootDir => {
                out.push(Component::RootDir);
                absolute = true;
            }
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !absolute {
                    // Leading ".." in a relative path survives cleaning.
                    out.push(Component::ParentDir);
                }
            }
            Component::Normal(seg) => {
                out.push(seg);
                depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Joins `target` under `base`, guaranteeing the result stays within
/// `base`. Absolute targets are demoted to relative by stripping the root.
/// Escapes via `..` fail.
pub fn safe_join(base: &Path, target: &Path) -> Result<PathBuf> {
    let clean_base = clean_path(base);
    let mut clean_target = clean_path(target);

    if clean_target.is_absolute() {
        clean_target = clean_target
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
    }

    let joined = clean_path(&clean_base.join(&clean_target));
    if joined != clean_base && !joined.starts_with(&clean_base) {
        return Err(ArchiveError::Path {
            path: target.to_path_buf(),
            reason: "escapes extraction root".into(),
        });
    }
    Ok(joined)
}

/// Computes the path recorded in the archive for `full`, found under
/// `root`. With `absolute_paths` the absolute cleaned path is stored;
/// otherwise the root's basename joined with the path relative to the root
/// (a single-file root stores just its basename).
pub fn stored_path(features: BitFlags, root: &Path, full: &Path) -> String {
    let clean_full = clean_path(full);

    if features.is_set(F_ABSOLUTE_PATHS) {
        let abs = if clean_full.is_absolute() {
            clean_full
        } else {
            match std::path::absolute(&clean_full) {
                Ok(p) => clean_path(&p),
                Err(_) => clean_full,
            }
        };
        return abs.to_string_lossy().into_owned();
    }

    let clean_root = clean_path(root);
    let base = match clean_root.file_name() {
        Some(name) => PathBuf::from(name),
        None => PathBuf::new(),
    };

    let rel = match clean_full.strip_prefix(&clean_root) {
        Ok(r) => r.to_path_buf(),
        Err(_) => clean_full
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default(),
    };

    let joined = if base.as_os_str().is_empty() {
        rel
    } else if rel.as_os_str().is_empty() {
        base
    } else {
        base.join(rel)
    };
    clean_path(&joined).to_string_lossy().into_owned()
}

/// Reports whether a stored path is covered by the selection list: equal to
/// an entry or beneath one. An empty selection selects everything.
pub fn is_selected(stored: &str, selection: &[String]) -> bool {
    if selection.is_empty() {
        return true;
    }
    let clean = clean_path(Path::new(stored));
    selection.iter().any(|s| {
        let sel = clean_path(Path::new(s.trim_end_matches('/')));
        clean == sel || clean.starts_with(&sel)
    })
}
