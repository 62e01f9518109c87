//! Free disk space probing.

use std::path::Path;

/// Returns `(free, total)` bytes for the filesystem holding `path`.
#[cfg(unix)]
pub fn disk_space(path: &Path) -> std::io::Result<(u64, u64)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let frsize = stat.f_frsize as u64;
    Ok((stat.f_bavail as u64 * frsize, stat.f_blocks as u64 * frsize))
}

#[cfg(not(unix))]
pub fn disk_space(_path: &Path) -> std::io::Result<(u64, u64)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "free-space probing not supported on this platform",
    ))
}

/// Verifies that `need` bytes fit under `path` with at least 1% of the
/// filesystem left over. Probe failures are reported as a warning string
/// rather than an error; policy violations are `Policy` errors.
pub fn check_space(path: &Path, need: u64) -> crate::Result<Option<String>> {
    let (free, total) = match disk_space(path) {
        Ok(v) => v,
        Err(e) => return Ok(Some(format!("free space check failed: {}", e))),
    };
    if need > free {
        return Err(crate::ArchiveError::Policy(format!(
            "insufficient disk space: need {} bytes, available {}",
            need, free
        )));
    }
    if free - need < total / 100 {
        return Err(crate::ArchiveError::Policy(format!(
            "operation would leave only {} bytes free",
            free - need
        )));
    }
    Ok(None)
}
