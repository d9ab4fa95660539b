//! Filesystem primitives every blob state transition is built from.
//!
//! Each helper is a single create, rename or delete. Nothing here reads and
//! rewrites an existing blob.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Create `path` exclusively, write `bytes`, and fsync before returning.
///
/// Fails with `AlreadyExists` if anything already occupies `path`.
pub fn write_new_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Rename `from` to `to`, failing if `to` already exists.
///
/// Used for publish and lease transitions: a losing party must see an error,
/// never silently replace someone else's file.
pub fn atomic_rename(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        match renameat2_noreplace(from, to) {
            Err(e) if is_unsupported(&e) => {}
            other => return other,
        }
    }

    if fs::symlink_metadata(to).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("rename target exists: {}", to.display()),
        ));
    }
    fs::rename(from, to)
}

/// Remove a file. A file that is already gone counts as removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Fsync a directory so a completed rename survives power loss.
///
/// Best effort: some platforms refuse to open directories for syncing.
pub fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

#[cfg(target_os = "linux")]
fn renameat2_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let to_cstring = |p: &Path| {
        CString::new(p.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    };
    let from_c = to_cstring(from)?;
    let to_c = to_cstring(to)?;

    let result = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            from_c.as_ptr(),
            libc::AT_FDCWD,
            to_c.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Filesystems without RENAME_NOREPLACE (older kernels, some network mounts).
#[cfg(target_os = "linux")]
fn is_unsupported(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EINVAL) | Some(libc::ENOSYS))
}
