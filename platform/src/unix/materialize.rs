// Replaying entry state onto a host directory tree

use super::{unpack_descriptor, STREAM_XATTR_PREFIX};
use cim_core::{CimError, Result, StreamName, Timestamp};
use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Recreate a reparse point; on Unix the data is a symlink target.
pub fn create_reparse_point(path: &Path, reparse_data: &[u8]) -> Result<()> {
    let target = Path::new(OsStr::from_bytes(reparse_data));
    std::os::unix::fs::symlink(target, path)
        .map_err(|e| CimError::from_io(format!("create symlink {}", path.display()), e))
}

pub fn write_alternate_stream(path: &Path, stream: &StreamName, bytes: &[u8]) -> Result<()> {
    let attr = format!("{}{}", STREAM_XATTR_PREFIX, stream.name());
    xattr::set(path, attr, bytes).map_err(|e| {
        CimError::from_io(format!("write stream {}", stream.qualify(path).display()), e)
    })
}

/// Set access and write times without following a final symlink.
pub fn set_times(path: &Path, last_access: Timestamp, last_write: Timestamp) -> Result<()> {
    let timespec = |ts: Timestamp| {
        let (secs, nanos) = ts.to_unix();
        TimeSpec::new(secs as _, nanos as _)
    };
    utimensat(
        None,
        path,
        &timespec(last_access),
        &timespec(last_write),
        UtimensatFlags::NoFollowSymlink,
    )
    .map_err(|errno| {
        CimError::io(
            format!("set times on {}", path.display()),
            std::io::Error::from_raw_os_error(errno as i32),
        )
    })
}

/// Apply permission bits from a packed descriptor to a regular file.
///
/// Directories and links keep their defaults so the view stays removable.
pub fn apply_security_descriptor(path: &Path, descriptor: &[u8]) -> Result<()> {
    let Some((mode, _uid, _gid)) = unpack_descriptor(descriptor) else {
        log::debug!("Descriptor for {} is not a Unix descriptor; skipping", path.display());
        return Ok(());
    };
    let meta = fs::symlink_metadata(path)
        .map_err(|e| CimError::from_io(format!("stat {}", path.display()), e))?;
    if !meta.file_type().is_file() {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| CimError::from_io(format!("set permissions on {}", path.display()), e))
}
