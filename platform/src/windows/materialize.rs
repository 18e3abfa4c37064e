// Replaying entry state onto a host directory tree

use cim_core::{CimError, Result, StreamName, Timestamp};
use std::fs::{File, FileTimes, OpenOptions};
use std::os::windows::fs::OpenOptionsExt;
use std::path::Path;
use windows::Win32::Storage::FileSystem::FILE_FLAG_BACKUP_SEMANTICS;

/// Raw reparse buffers are only meaningful to the native image engine.
pub fn create_reparse_point(path: &Path, _reparse_data: &[u8]) -> Result<()> {
    Err(CimError::NotSupported(format!(
        "replaying reparse data outside an image engine ({})",
        path.display()
    )))
}

pub fn write_alternate_stream(path: &Path, stream: &StreamName, bytes: &[u8]) -> Result<()> {
    let qualified = stream.qualify(path);
    std::fs::write(&qualified, bytes)
        .map_err(|e| CimError::from_io(format!("write stream {}", qualified.display()), e))
}

pub fn set_times(path: &Path, last_access: Timestamp, last_write: Timestamp) -> Result<()> {
    let file: File = OpenOptions::new()
        .write(true)
        .custom_flags(FILE_FLAG_BACKUP_SEMANTICS.0)
        .open(path)
        .map_err(|e| CimError::from_io(format!("open {}", path.display()), e))?;
    let times = FileTimes::new()
        .set_accessed(last_access.to_system_time())
        .set_modified(last_write.to_system_time());
    file.set_times(times)
        .map_err(|e| CimError::io(format!("set times on {}", path.display()), e))
}

/// Security descriptors are carried by the native engine; host copies keep inherited ACLs.
pub fn apply_security_descriptor(_path: &Path, _descriptor: &[u8]) -> Result<()> {
    Ok(())
}
