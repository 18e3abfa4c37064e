// Windows entry query
// Opens with backup semantics (directories) and without following reparse points

use super::{to_io_error, OwnedHandle};
use crate::raw::{RawEntry, RawStream};
use cim_core::{CimError, FileAttributes, FileId128, Result, StreamName, Timestamp};
use std::ffi::c_void;
use std::fs::OpenOptions;
use std::io::Read;
use std::os::windows::fs::OpenOptionsExt;
use std::path::Path;
use windows::core::HSTRING;
use windows::Win32::Foundation::{ERROR_HANDLE_EOF, GENERIC_READ, HANDLE};
use windows::Win32::Security::{
    GetFileSecurityW, DACL_SECURITY_INFORMATION, GROUP_SECURITY_INFORMATION,
    LABEL_SECURITY_INFORMATION, OWNER_SECURITY_INFORMATION, PSECURITY_DESCRIPTOR,
    SACL_SECURITY_INFORMATION,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FileBasicInfo, FileIdInfo, FileStandardInfo, FindClose, FindFirstStreamW,
    FindNextStreamW, FindStreamInfoStandard, GetFileInformationByHandleEx, FILE_BASIC_INFO,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT, FILE_ID_INFO, FILE_SHARE_DELETE,
    FILE_SHARE_READ, FILE_SHARE_WRITE, FILE_STANDARD_INFO, OPEN_EXISTING, WIN32_FIND_STREAM_DATA,
};
use windows::Win32::System::Ioctl::FSCTL_GET_REPARSE_POINT;
use windows::Win32::System::IO::DeviceIoControl;

fn open_entry(path: &Path) -> Result<OwnedHandle> {
    unsafe {
        let handle = CreateFileW(
            &HSTRING::from(path),
            GENERIC_READ.0,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OPEN_REPARSE_POINT,
            HANDLE::default(),
        )
        .map_err(|e| CimError::from_io(format!("open {}", path.display()), to_io_error(&e)))?;
        Ok(OwnedHandle(handle))
    }
}

fn query_info<T: Default>(
    handle: &OwnedHandle,
    class: windows::Win32::Storage::FileSystem::FILE_INFO_BY_HANDLE_CLASS,
    what: &str,
    path: &Path,
) -> Result<T> {
    let mut info = T::default();
    unsafe {
        GetFileInformationByHandleEx(
            handle.0,
            class,
            &mut info as *mut T as *mut c_void,
            std::mem::size_of::<T>() as u32,
        )
        .map_err(|e| CimError::io(format!("query {} of {}", what, path.display()), to_io_error(&e)))?;
    }
    Ok(info)
}

fn read_reparse_data(handle: &OwnedHandle, path: &Path, max_reparse: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; max_reparse];
    let mut returned = 0u32;
    unsafe {
        DeviceIoControl(
            handle.0,
            FSCTL_GET_REPARSE_POINT,
            None,
            0,
            Some(buffer.as_mut_ptr() as *mut c_void),
            buffer.len() as u32,
            Some(&mut returned),
            None,
        )
        .map_err(|e| {
            CimError::io(format!("read reparse data of {}", path.display()), to_io_error(&e))
        })?;
    }
    buffer.truncate(returned as usize);
    Ok(buffer)
}

fn read_security_descriptor(path: &Path) -> Result<Vec<u8>> {
    let wide = HSTRING::from(path);
    let info = (OWNER_SECURITY_INFORMATION
        | GROUP_SECURITY_INFORMATION
        | DACL_SECURITY_INFORMATION
        | SACL_SECURITY_INFORMATION
        | LABEL_SECURITY_INFORMATION)
        .0;

    let mut needed = 0u32;
    unsafe {
        // First call sizes the buffer.
        let _ = GetFileSecurityW(&wide, info, PSECURITY_DESCRIPTOR::default(), 0, &mut needed);
        let mut buffer = vec![0u8; needed as usize];
        let ok = GetFileSecurityW(
            &wide,
            info,
            PSECURITY_DESCRIPTOR(buffer.as_mut_ptr() as *mut c_void),
            buffer.len() as u32,
            &mut needed,
        );
        if !ok.as_bool() {
            return Err(CimError::io(
                format!("read security descriptor of {}", path.display()),
                to_io_error(&windows::core::Error::from_win32()),
            ));
        }
        Ok(buffer)
    }
}

/// Stream enumeration handle, closed with FindClose on drop
struct StreamSearch(HANDLE);

impl Drop for StreamSearch {
    fn drop(&mut self) {
        unsafe {
            let _ = FindClose(self.0);
        }
    }
}

fn list_streams(path: &Path) -> Result<Vec<RawStream>> {
    let wide = HSTRING::from(path);
    let mut data = WIN32_FIND_STREAM_DATA::default();
    let mut streams = Vec::new();

    unsafe {
        let find = match FindFirstStreamW(
            &wide,
            FindStreamInfoStandard,
            &mut data as *mut _ as *mut c_void,
            0,
        ) {
            Ok(find) => StreamSearch(find),
            Err(e) if super::win32_code(e.code().0) == Some(ERROR_HANDLE_EOF.0 as i32) => {
                return Ok(streams)
            }
            Err(e) => {
                return Err(CimError::io(
                    format!("enumerate streams of {}", path.display()),
                    to_io_error(&e),
                ))
            }
        };

        loop {
            let len = data.cStreamName.iter().position(|c| *c == 0).unwrap_or(data.cStreamName.len());
            streams.push(RawStream {
                raw_name: String::from_utf16_lossy(&data.cStreamName[..len]),
                size: data.StreamSize.max(0) as u64,
            });

            if let Err(e) = FindNextStreamW(find.0, &mut data as *mut _ as *mut c_void) {
                if super::win32_code(e.code().0) == Some(ERROR_HANDLE_EOF.0 as i32) {
                    break;
                }
                return Err(CimError::io(
                    format!("enumerate streams of {}", path.display()),
                    to_io_error(&e),
                ));
            }
        }
    }

    Ok(streams)
}

/// Query everything about `path` without following a reparse point.
pub fn query_entry(path: &Path, max_reparse: usize) -> Result<RawEntry> {
    let handle = open_entry(path)?;

    let id: FILE_ID_INFO = query_info(&handle, FileIdInfo, "file id", path)?;
    let basic: FILE_BASIC_INFO = query_info(&handle, FileBasicInfo, "basic info", path)?;
    let attributes = FileAttributes(basic.FileAttributes);

    let reparse_data = if attributes.is_reparse_point() {
        Some(read_reparse_data(&handle, path, max_reparse)?)
    } else {
        None
    };

    let standard: FILE_STANDARD_INFO = query_info(&handle, FileStandardInfo, "size", path)?;

    Ok(RawEntry {
        attributes,
        creation_time: Timestamp(basic.CreationTime),
        last_write_time: Timestamp(basic.LastWriteTime),
        last_access_time: Timestamp(basic.LastAccessTime),
        change_time: Timestamp(basic.ChangeTime),
        end_of_file: standard.EndOfFile.max(0) as u64,
        file_id: FileId128(id.FileId.Identifier),
        reparse_data,
        security_descriptor: read_security_descriptor(path)?,
        streams: list_streams(path)?,
    })
}

/// Flags applied to every open so symlinks are read, not followed.
const OPEN_FLAGS: u32 = FILE_FLAG_BACKUP_SEMANTICS.0 | FILE_FLAG_OPEN_REPARSE_POINT.0;

pub fn open_default_stream(path: &Path) -> Result<Box<dyn Read>> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(OPEN_FLAGS)
        .open(path)
        .map_err(|e| CimError::from_io(format!("open {}", path.display()), e))?;
    Ok(Box::new(file))
}

pub fn open_alternate_stream(base: &Path, stream: &StreamName) -> Result<Box<dyn Read>> {
    let qualified = stream.qualify(base);
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(OPEN_FLAGS)
        .open(&qualified)
        .map_err(|e| CimError::from_io(format!("open stream {}", qualified.display()), e))?;
    Ok(Box::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_streams_repeats_cleanly() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"data").expect("Failed to write file");
        std::fs::write(dir.path().join("file.txt:extra"), b"xy").expect("Failed to write stream");

        // Each pass opens and closes its own search handle.
        for _ in 0..64 {
            let streams = list_streams(&file).expect("Failed to list streams");
            assert_eq!(streams.len(), 2);
            assert!(streams.iter().any(|s| s.raw_name == ":extra:$DATA" && s.size == 2));
        }
    }
}
