pub mod cimfs;
pub mod elevation;
pub mod entry;
pub mod materialize;

use std::io;

/// Recover a Win32 error code from an HRESULT carrying FACILITY_WIN32.
pub(crate) fn win32_code(hresult: i32) -> Option<i32> {
    let value = hresult as u32;
    if value & 0xFFFF_0000 == 0x8007_0000 {
        Some((value & 0xFFFF) as i32)
    } else {
        None
    }
}

pub(crate) fn to_io_error(err: &windows::core::Error) -> io::Error {
    match win32_code(err.code().0) {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::new(io::ErrorKind::Other, err.message().to_string()),
    }
}

/// RAII wrapper so every opened handle has one release path
pub(crate) struct OwnedHandle(pub windows::Win32::Foundation::HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = windows::Win32::Foundation::CloseHandle(self.0);
        }
    }
}
