use super::to_io_error;
use cim_core::{CimError, Result};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::{GetLastError, ERROR_NOT_ALL_ASSIGNED, HANDLE, LUID};
use windows::Win32::Security::{
    AdjustTokenPrivileges, GetTokenInformation, LookupPrivilegeValueW, TokenElevation,
    LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_ELEVATION,
    TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use super::OwnedHandle;

/// Privileges needed to read and write full security descriptors
/// (owner, group, DACL, SACL, label) and to open any source file.
const IMAGE_PRIVILEGES: &[&str] = &["SeBackupPrivilege", "SeRestorePrivilege", "SeSecurityPrivilege"];

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    unsafe {
        let mut token_handle = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }
        let token = OwnedHandle(token_handle);

        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut return_length = 0u32;

        let result = GetTokenInformation(
            token.0,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );

        result.is_ok() && elevation.TokenIsElevated != 0
    }
}

/// Enable the backup, restore and security privileges on the process token.
///
/// Must run before any image operation that reads or writes security descriptors.
pub fn enable_image_privileges() -> Result<()> {
    if !is_elevated() {
        log::warn!("Process is not elevated; enabling image privileges will likely fail");
    }
    for name in IMAGE_PRIVILEGES {
        enable_privilege(name)?;
        log::debug!("Enabled {}", name);
    }
    Ok(())
}

fn enable_privilege(name: &str) -> Result<()> {
    unsafe {
        let mut token_handle = HANDLE::default();
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token_handle,
        )
        .map_err(|e| CimError::from_io("open process token", to_io_error(&e)))?;
        let token = OwnedHandle(token_handle);

        let mut luid = LUID::default();
        LookupPrivilegeValueW(PCWSTR::null(), &HSTRING::from(name), &mut luid)
            .map_err(|e| CimError::from_io(format!("look up {}", name), to_io_error(&e)))?;

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };

        AdjustTokenPrivileges(token.0, false, Some(&privileges), 0, None, None)
            .map_err(|e| CimError::from_io(format!("enable {}", name), to_io_error(&e)))?;

        // AdjustTokenPrivileges succeeds even when the privilege is not held.
        if GetLastError() == ERROR_NOT_ALL_ASSIGNED {
            return Err(CimError::AccessDenied(format!("{} is not held by this account", name)));
        }
    }
    Ok(())
}
