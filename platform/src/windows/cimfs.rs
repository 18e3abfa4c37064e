// CimFs binding
// Wraps cimfs.dll image, stream and mount handles in owned types

use super::win32_code;
use cim_core::{
    CimError, ImageEngine, ImageIdentity, ImageTransaction, RelativePath, Result,
    SourceEntryMetadata, StreamName, StreamSink, Timestamp, VolumeId,
};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use windows::core::{GUID, HRESULT, HSTRING, PCWSTR};
use windows::Win32::Foundation::FILETIME;

// cimfs.dll handles and entry points, as declared in cimfs.h
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ImageHandle(isize);

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct StreamHandle(isize);

const CIM_MOUNT_IMAGE_NONE: u32 = 0;

#[repr(C)]
#[allow(non_snake_case)]
struct CIMFS_FILE_METADATA {
    Attributes: u32,
    FileSize: i64,
    CreationTime: FILETIME,
    LastWriteTime: FILETIME,
    ChangeTime: FILETIME,
    LastAccessTime: FILETIME,
    SecurityDescriptorBuffer: *const c_void,
    SecurityDescriptorSize: u32,
    ReparseDataBuffer: *const c_void,
    ReparseDataSize: u32,
    EaBuffer: *const c_void,
    EaBufferSize: u32,
}

#[link(name = "cimfs")]
extern "system" {
    fn CimCreateImage(
        image_containing_path: PCWSTR,
        existing_image_name: PCWSTR,
        new_image_name: PCWSTR,
        image_handle: *mut ImageHandle,
    ) -> HRESULT;
    fn CimCloseImage(image_handle: ImageHandle);
    fn CimCommitImage(image_handle: ImageHandle) -> HRESULT;
    fn CimCreateFile(
        image_handle: ImageHandle,
        image_relative_path: PCWSTR,
        file_metadata: *const CIMFS_FILE_METADATA,
        stream_handle: *mut StreamHandle,
    ) -> HRESULT;
    fn CimWriteStream(stream_handle: StreamHandle, buffer: *const c_void, buffer_size: u32) -> HRESULT;
    fn CimCloseStream(stream_handle: StreamHandle);
    fn CimCreateAlternateStream(
        image_handle: ImageHandle,
        image_relative_path: PCWSTR,
        size: u64,
        stream_handle: *mut StreamHandle,
    ) -> HRESULT;
    fn CimCreateHardLink(
        image_handle: ImageHandle,
        image_relative_path: PCWSTR,
        existing_image_relative_path: PCWSTR,
    ) -> HRESULT;
    fn CimDeletePath(image_handle: ImageHandle, image_relative_path: PCWSTR) -> HRESULT;
    fn CimMountImage(
        image_containing_path: PCWSTR,
        image_name: PCWSTR,
        mount_image_flags: u32,
        volume_id: *const GUID,
    ) -> HRESULT;
    fn CimDismountImage(volume_id: *const GUID) -> HRESULT;
}

fn wide(s: &HSTRING) -> PCWSTR {
    PCWSTR(s.as_ptr())
}

const ERROR_FILE_NOT_FOUND: i32 = 2;
const ERROR_PATH_NOT_FOUND: i32 = 3;
const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_FILE_EXISTS: i32 = 80;
const ERROR_ALREADY_EXISTS: i32 = 183;

fn map_error(context: String, err: windows::core::Error) -> CimError {
    match win32_code(err.code().0) {
        Some(ERROR_FILE_EXISTS) | Some(ERROR_ALREADY_EXISTS) => CimError::AlreadyExists(context),
        Some(ERROR_ACCESS_DENIED) => CimError::AccessDenied(context),
        Some(ERROR_FILE_NOT_FOUND) | Some(ERROR_PATH_NOT_FOUND) => CimError::NotFound(context),
        _ => CimError::Engine {
            context,
            code: err.code().0,
        },
    }
}

fn filetime(ts: Timestamp) -> FILETIME {
    let ticks = ts.0 as u64;
    FILETIME {
        dwLowDateTime: ticks as u32,
        dwHighDateTime: (ticks >> 32) as u32,
    }
}

fn volume_guid(volume: &VolumeId) -> GUID {
    GUID::from_u128(volume.as_uuid().as_u128())
}

/// Engine backed by the Windows CimFs API
#[derive(Debug, Default, Clone, Copy)]
pub struct CimFsEngine;

impl CimFsEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Open image transaction; closed (abandoned if uncommitted) on drop
pub struct CimFsImage {
    handle: ImageHandle,
    identity: ImageIdentity,
}

impl Drop for CimFsImage {
    fn drop(&mut self) {
        unsafe { CimCloseImage(self.handle) };
    }
}

struct CimFsStream {
    handle: StreamHandle,
    context: String,
    closed: bool,
}

impl StreamSink for CimFsStream {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        unsafe {
            CimWriteStream(self.handle, bytes.as_ptr() as *const c_void, bytes.len() as u32)
                .ok()
                .map_err(|e| map_error(format!("write {}", self.context), e))
        }
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.closed = true;
        unsafe { CimCloseStream(self.handle) };
        Ok(())
    }
}

impl Drop for CimFsStream {
    fn drop(&mut self) {
        if !self.closed {
            unsafe { CimCloseStream(self.handle) };
        }
    }
}

impl ImageTransaction for CimFsImage {
    fn create_file(
        &mut self,
        path: &RelativePath,
        metadata: &SourceEntryMetadata,
    ) -> Result<Box<dyn StreamSink + '_>> {
        let (reparse_ptr, reparse_len) = match &metadata.reparse_data {
            Some(data) => (data.as_ptr() as *const c_void, data.len() as u32),
            None => (std::ptr::null(), 0),
        };
        let native = CIMFS_FILE_METADATA {
            Attributes: metadata.attributes.bits(),
            FileSize: metadata.file_size as i64,
            CreationTime: filetime(metadata.creation_time),
            LastWriteTime: filetime(metadata.last_write_time),
            ChangeTime: filetime(metadata.change_time),
            LastAccessTime: filetime(metadata.last_access_time),
            SecurityDescriptorBuffer: metadata.security_descriptor.as_ptr() as *const c_void,
            SecurityDescriptorSize: metadata.security_descriptor.len() as u32,
            ReparseDataBuffer: reparse_ptr,
            ReparseDataSize: reparse_len,
            EaBuffer: std::ptr::null(),
            EaBufferSize: 0,
        };

        let target = HSTRING::from(path.to_engine_string());
        let mut stream = StreamHandle::default();
        unsafe {
            CimCreateFile(self.handle, wide(&target), &native, &mut stream)
                .ok()
                .map_err(|e| map_error(format!("create {}", path), e))?;
        }

        Ok(Box::new(CimFsStream {
            handle: stream,
            context: path.to_string(),
            closed: false,
        }))
    }

    fn create_alternate_stream(
        &mut self,
        path: &RelativePath,
        stream: &StreamName,
        declared_size: u64,
    ) -> Result<Box<dyn StreamSink + '_>> {
        let qualified = format!("{}:{}", path.to_engine_string(), stream.name());
        let target = HSTRING::from(qualified.as_str());
        let mut handle = StreamHandle::default();
        unsafe {
            CimCreateAlternateStream(self.handle, wide(&target), declared_size, &mut handle)
                .ok()
                .map_err(|e| map_error(format!("create stream {}", qualified), e))?;
        }
        Ok(Box::new(CimFsStream {
            handle,
            context: qualified,
            closed: false,
        }))
    }

    fn create_hardlink(&mut self, new_path: &RelativePath, existing: &RelativePath) -> Result<()> {
        let new_wide = HSTRING::from(new_path.to_engine_string());
        let existing_wide = HSTRING::from(existing.to_engine_string());
        unsafe {
            CimCreateHardLink(self.handle, wide(&new_wide), wide(&existing_wide))
                .ok()
                .map_err(|e| map_error(format!("link {} -> {}", new_path, existing), e))
        }
    }

    fn delete_path(&mut self, path: &RelativePath) -> Result<()> {
        let target = HSTRING::from(path.to_engine_string());
        unsafe {
            CimDeletePath(self.handle, wide(&target))
                .ok()
                .map_err(|e| map_error(format!("delete {}", path), e))
        }
    }

    fn commit(self) -> Result<ImageIdentity> {
        unsafe {
            CimCommitImage(self.handle)
                .ok()
                .map_err(|e| map_error(format!("commit {}", self.identity), e))?;
        }
        Ok(self.identity.clone())
    }
}

impl ImageEngine for CimFsEngine {
    type Transaction<'e> = CimFsImage where Self: 'e;

    fn create_image(
        &self,
        container: &Path,
        base: Option<&ImageIdentity>,
        name: &str,
    ) -> Result<CimFsImage> {
        let identity = ImageIdentity::new(container, name)?;
        std::fs::create_dir_all(container)
            .map_err(|e| CimError::from_io(format!("create container {}", container.display()), e))?;

        let container_wide = HSTRING::from(container);
        let base_name = base.map(|b| HSTRING::from(b.image_name()));
        let name_wide = HSTRING::from(name);
        let mut handle = ImageHandle::default();
        unsafe {
            CimCreateImage(
                wide(&container_wide),
                base_name.as_ref().map(wide).unwrap_or(PCWSTR::null()),
                wide(&name_wide),
                &mut handle,
            )
            .ok()
            .map_err(|e| map_error(format!("create image {}", identity), e))?;
        }

        Ok(CimFsImage { handle, identity })
    }

    fn mount_image(&self, identity: &ImageIdentity, volume: &VolumeId) -> Result<()> {
        let guid = volume_guid(volume);
        let container = HSTRING::from(identity.container_path());
        let name = HSTRING::from(identity.image_name());
        unsafe {
            CimMountImage(wide(&container), wide(&name), CIM_MOUNT_IMAGE_NONE, &guid)
                .ok()
                .map_err(|e| map_error(format!("mount {}", identity), e))
        }
    }

    fn dismount_image(&self, volume: &VolumeId) -> Result<()> {
        let guid = volume_guid(volume);
        unsafe { CimDismountImage(&guid).ok().map_err(|e| map_error(format!("dismount {}", volume), e)) }
    }

    fn volume_root(&self, volume: &VolumeId) -> PathBuf {
        PathBuf::from(format!("\\\\?\\Volume{}\\", volume))
    }
}
