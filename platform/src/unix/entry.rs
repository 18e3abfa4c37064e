// Unix entry query
// Maps POSIX metadata onto the Win32-shaped entry model:
// symlinks are reparse points carrying their target, `user.*` xattrs are
// alternate streams, (dev, ino) is the file id.

use super::{pack_descriptor, STREAM_XATTR_PREFIX};
use crate::raw::{RawEntry, RawStream};
use cim_core::{CimError, FileAttributes, FileId128, Result, StreamName, Timestamp};
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Query everything about `path` without following a final symlink.
pub fn query_entry(path: &Path, max_reparse: usize) -> Result<RawEntry> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| CimError::from_io(format!("open {}", path.display()), e))?;
    let file_type = meta.file_type();

    let mut attributes = 0u32;
    if file_type.is_dir() {
        attributes |= FileAttributes::DIRECTORY;
    } else if file_type.is_symlink() {
        attributes |= FileAttributes::REPARSE_POINT;
    } else {
        attributes |= FileAttributes::ARCHIVE;
        if meta.mode() & 0o222 == 0 {
            attributes |= FileAttributes::READONLY;
        }
    }

    let reparse_data = if file_type.is_symlink() {
        let target = fs::read_link(path)
            .map_err(|e| CimError::io(format!("read reparse data of {}", path.display()), e))?;
        let bytes = target.as_os_str().as_bytes().to_vec();
        if bytes.len() > max_reparse {
            return Err(CimError::io(
                format!("read reparse data of {}", path.display()),
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("reparse buffer of {} bytes exceeds {}", bytes.len(), max_reparse),
                ),
            ));
        }
        Some(bytes)
    } else {
        None
    };

    // The link itself has no default stream content; its data is the target.
    let end_of_file = if file_type.is_symlink() { 0 } else { meta.size() };

    let last_write_time = Timestamp::from_unix(meta.mtime(), meta.mtime_nsec());

    Ok(RawEntry {
        attributes: FileAttributes(attributes),
        // Birth time cannot be replayed on Unix, so the last write time stands in.
        creation_time: last_write_time,
        last_write_time,
        last_access_time: Timestamp::from_unix(meta.atime(), meta.atime_nsec()),
        change_time: Timestamp::from_unix(meta.ctime(), meta.ctime_nsec()),
        end_of_file,
        file_id: FileId128::from_parts(meta.dev(), meta.ino()),
        reparse_data,
        security_descriptor: pack_descriptor(meta.mode(), meta.uid(), meta.gid()),
        streams: list_streams(path, file_type.is_symlink())?,
    })
}

fn list_streams(path: &Path, is_symlink: bool) -> Result<Vec<RawStream>> {
    if is_symlink || !xattr::SUPPORTED_PLATFORM {
        return Ok(Vec::new());
    }

    let names = match xattr::list(path) {
        Ok(names) => names,
        Err(e) if e.raw_os_error() == Some(nix::libc::ENOTSUP) => return Ok(Vec::new()),
        Err(e) => {
            return Err(CimError::io(format!("enumerate streams of {}", path.display()), e))
        }
    };

    let mut streams = Vec::new();
    for attr in names {
        let Some(name) = attr.to_str().and_then(|a| a.strip_prefix(STREAM_XATTR_PREFIX)) else {
            continue;
        };
        let size = xattr::get(path, &attr)
            .map_err(|e| CimError::io(format!("read stream {} of {}", name, path.display()), e))?
            .map(|value| value.len() as u64)
            .unwrap_or(0);
        streams.push(RawStream {
            raw_name: format!(":{}:$DATA", name),
            size,
        });
    }
    streams.sort_by(|a, b| a.raw_name.cmp(&b.raw_name));
    Ok(streams)
}

/// Open the default data stream. Anything but a regular file (symlinks,
/// fifos, sockets, device nodes) reads as empty and is never opened.
pub fn open_default_stream(path: &Path) -> Result<Box<dyn Read>> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| CimError::from_io(format!("open {}", path.display()), e))?;
    if !meta.file_type().is_file() {
        return Ok(Box::new(io::empty()));
    }
    let file = File::open(path).map_err(|e| CimError::from_io(format!("open {}", path.display()), e))?;
    Ok(Box::new(file))
}

pub fn open_alternate_stream(base: &Path, stream: &StreamName) -> Result<Box<dyn Read>> {
    let attr = format!("{}{}", STREAM_XATTR_PREFIX, stream.name());
    let value = xattr::get(base, &attr)
        .map_err(|e| CimError::from_io(format!("open stream {}", stream.qualify(base).display()), e))?
        .ok_or_else(|| CimError::NotFound(stream.qualify(base).display().to_string()))?;
    Ok(Box::new(Cursor::new(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_regular_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("file.txt");
        fs::write(&path, b"hello").unwrap();

        let entry = query_entry(&path, 16 * 1024).expect("Failed to query entry");
        assert!(entry.attributes.contains(FileAttributes::ARCHIVE));
        assert!(!entry.attributes.is_directory());
        assert_eq!(entry.end_of_file, 5);
        assert!(entry.reparse_data.is_none());
        assert_eq!(entry.creation_time, entry.last_write_time);
    }

    #[test]
    fn test_symlink_is_reparse_point() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let link = dir.path().join("link");
        symlink("target.txt", &link).unwrap();

        let entry = query_entry(&link, 16 * 1024).expect("Failed to query entry");
        assert!(entry.attributes.is_reparse_point());
        assert_eq!(entry.reparse_data.as_deref(), Some(&b"target.txt"[..]));
        assert_eq!(entry.end_of_file, 0);

        let mut content = Vec::new();
        open_default_stream(&link).unwrap().read_to_end(&mut content).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn test_oversized_reparse_is_io_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let link = dir.path().join("link");
        symlink("a-rather-long-target-name", &link).unwrap();

        let err = query_entry(&link, 4).unwrap_err();
        assert!(matches!(err, CimError::Io { .. }));
    }

    #[test]
    fn test_missing_path() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = query_entry(&dir.path().join("nope"), 16 * 1024).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_hardlinks_share_file_id() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        fs::write(&a, b"x").unwrap();
        fs::hard_link(&a, &b).unwrap();
        fs::write(&c, b"x").unwrap();

        let id_a = query_entry(&a, 16).unwrap().file_id;
        assert_eq!(id_a, query_entry(&b, 16).unwrap().file_id);
        assert_ne!(id_a, query_entry(&c, 16).unwrap().file_id);
    }

    #[test]
    fn test_fifo_reads_as_empty_without_blocking() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let fifo = dir.path().join("pipe");
        nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::S_IRWXU).expect("Failed to create fifo");

        let entry = query_entry(&fifo, 16).expect("Failed to query fifo");
        assert!(!entry.attributes.is_directory());
        assert_eq!(entry.end_of_file, 0);

        let mut content = Vec::new();
        open_default_stream(&fifo).unwrap().read_to_end(&mut content).unwrap();
        assert!(content.is_empty());
    }
}
