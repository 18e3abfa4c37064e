// Source entry metadata model
// Everything the image engine needs to recreate one filesystem entry

use crate::StreamName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Win32-style file attribute bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileAttributes(pub u32);

impl FileAttributes {
    pub const READONLY: u32 = 0x0000_0001;
    pub const HIDDEN: u32 = 0x0000_0002;
    pub const SYSTEM: u32 = 0x0000_0004;
    pub const DIRECTORY: u32 = 0x0000_0010;
    pub const ARCHIVE: u32 = 0x0000_0020;
    pub const NORMAL: u32 = 0x0000_0080;
    pub const SPARSE_FILE: u32 = 0x0000_0200;
    pub const REPARSE_POINT: u32 = 0x0000_0400;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    pub fn is_reparse_point(self) -> bool {
        self.contains(Self::REPARSE_POINT)
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// FILE_ID_128: volume-scoped identity of the underlying file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileId128(pub [u8; 16]);

impl FileId128 {
    /// Pack a volume serial and a 64-bit file index, as Unix (dev, ino) pairs are.
    pub fn from_parts(volume: u64, index: u64) -> Self {
        let mut id = [0u8; 16];
        id[..8].copy_from_slice(&index.to_le_bytes());
        id[8..].copy_from_slice(&volume.to_le_bytes());
        Self(id)
    }
}

impl fmt::Display for FileId128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Seconds between 1601-01-01 and 1970-01-01.
const EPOCH_DIFFERENCE_SECS: u64 = 11_644_473_600;
const TICKS_PER_SECOND: u64 = 10_000_000;

/// 64-bit timestamp in 100ns ticks since 1601-01-01 UTC (FILETIME units)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_system_time(time: SystemTime) -> Self {
        let ticks = match time.duration_since(UNIX_EPOCH) {
            Ok(since) => {
                EPOCH_DIFFERENCE_SECS as i128 * TICKS_PER_SECOND as i128
                    + (since.as_nanos() / 100) as i128
            }
            Err(before) => {
                let before = before.duration();
                EPOCH_DIFFERENCE_SECS as i128 * TICKS_PER_SECOND as i128
                    - before.as_nanos().div_ceil(100) as i128
            }
        };
        Self(ticks.clamp(0, i64::MAX as i128) as i64)
    }

    /// Build from a Unix (seconds, nanoseconds) pair.
    pub fn from_unix(secs: i64, nanos: i64) -> Self {
        let ticks = (secs as i128 + EPOCH_DIFFERENCE_SECS as i128) * TICKS_PER_SECOND as i128
            + (nanos as i128 / 100);
        Self(ticks.clamp(0, i64::MAX as i128) as i64)
    }

    /// Split into Unix (seconds, nanoseconds); nanoseconds are always non-negative.
    pub fn to_unix(self) -> (i64, i64) {
        let rel = self.0 as i128 - EPOCH_DIFFERENCE_SECS as i128 * TICKS_PER_SECOND as i128;
        let secs = rel.div_euclid(TICKS_PER_SECOND as i128);
        let nanos = rel.rem_euclid(TICKS_PER_SECOND as i128) * 100;
        (secs as i64, nanos as i64)
    }

    pub fn to_system_time(self) -> SystemTime {
        let (secs, nanos) = self.to_unix();
        if secs >= 0 {
            UNIX_EPOCH + Duration::new(secs as u64, nanos as u32)
        } else {
            UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(nanos as u64)
        }
    }
}

/// A named alternate data stream discovered on a source entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateStream {
    pub name: StreamName,
    /// Entry the stream belongs to
    pub base_path: PathBuf,
    /// Stream length as reported by the source volume
    pub size: u64,
}

impl AlternateStream {
    /// File-qualified `base:name` path
    pub fn qualified_path(&self) -> PathBuf {
        self.name.qualify(&self.base_path)
    }
}

/// Immutable snapshot of one source entry, consumed once by the builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntryMetadata {
    pub attributes: FileAttributes,
    pub creation_time: Timestamp,
    pub last_write_time: Timestamp,
    pub last_access_time: Timestamp,
    pub change_time: Timestamp,
    /// Always 0 for directories
    pub file_size: u64,
    /// Present iff the reparse-point attribute bit is set
    pub reparse_data: Option<Vec<u8>>,
    /// Self-relative security descriptor bytes
    pub security_descriptor: Vec<u8>,
    pub alternate_streams: Vec<AlternateStream>,
    /// Used for hardlink verification only
    pub file_id: FileId128,
}

impl SourceEntryMetadata {
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes.is_reparse_point()
    }
}
