use cim_core::{FileAttributes, FileId128, Timestamp};

/// A stream as enumeration reports it, before name parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStream {
    /// `:name:$TYPE` form
    pub raw_name: String,
    pub size: u64,
}

/// Everything the host reports about one entry, unnormalized
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub attributes: FileAttributes,
    pub creation_time: Timestamp,
    pub last_write_time: Timestamp,
    pub last_access_time: Timestamp,
    pub change_time: Timestamp,
    /// End-of-file position as the volume reports it, directories included
    pub end_of_file: u64,
    pub file_id: FileId128,
    /// Read only when the reparse-point bit is set
    pub reparse_data: Option<Vec<u8>>,
    pub security_descriptor: Vec<u8>,
    pub streams: Vec<RawStream>,
}
