// MetadataExtractor
// Turns what the host reports about a path into a SourceEntryMetadata record

use cim_core::{
    AlternateStream, CimError, PipelineConfig, Result, SourceEntryMetadata, StreamName,
};
use cim_platform::RawEntry;
use std::io::{self, Read};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    max_reparse_size: usize,
}

impl MetadataExtractor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_reparse_size: config.max_reparse_size,
        }
    }

    /// Snapshot `path` without following it if it is a reparse point.
    ///
    /// Open failures surface as `NotFound` / `AccessDenied` / `Io`; any later
    /// query failure is `Io`.
    pub fn extract(&self, path: &Path) -> Result<SourceEntryMetadata> {
        let raw = cim_platform::query_entry(path, self.max_reparse_size)?;
        normalize(path, raw)
    }

    /// Reader over the default (unnamed) data stream of `path`.
    pub fn open_content(&self, path: &Path) -> Result<Box<dyn Read>> {
        cim_platform::open_default_stream(path)
    }

    pub fn open_stream(&self, stream: &AlternateStream) -> Result<Box<dyn Read>> {
        cim_platform::open_alternate_stream(&stream.base_path, &stream.name)
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

/// Enforce the record invariants on a raw host report.
pub(crate) fn normalize(path: &Path, raw: RawEntry) -> Result<SourceEntryMetadata> {
    let is_directory = raw.attributes.is_directory();

    let reparse_data = match (raw.attributes.is_reparse_point(), raw.reparse_data) {
        (true, Some(data)) => Some(data),
        (true, None) => {
            return Err(CimError::io(
                format!("read reparse data of {}", path.display()),
                io::Error::new(io::ErrorKind::InvalidData, "reparse point without reparse data"),
            ))
        }
        (false, _) => None,
    };

    let mut alternate_streams = Vec::new();
    for stream in &raw.streams {
        let name = StreamName::parse(&stream.raw_name)?;
        if name.is_default_stream() {
            continue;
        }
        if name.kind() != cim_core::stream_name::DATA_STREAM_TYPE {
            log::debug!("Skipping non-data stream {} on {}", name, path.display());
            continue;
        }
        alternate_streams.push(AlternateStream {
            name,
            base_path: path.to_path_buf(),
            size: stream.size,
        });
    }

    Ok(SourceEntryMetadata {
        attributes: raw.attributes,
        creation_time: raw.creation_time,
        last_write_time: raw.last_write_time,
        last_access_time: raw.last_access_time,
        change_time: raw.change_time,
        file_size: if is_directory { 0 } else { raw.end_of_file },
        reparse_data,
        security_descriptor: raw.security_descriptor,
        alternate_streams,
        file_id: raw.file_id,
    })
}
