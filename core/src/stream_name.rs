// Alternate data stream names
// Raw names come back from stream enumeration as `:name:$TYPE`

use crate::{CimError, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Type tag of the ordinary data stream
pub const DATA_STREAM_TYPE: &str = "$DATA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamName {
    name: String,
    kind: String,
}

impl StreamName {
    /// Parse a raw `:name:$TYPE` string.
    ///
    /// The leading `:` is skipped and the remainder is split at its first `:`.
    /// A missing type is treated as `$DATA`.
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw.strip_prefix(':').unwrap_or(raw);
        let (name, kind) = match rest.split_once(':') {
            Some((name, kind)) => (name, kind),
            None => (rest, DATA_STREAM_TYPE),
        };

        if kind.is_empty() || name.contains(['\\', '/']) {
            return Err(CimError::InvalidInput(format!("Malformed stream name '{}'", raw)));
        }

        Ok(Self {
            name: name.to_string(),
            kind: kind.to_string(),
        })
    }

    /// Build a named `$DATA` stream.
    pub fn data(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(CimError::InvalidInput("Stream name must not be empty".to_string()));
        }
        Self::parse(&format!(":{}:{}", name, DATA_STREAM_TYPE))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The unnamed default data stream (`::$DATA`) carries the main content.
    pub fn is_default_stream(&self) -> bool {
        self.name.is_empty() && self.kind == DATA_STREAM_TYPE
    }

    /// `base:name`, the form a stream is opened through.
    pub fn qualify(&self, base: &Path) -> PathBuf {
        let mut qualified = OsString::from(base.as_os_str());
        qualified.push(":");
        qualified.push(&self.name);
        PathBuf::from(qualified)
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}:{}", self.name, self.kind)
    }
}
