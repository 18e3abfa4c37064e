use crate::{CimError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TRANSFER_CHUNK: usize = 64 * 1024;
pub const DEFAULT_COMPARE_CHUNK: usize = 4 * 1024;
pub const DEFAULT_MAX_REPARSE: usize = 16 * 1024;

/// Tunables shared by the build, extend, fork and verify operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunk size used when copying streams into an image
    pub transfer_chunk_size: usize,
    /// Chunk size used when comparing content during verification
    pub compare_chunk_size: usize,
    /// Upper bound on a reparse buffer read from the source
    pub max_reparse_size: usize,
    /// Remove a container that a failed build created
    pub cleanup_on_failure: bool,
    /// Turn verification mismatches into an error
    pub mismatches_fatal: bool,
    /// Compare alternate streams in addition to the main content
    pub compare_streams: bool,
    /// Where the portable engine materializes mounted volumes
    pub mount_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transfer_chunk_size: DEFAULT_TRANSFER_CHUNK,
            compare_chunk_size: DEFAULT_COMPARE_CHUNK,
            max_reparse_size: DEFAULT_MAX_REPARSE,
            cleanup_on_failure: true,
            mismatches_fatal: false,
            compare_streams: true,
            mount_root: None,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CimError::from_io(format!("read config {}", path.display()), e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer_chunk_size == 0 {
            return Err(CimError::InvalidInput("transfer_chunk_size must be non-zero".to_string()));
        }
        if self.compare_chunk_size == 0 {
            return Err(CimError::InvalidInput("compare_chunk_size must be non-zero".to_string()));
        }
        if self.max_reparse_size == 0 {
            return Err(CimError::InvalidInput("max_reparse_size must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn mount_root(&self) -> PathBuf {
        self.mount_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cim-volumes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.transfer_chunk_size, 64 * 1024);
        assert_eq!(config.compare_chunk_size, 4 * 1024);
        assert_eq!(config.max_reparse_size, 16 * 1024);
        assert!(!config.mismatches_fatal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        write!(file, r#"{{ "mismatches_fatal": true, "compare_chunk_size": 512 }}"#).unwrap();

        let config = PipelineConfig::load(file.path()).expect("Failed to load config");
        assert!(config.mismatches_fatal);
        assert_eq!(config.compare_chunk_size, 512);
        assert_eq!(config.transfer_chunk_size, DEFAULT_TRANSFER_CHUNK);
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        write!(file, r#"{{ "transfer_chunk_size": 0 }}"#).unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, CimError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_config_is_not_found() {
        let err = PipelineConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.is_not_found());
    }
}
