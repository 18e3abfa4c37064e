use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{CimError, Result};

/// A committed image: (container path, image name). Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageIdentity {
    container_path: PathBuf,
    image_name: String,
}

impl ImageIdentity {
    pub fn new(container_path: impl Into<PathBuf>, image_name: impl Into<String>) -> Result<Self> {
        let image_name = image_name.into();
        validate_image_name(&image_name)?;
        Ok(Self {
            container_path: container_path.into(),
            image_name,
        })
    }

    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// Same container, different image name.
    pub fn sibling(&self, image_name: &str) -> Result<Self> {
        Self::new(self.container_path.clone(), image_name)
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.container_path.display(), self.image_name)
    }
}

/// Image names live directly in the container; they are file names, not paths.
pub fn validate_image_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CimError::InvalidInput("Image name must not be empty".to_string()));
    }
    if name.contains(['/', '\\', ':']) || name == "." || name == ".." {
        return Err(CimError::InvalidInput(format!(
            "Image name must be a plain file name: '{}'",
            name
        )));
    }
    Ok(())
}

/// Volume identifier for one mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeId(Uuid);

impl VolumeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    /// Braced upper-case form, as volume GUID paths spell it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated().to_string().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_validation() {
        assert!(ImageIdentity::new("C:\\img", "a.cim").is_ok());
        assert!(ImageIdentity::new("C:\\img", "").is_err());
        assert!(ImageIdentity::new("C:\\img", "sub\\a.cim").is_err());
        assert!(ImageIdentity::new("/img", "..").is_err());
    }

    #[test]
    fn test_sibling_keeps_container() {
        let base = ImageIdentity::new("/img", "a.cim").unwrap();
        let fork = base.sibling("a_fork.cim").unwrap();
        assert_eq!(fork.container_path(), base.container_path());
        assert_eq!(fork.image_name(), "a_fork.cim");
    }

    #[test]
    fn test_volume_ids_are_fresh() {
        let a = VolumeId::generate();
        let b = VolumeId::generate();
        assert_ne!(a, b);
        let text = a.to_string();
        assert!(text.starts_with('{') && text.ends_with('}'));
        assert_eq!(text.len(), 38);
    }
}
