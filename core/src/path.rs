// Image-relative paths
// Entries inside an image are addressed relative to the image root

use crate::{CimError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// A validated path relative to the image root, stored as components
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativePath {
    components: Vec<String>,
}

impl RelativePath {
    /// Accepts `/` or `\` separators. Rejects absolute, drive-qualified,
    /// empty, `.` and `..` paths.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with(['/', '\\']) || raw.get(1..2) == Some(":") {
            return Err(CimError::InvalidInput(format!(
                "Image path must be relative: '{}'",
                raw
            )));
        }

        let mut components = Vec::new();
        for part in raw.split(['/', '\\']) {
            match part {
                "" => continue,
                "." | ".." => {
                    return Err(CimError::InvalidInput(format!(
                        "Image path must not contain '{}': '{}'",
                        part, raw
                    )))
                }
                _ => components.push(part.to_string()),
            }
        }

        if components.is_empty() {
            return Err(CimError::InvalidInput("Image path must not be empty".to_string()));
        }

        Ok(Self { components })
    }

    /// Build from a host path relative to some source root.
    pub fn from_host(path: &Path) -> Result<Self> {
        let raw = path.to_str().ok_or_else(|| {
            CimError::InvalidInput(format!("Path is not valid UTF-8: {}", path.display()))
        })?;
        Self::parse(raw)
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn file_name(&self) -> &str {
        // parse() guarantees at least one component
        self.components.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> Option<RelativePath> {
        if self.components.len() < 2 {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    pub fn starts_with(&self, prefix: &RelativePath) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// Native form handed to the image engine (`a\b\c`).
    pub fn to_engine_string(&self) -> String {
        self.components.join("\\")
    }

    /// Resolve against a mounted volume root or any host directory.
    pub fn to_host_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in &self.components {
            path.push(component);
        }
        path
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}
