// Content-addressed object store shared by every image in a container
// Objects are staged under tmp/ and renamed to their sha256 once complete.

use cim_core::{CimError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const OBJECTS_DIR: &str = "objects";

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn open(container: &Path) -> Result<Self> {
        let root = container.join(OBJECTS_DIR);
        fs::create_dir_all(root.join("tmp"))
            .map_err(|e| CimError::from_io(format!("create object store {}", root.display()), e))?;
        Ok(Self { root })
    }

    pub fn object_path(&self, digest: &str) -> PathBuf {
        self.root.join(digest)
    }

    pub fn stage(&self) -> Result<StagedObject> {
        let path = self
            .root
            .join("tmp")
            .join(format!("stage-{}", uuid::Uuid::new_v4()));
        let file = File::create(&path)
            .map_err(|e| CimError::io(format!("create staging object {}", path.display()), e))?;
        Ok(StagedObject {
            file,
            path: Some(path),
            hasher: Sha256::new(),
            len: 0,
        })
    }

    /// Move a staged object into place. Returns `None` for empty objects.
    pub fn commit(&self, mut staged: StagedObject) -> Result<Option<String>> {
        let Some(tmp) = staged.path.take() else {
            return Ok(None);
        };
        staged
            .file
            .sync_all()
            .map_err(|e| CimError::io(format!("flush {}", tmp.display()), e))?;

        if staged.len == 0 {
            let _ = fs::remove_file(&tmp);
            return Ok(None);
        }

        let digest = format!("{:x}", std::mem::take(&mut staged.hasher).finalize());
        let dest = self.object_path(&digest);
        if dest.exists() {
            // Same bytes already stored by this or another image.
            let _ = fs::remove_file(&tmp);
        } else {
            fs::rename(&tmp, &dest).map_err(|e| {
                CimError::io(format!("store object {}", dest.display()), e)
            })?;
        }
        Ok(Some(digest))
    }

    pub fn read(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.object_path(digest);
        fs::read(&path).map_err(|e| CimError::io(format!("read object {}", path.display()), e))
    }

    /// Remove objects no listed digest refers to. Returns how many were removed.
    pub fn retain(&self, live: &std::collections::BTreeSet<String>) -> Result<usize> {
        let mut removed = 0;
        let entries = fs::read_dir(&self.root)
            .map_err(|e| CimError::io(format!("list {}", self.root.display()), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CimError::io(format!("list {}", self.root.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == "tmp" || live.contains(name) {
                continue;
            }
            fs::remove_file(entry.path())
                .map_err(|e| CimError::io(format!("remove object {}", name), e))?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// An object being written; deleted on drop unless committed
pub struct StagedObject {
    file: File,
    path: Option<PathBuf>,
    hasher: Sha256,
    len: u64,
}

impl StagedObject {
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .map_err(|e| CimError::io("write staging object", e))?;
        self.hasher.update(bytes);
        self.len += bytes.len() as u64;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for StagedObject {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = fs::remove_file(path);
        }
    }
}
