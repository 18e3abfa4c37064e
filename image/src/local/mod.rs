// Portable image engine
// A container is a directory: one JSON manifest per committed image plus a
// content-addressed object store shared by all of them. Forks copy only the
// manifest, so unchanged content is shared between base and fork.

pub mod manifest;
pub mod store;
pub mod volume;

use cim_core::{
    identity::validate_image_name, CimError, ImageEngine, ImageIdentity, ImageTransaction,
    PipelineConfig, RelativePath, Result, SourceEntryMetadata, StreamName, StreamSink, VolumeId,
};
use manifest::{Manifest, StreamRecord};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use store::{ObjectStore, StagedObject, OBJECTS_DIR};

pub struct LocalEngine {
    mount_root: PathBuf,
    mounts: Mutex<HashMap<VolumeId, PathBuf>>,
}

impl LocalEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_mount_root(config.mount_root())
    }

    pub fn with_mount_root(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            mounts: Mutex::new(HashMap::new()),
        }
    }

    fn manifest_path(container: &Path, name: &str) -> PathBuf {
        container.join(name)
    }

    /// Names of the committed images in `container`, sorted.
    pub fn list_images(&self, container: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(container)
            .map_err(|e| CimError::from_io(format!("list container {}", container.display()), e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CimError::io(format!("list {}", container.display()), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == OBJECTS_DIR || name.starts_with('.') {
                continue;
            }
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete objects that no committed image in `container` references.
    pub fn collect_garbage(&self, container: &Path) -> Result<usize> {
        let mut live = BTreeSet::new();
        for name in self.list_images(container)? {
            let manifest = Manifest::load(&Self::manifest_path(container, &name))?;
            live.extend(manifest.referenced_objects());
        }
        let removed = ObjectStore::open(container)?.retain(&live)?;
        log::info!("Removed {} unreferenced object(s) from {}", removed, container.display());
        Ok(removed)
    }

    fn lock_mounts(&self) -> std::sync::MutexGuard<'_, HashMap<VolumeId, PathBuf>> {
        self.mounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

/// Open transaction on a local container; dropping it writes nothing durable
pub struct LocalImage {
    identity: ImageIdentity,
    store: ObjectStore,
    manifest: Manifest,
    /// Closed streams whose bytes enter the store only on commit
    pending: Vec<(StreamTarget, StagedObject)>,
}

impl LocalImage {
    pub fn identity(&self) -> &ImageIdentity {
        &self.identity
    }

    /// Move closed streams into the object store and point their nodes at them.
    ///
    /// Streams on nodes deleted later in the transaction are discarded.
    fn store_pending(&mut self) -> Result<()> {
        for (target, staged) in std::mem::take(&mut self.pending) {
            let node_id = match &target {
                StreamTarget::Content { node } | StreamTarget::Alternate { node, .. } => *node,
            };
            if self.manifest.node_mut(node_id).is_none() {
                continue;
            }

            let object = self.store.commit(staged)?;
            let Some(node) = self.manifest.node_mut(node_id) else {
                continue;
            };
            match target {
                StreamTarget::Content { .. } => node.content = object,
                StreamTarget::Alternate { name, .. } => {
                    if let Some(record) = node.streams.get_mut(&name) {
                        record.object = object;
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
enum StreamTarget {
    Content { node: u64 },
    Alternate { node: u64, name: String },
}

struct LocalStream<'a> {
    image: &'a mut LocalImage,
    target: StreamTarget,
    staged: Option<StagedObject>,
}

impl LocalStream<'_> {
    /// Record the written length and hand the bytes to the transaction.
    fn close(&mut self) {
        let Some(staged) = self.staged.take() else {
            return;
        };
        let size = staged.len();

        match &self.target {
            StreamTarget::Content { node } => {
                if let Some(node) = self.image.manifest.node_mut(*node) {
                    if !node.is_directory() {
                        node.file_size = size;
                    }
                }
            }
            StreamTarget::Alternate { node, name } => {
                if let Some(node) = self.image.manifest.node_mut(*node) {
                    node.streams.insert(name.clone(), StreamRecord { object: None, size });
                }
            }
        }
        self.image.pending.push((self.target.clone(), staged));
    }
}

impl StreamSink for LocalStream<'_> {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        match self.staged.as_mut() {
            Some(staged) => staged.write(bytes),
            None => Err(CimError::InvalidInput("write to a closed stream".to_string())),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.close();
        Ok(())
    }
}

impl Drop for LocalStream<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl ImageTransaction for LocalImage {
    fn create_file(
        &mut self,
        path: &RelativePath,
        metadata: &SourceEntryMetadata,
    ) -> Result<Box<dyn StreamSink + '_>> {
        let node = self.manifest.insert_entry(path, metadata)?;
        let staged = self.store.stage()?;
        Ok(Box::new(LocalStream {
            image: self,
            target: StreamTarget::Content { node },
            staged: Some(staged),
        }))
    }

    fn create_alternate_stream(
        &mut self,
        path: &RelativePath,
        stream: &StreamName,
        declared_size: u64,
    ) -> Result<Box<dyn StreamSink + '_>> {
        let node = self
            .manifest
            .node_id(path)
            .ok_or_else(|| CimError::NotFound(format!("'{}' is not in the image", path)))?;
        log::debug!("Creating stream {}:{} ({} bytes)", path, stream.name(), declared_size);
        let staged = self.store.stage()?;
        Ok(Box::new(LocalStream {
            image: self,
            target: StreamTarget::Alternate {
                node,
                name: stream.name().to_string(),
            },
            staged: Some(staged),
        }))
    }

    fn create_hardlink(&mut self, new_path: &RelativePath, existing: &RelativePath) -> Result<()> {
        self.manifest.link(new_path, existing)
    }

    fn delete_path(&mut self, path: &RelativePath) -> Result<()> {
        let removed = self.manifest.delete(path)?;
        log::debug!("Deleted {} path(s) under {}", removed, path);
        Ok(())
    }

    fn commit(mut self) -> Result<ImageIdentity> {
        self.store_pending()?;

        let container = self.identity.container_path();
        let dest = LocalEngine::manifest_path(container, self.identity.image_name());
        let tmp = container.join(format!(".{}.{}.tmp", self.identity.image_name(), uuid::Uuid::new_v4()));

        let text = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| CimError::InvalidInput(format!("serialize manifest: {}", e)))?;
        fs::write(&tmp, text).map_err(|e| CimError::io(format!("write {}", tmp.display()), e))?;
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(CimError::io(format!("commit {}", dest.display()), e));
        }

        Ok(self.identity.clone())
    }
}

impl ImageEngine for LocalEngine {
    type Transaction<'e> = LocalImage where Self: 'e;

    fn create_image(
        &self,
        container: &Path,
        base: Option<&ImageIdentity>,
        name: &str,
    ) -> Result<LocalImage> {
        validate_image_name(name)?;
        if name == OBJECTS_DIR {
            return Err(CimError::InvalidInput(format!("'{}' is a reserved image name", name)));
        }
        let identity = ImageIdentity::new(container, name)?;
        let target = Self::manifest_path(container, name);

        let manifest = match base {
            Some(base) => {
                if base.container_path() != container {
                    return Err(CimError::InvalidInput(format!(
                        "Base {} is not in container {}",
                        base,
                        container.display()
                    )));
                }
                let base_path = Self::manifest_path(container, base.image_name());
                if !base_path.is_file() {
                    return Err(CimError::NotFound(format!("base image {}", base)));
                }
                if base.image_name() != name && target.exists() {
                    return Err(CimError::AlreadyExists(format!("image {}", identity)));
                }
                let mut manifest = Manifest::load(&base_path)?;
                if base.image_name() != name {
                    manifest.image_name = name.to_string();
                    manifest.base = Some(base.image_name().to_string());
                }
                manifest
            }
            None => {
                if target.exists() {
                    return Err(CimError::AlreadyExists(format!("image {}", identity)));
                }
                Manifest::new(name)
            }
        };

        fs::create_dir_all(container)
            .map_err(|e| CimError::from_io(format!("create container {}", container.display()), e))?;
        let store = ObjectStore::open(container)?;

        Ok(LocalImage {
            identity,
            store,
            manifest,
            pending: Vec::new(),
        })
    }

    fn mount_image(&self, identity: &ImageIdentity, volume: &VolumeId) -> Result<()> {
        let manifest = Manifest::load(&Self::manifest_path(identity.container_path(), identity.image_name()))?;
        let store = ObjectStore::open(identity.container_path())?;
        let root = self.volume_root(volume);

        if root.exists() {
            return Err(CimError::AlreadyExists(format!("volume {}", volume)));
        }
        fs::create_dir_all(&root)
            .map_err(|e| CimError::from_io(format!("create volume root {}", root.display()), e))?;

        if let Err(e) = volume::materialize(&manifest, &store, &root) {
            let _ = fs::remove_dir_all(&root);
            return Err(e);
        }

        self.lock_mounts().insert(*volume, root);
        Ok(())
    }

    fn dismount_image(&self, volume: &VolumeId) -> Result<()> {
        let root = self
            .lock_mounts()
            .remove(volume)
            .ok_or_else(|| CimError::NotFound(format!("volume {} is not mounted", volume)))?;
        fs::remove_dir_all(&root)
            .map_err(|e| CimError::io(format!("remove volume root {}", root.display()), e))
    }

    fn volume_root(&self, volume: &VolumeId) -> PathBuf {
        self.mount_root.join(volume.as_uuid().hyphenated().to_string())
    }
}
