// MountSession
// Scoped mount of a committed image; the volume is always dismounted

use cim_core::{ImageEngine, ImageIdentity, Result, VolumeId};
use std::path::{Path, PathBuf};

pub struct MountSession<'a, E: ImageEngine> {
    engine: &'a E,
}

/// Dismounts its volume when dropped, including during unwinding
struct MountedVolume<'a, E: ImageEngine> {
    engine: &'a E,
    volume: VolumeId,
    root: PathBuf,
}

impl<E: ImageEngine> Drop for MountedVolume<'_, E> {
    fn drop(&mut self) {
        match self.engine.dismount_image(&self.volume) {
            Ok(()) => log::debug!("Dismounted volume {}", self.volume),
            Err(e) => log::warn!("Failed to dismount volume {}: {}", self.volume, e),
        }
    }
}

impl<'a, E: ImageEngine> MountSession<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Mount `identity` on a fresh volume and run `body` with its root.
    ///
    /// A dismount failure is logged and never replaces the body's result.
    pub fn with_mount<T>(&self, identity: &ImageIdentity, body: impl FnOnce(&Path) -> T) -> Result<T> {
        let volume = VolumeId::generate();
        self.engine.mount_image(identity, &volume)?;

        let mounted = MountedVolume {
            engine: self.engine,
            volume,
            root: self.engine.volume_root(&volume),
        };
        log::info!("Mounted {} at {}", identity, mounted.root.display());

        Ok(body(&mounted.root))
    }
}
