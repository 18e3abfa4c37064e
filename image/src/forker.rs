// ImageForker
// Derives a new image from a committed base; the base is never modified

use cim_core::{CimError, ImageEngine, ImageIdentity, ImageTransaction, RelativePath, Result};

pub struct ImageForker<'a, E: ImageEngine> {
    engine: &'a E,
}

impl<'a, E: ImageEngine> ImageForker<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Commit `fork_name` as `base` minus `path` (and its subtree).
    ///
    /// Fails with `AlreadyExists` before touching anything if `fork_name`
    /// is already an image in the base's container, the base included.
    pub fn fork_with_deletion(
        &self,
        base: &ImageIdentity,
        path: &RelativePath,
        fork_name: &str,
    ) -> Result<ImageIdentity> {
        if fork_name == base.image_name() {
            return Err(CimError::AlreadyExists(format!(
                "fork target {} is the base image",
                base
            )));
        }
        let mut image = self
            .engine
            .create_image(base.container_path(), Some(base), fork_name)?;
        image.delete_path(path)?;
        let fork = image.commit()?;

        log::info!("Forked {} from {} without {}", fork, base, path);
        Ok(fork)
    }
}
