// ImageExtender
// Appends hardlink entries to a committed image, committing under the same name

use cim_core::{ImageEngine, ImageIdentity, ImageTransaction, RelativePath, Result};

/// How an `add_hardlink` request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The link was added and the image recommitted
    Linked,
    /// The target is a directory; nothing was committed
    DirectoryNotLinked,
}

pub struct ImageExtender<'a, E: ImageEngine> {
    engine: &'a E,
}

impl<'a, E: ImageEngine> ImageExtender<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Add `new_path` as a hardlink to `existing` inside `identity`.
    ///
    /// Existing entries are untouched. A directory target is reported as
    /// `LinkOutcome::DirectoryNotLinked`; every other failure is returned.
    pub fn add_hardlink(
        &self,
        identity: &ImageIdentity,
        existing: &RelativePath,
        new_path: &RelativePath,
    ) -> Result<LinkOutcome> {
        let mut image =
            self.engine
                .create_image(identity.container_path(), Some(identity), identity.image_name())?;

        match image.create_hardlink(new_path, existing) {
            Ok(()) => {}
            Err(e) if e.is_access_denied() => {
                log::warn!(
                    "Cannot hardlink {} to directory {} in {}; skipped",
                    new_path,
                    existing,
                    identity
                );
                return Ok(LinkOutcome::DirectoryNotLinked);
            }
            Err(e) => return Err(e),
        }

        image.commit()?;
        log::info!("Linked {} -> {} in {}", new_path, existing, identity);
        Ok(LinkOutcome::Linked)
    }
}
