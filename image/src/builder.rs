// ImageBuilder
// Creates a new image and populates it from source entries

use crate::extract::MetadataExtractor;
use crate::transfer::StreamTransfer;
use cim_core::{
    CimError, ImageEngine, ImageIdentity, ImageTransaction, PipelineConfig, RelativePath, Result,
};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub struct ImageBuilder<'a, E: ImageEngine> {
    engine: &'a E,
    extractor: MetadataExtractor,
    transfer: StreamTransfer,
    cleanup_on_failure: bool,
}

impl<'a, E: ImageEngine> ImageBuilder<'a, E> {
    pub fn new(engine: &'a E, config: &PipelineConfig) -> Self {
        Self {
            engine,
            extractor: MetadataExtractor::new(config),
            transfer: StreamTransfer::new(config),
            cleanup_on_failure: config.cleanup_on_failure,
        }
    }

    /// Create `image_name` in `container` holding the single entry
    /// `source_path` at `image_path`.
    ///
    /// Fails with `AlreadyExists` if the image is already committed; the
    /// existing image is left untouched.
    pub fn build_new(
        &self,
        container: &Path,
        image_name: &str,
        source_path: &Path,
        image_path: &RelativePath,
    ) -> Result<ImageIdentity> {
        self.with_cleanup(container, || {
            let mut image = self.engine.create_image(container, None, image_name)?;
            log::info!("Created image {} in {}", image_name, container.display());

            self.populate(&mut image, source_path, image_path)?;

            let identity = image.commit()?;
            log::info!("Committed {}", identity);
            Ok(identity)
        })
    }

    /// Create `image_name` holding every entry below `source_root`.
    ///
    /// Parents are added before children and symlinks are stored as links.
    pub fn build_tree(&self, container: &Path, image_name: &str, source_root: &Path) -> Result<ImageIdentity> {
        self.with_cleanup(container, || {
            let mut image = self.engine.create_image(container, None, image_name)?;
            log::info!("Created image {} in {}", image_name, container.display());

            let mut entries = 0usize;
            for entry in WalkDir::new(source_root)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| {
                    let context = format!("walk {}", source_root.display());
                    match e.into_io_error() {
                        Some(io) => CimError::from_io(context, io),
                        None => CimError::InvalidInput(format!("{}: filesystem loop", context)),
                    }
                })?;
                let relative = entry
                    .path()
                    .strip_prefix(source_root)
                    .map_err(|_| CimError::InvalidInput(format!("{} escapes the source root", entry.path().display())))?;
                let image_path = RelativePath::from_host(relative)?;

                self.populate(&mut image, entry.path(), &image_path)?;
                entries += 1;
            }

            let identity = image.commit()?;
            log::info!("Committed {} with {} entries", identity, entries);
            Ok(identity)
        })
    }

    /// Write one source entry (main content and alternate streams) into `image`.
    pub fn populate<T: ImageTransaction>(
        &self,
        image: &mut T,
        source_path: &Path,
        image_path: &RelativePath,
    ) -> Result<()> {
        let metadata = self.extractor.extract(source_path)?;

        let mut sink = image.create_file(image_path, &metadata)?;
        if metadata.file_size > 0 {
            let mut content = self.extractor.open_content(source_path)?;
            self.transfer.copy(sink.as_mut(), content.as_mut())?;
        }
        sink.finish()?;

        if metadata.is_directory() {
            log::info!("{} is a directory; added without content", source_path.display());
        }

        for stream in &metadata.alternate_streams {
            let mut reader = self.extractor.open_stream(stream)?;
            let mut sink = image.create_alternate_stream(image_path, &stream.name, stream.size)?;
            if stream.size > 0 {
                self.transfer.copy(sink.as_mut(), reader.as_mut())?;
            }
            sink.finish()?;
            log::debug!("Added stream {} to {}", stream.name, image_path);
        }

        Ok(())
    }

    /// Run `build`; on failure remove the container if this call created it.
    fn with_cleanup<T>(&self, container: &Path, build: impl FnOnce() -> Result<T>) -> Result<T> {
        let existed = container.exists();
        let result = build();

        if let Err(e) = &result {
            if !existed && self.cleanup_on_failure && container.exists() {
                log::info!("Build failed ({}); removing {}", e, container.display());
                if let Err(cleanup) = fs::remove_dir_all(container) {
                    log::warn!("Failed to remove {}: {}", container.display(), cleanup);
                }
            }
        }
        result
    }
}
