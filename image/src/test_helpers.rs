// Shared scratch setup for unit tests

use crate::builder::ImageBuilder;
use crate::local::LocalEngine;
use cim_core::{ImageIdentity, PipelineConfig, RelativePath};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Temp directory with a source tree, a container and a local engine
pub struct Fixture {
    pub dir: TempDir,
    pub engine: LocalEngine,
    pub config: PipelineConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = PipelineConfig {
            mount_root: Some(dir.path().join("volumes")),
            ..Default::default()
        };
        let engine = LocalEngine::new(&config);
        fs::create_dir_all(dir.path().join("src")).expect("Failed to create source dir");
        Self { dir, engine, config }
    }

    pub fn container(&self) -> PathBuf {
        self.dir.path().join("img")
    }

    pub fn source_root(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    pub fn write_source(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.source_root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create source parent");
        }
        fs::write(&path, contents).expect("Failed to write source file");
        path
    }

    /// Build `image_name` holding one file at `relative`.
    pub fn build_file(&self, image_name: &str, relative: &str, contents: &[u8]) -> ImageIdentity {
        let source = self.write_source(relative, contents);
        self.builder()
            .build_new(&self.container(), image_name, &source, &rel(relative))
            .expect("Failed to build image")
    }

    pub fn builder(&self) -> ImageBuilder<'_, LocalEngine> {
        ImageBuilder::new(&self.engine, &self.config)
    }

    pub fn manifest_bytes(&self, image_name: &str) -> Vec<u8> {
        fs::read(self.container().join(image_name)).expect("Failed to read image")
    }
}

pub fn rel(path: &str) -> RelativePath {
    RelativePath::parse(path).expect("Failed to parse image path")
}
