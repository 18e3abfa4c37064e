// Composite image pipeline
// Extract source metadata, build and extend images, fork them copy-on-write,
// and verify committed images through a scoped mount.

pub mod builder;
pub mod extender;
pub mod extract;
pub mod forker;
pub mod local;
pub mod mount;
pub mod transfer;
pub mod verify;

#[cfg(test)]
pub mod test_helpers;

pub use builder::ImageBuilder;
pub use extender::{ImageExtender, LinkOutcome};
pub use extract::MetadataExtractor;
pub use forker::ImageForker;
pub use local::LocalEngine;
pub use mount::MountSession;
pub use transfer::StreamTransfer;
pub use verify::{ImageVerifier, Mismatch, TreeReport};

#[cfg(windows)]
pub use cim_platform::CimFsEngine;

pub use cim_core::{CimError, ImageIdentity, PipelineConfig, RelativePath, Result};
