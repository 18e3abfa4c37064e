pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod path;
pub mod stream_name;

pub use config::PipelineConfig;
pub use engine::{ImageEngine, ImageTransaction, StreamSink};
pub use error::{CimError, Result};
pub use identity::{ImageIdentity, VolumeId};
pub use metadata::{AlternateStream, FileAttributes, FileId128, SourceEntryMetadata, Timestamp};
pub use path::RelativePath;
pub use stream_name::StreamName;
