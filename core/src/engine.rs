// Image engine contract
// The native engine (create/write/commit/mount) sits behind these traits;
// the pipeline never talks to it directly.

use crate::{ImageIdentity, RelativePath, Result, SourceEntryMetadata, StreamName, VolumeId};
use std::path::{Path, PathBuf};

/// Write side of one stream inside an open image transaction.
///
/// Dropping a sink without calling `finish` closes the stream with
/// whatever was written so far.
pub trait StreamSink {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<()>;

    /// Close the stream. The engine records the length actually written.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// An open, uncommitted image transaction.
///
/// Exactly one of commit or drop (abandon) ends it.
pub trait ImageTransaction {
    /// Create the entry at `path` from `metadata` and return the sink for
    /// its default data stream.
    fn create_file(
        &mut self,
        path: &RelativePath,
        metadata: &SourceEntryMetadata,
    ) -> Result<Box<dyn StreamSink + '_>>;

    /// Create a named stream on an existing entry.
    fn create_alternate_stream(
        &mut self,
        path: &RelativePath,
        stream: &StreamName,
        declared_size: u64,
    ) -> Result<Box<dyn StreamSink + '_>>;

    /// Fails with `AccessDenied` when `existing` is a directory.
    fn create_hardlink(&mut self, new_path: &RelativePath, existing: &RelativePath) -> Result<()>;

    fn delete_path(&mut self, path: &RelativePath) -> Result<()>;

    /// Make the transaction durable under its target name.
    fn commit(self) -> Result<ImageIdentity>;
}

pub trait ImageEngine {
    type Transaction<'e>: ImageTransaction
    where
        Self: 'e;

    /// Open a transaction targeting `name` in `container`, optionally based
    /// on a committed image.
    ///
    /// Fails with `AlreadyExists` when `name` is already committed, unless
    /// `name` is the base itself (extend in place).
    fn create_image(
        &self,
        container: &Path,
        base: Option<&ImageIdentity>,
        name: &str,
    ) -> Result<Self::Transaction<'_>>;

    fn mount_image(&self, identity: &ImageIdentity, volume: &VolumeId) -> Result<()>;

    fn dismount_image(&self, volume: &VolumeId) -> Result<()>;

    /// Root path a mounted volume is reachable under.
    fn volume_root(&self, volume: &VolumeId) -> PathBuf;
}
