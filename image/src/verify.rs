// ImageVerifier
// Compares mounted image entries against their sources. Differences are
// collected as values; only I/O failures abort a comparison.

use crate::extract::MetadataExtractor;
use crate::mount::MountSession;
use cim_core::{
    AlternateStream, CimError, FileAttributes, ImageEngine, ImageIdentity, PipelineConfig,
    RelativePath, Result, SourceEntryMetadata, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use walkdir::WalkDir;

/// One difference between a source entry and its image counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Attributes { source: FileAttributes, image: FileAttributes },
    ReparseLength { source: usize, image: usize },
    ReparseContent,
    FileSize { source: u64, image: u64 },
    CreationTime { source: Timestamp, image: Timestamp },
    ContentLength { offset: u64 },
    ContentBytes { offset: u64 },
    StreamMissing { name: String },
    StreamUnexpected { name: String },
    StreamSize { name: String, source: u64, image: u64 },
    StreamContent { name: String },
    /// Present in the source tree, absent from the image
    EntryMissing,
    /// Present in the image, absent from the source tree
    EntryUnexpected,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Attributes { source, image } => {
                write!(f, "attributes differ: source {} image {}", source, image)
            }
            Mismatch::ReparseLength { source, image } => {
                write!(f, "reparse data length differs: source {} image {}", source, image)
            }
            Mismatch::ReparseContent => write!(f, "reparse data differs"),
            Mismatch::FileSize { source, image } => {
                write!(f, "file size differs: source {} image {}", source, image)
            }
            Mismatch::CreationTime { source, image } => {
                write!(f, "creation time differs: source {} image {}", source.0, image.0)
            }
            Mismatch::ContentLength { offset } => {
                write!(f, "content length differs at offset {}", offset)
            }
            Mismatch::ContentBytes { offset } => write!(f, "content differs at offset {}", offset),
            Mismatch::StreamMissing { name } => write!(f, "stream '{}' missing from image", name),
            Mismatch::StreamUnexpected { name } => write!(f, "unexpected stream '{}' in image", name),
            Mismatch::StreamSize { name, source, image } => write!(
                f,
                "stream '{}' size differs: source {} image {}",
                name, source, image
            ),
            Mismatch::StreamContent { name } => write!(f, "stream '{}' content differs", name),
            Mismatch::EntryMissing => write!(f, "missing from image"),
            Mismatch::EntryUnexpected => write!(f, "not present in source"),
        }
    }
}

/// Result of comparing a whole source tree with a mounted image
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeReport {
    pub entries_checked: usize,
    /// Mismatches keyed by `/`-joined image path; clean entries are omitted
    pub mismatches: BTreeMap<String, Vec<Mismatch>>,
}

impl TreeReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn mismatch_count(&self) -> usize {
        self.mismatches.values().map(Vec::len).sum()
    }
}

pub struct ImageVerifier<'a, E: ImageEngine> {
    engine: &'a E,
    extractor: MetadataExtractor,
    compare_chunk_size: usize,
    compare_streams: bool,
    mismatches_fatal: bool,
}

impl<'a, E: ImageEngine> ImageVerifier<'a, E> {
    pub fn new(engine: &'a E, config: &PipelineConfig) -> Self {
        Self {
            engine,
            extractor: MetadataExtractor::new(config),
            compare_chunk_size: config.compare_chunk_size.max(1),
            compare_streams: config.compare_streams,
            mismatches_fatal: config.mismatches_fatal,
        }
    }

    /// Compare `source` with `mounted` and return every difference found.
    pub fn compare_entry(&self, source: &Path, mounted: &Path) -> Result<Vec<Mismatch>> {
        let expected = self.extractor.extract(source)?;
        let actual = self.extractor.extract(mounted)?;
        let mut mismatches = Vec::new();

        if expected.attributes != actual.attributes {
            mismatches.push(Mismatch::Attributes {
                source: expected.attributes,
                image: actual.attributes,
            });
        }

        if expected.is_reparse_point() {
            let want = expected.reparse_data.as_deref().unwrap_or_default();
            let got = actual.reparse_data.as_deref().unwrap_or_default();
            if want.len() != got.len() {
                mismatches.push(Mismatch::ReparseLength { source: want.len(), image: got.len() });
            } else if want != got {
                mismatches.push(Mismatch::ReparseContent);
            }
        }

        if !expected.is_directory() {
            if expected.file_size != actual.file_size {
                mismatches.push(Mismatch::FileSize {
                    source: expected.file_size,
                    image: actual.file_size,
                });
            }
            if expected.creation_time != actual.creation_time {
                mismatches.push(Mismatch::CreationTime {
                    source: expected.creation_time,
                    image: actual.creation_time,
                });
            }
            let mut want = self.extractor.open_content(source)?;
            let mut got = self.extractor.open_content(mounted)?;
            if let Some(mismatch) = self.compare_content(want.as_mut(), got.as_mut())? {
                mismatches.push(mismatch);
            }
        }

        if self.compare_streams {
            self.compare_alternate_streams(&expected, &actual, &mut mismatches)?;
        }

        Ok(mismatches)
    }

    /// Chunked read-compare; reports the first divergence only.
    fn compare_content(&self, want: &mut dyn Read, got: &mut dyn Read) -> Result<Option<Mismatch>> {
        let mut a = vec![0u8; self.compare_chunk_size];
        let mut b = vec![0u8; self.compare_chunk_size];
        let mut offset = 0u64;

        loop {
            let n = fill(want, &mut a).map_err(|e| CimError::io("read source content", e))?;
            let m = fill(got, &mut b).map_err(|e| CimError::io("read image content", e))?;

            if n != m {
                return Ok(Some(Mismatch::ContentLength { offset }));
            }
            if let Some(at) = a[..n].iter().zip(&b[..m]).position(|(x, y)| x != y) {
                return Ok(Some(Mismatch::ContentBytes { offset: offset + at as u64 }));
            }
            if n == 0 {
                return Ok(None);
            }
            offset += n as u64;
        }
    }

    fn compare_alternate_streams(
        &self,
        expected: &SourceEntryMetadata,
        actual: &SourceEntryMetadata,
        mismatches: &mut Vec<Mismatch>,
    ) -> Result<()> {
        let want = streams_by_name(expected);
        let got = streams_by_name(actual);

        for (name, stream) in &want {
            let Some(other) = got.get(name) else {
                mismatches.push(Mismatch::StreamMissing { name: name.clone() });
                continue;
            };
            if stream.size != other.size {
                mismatches.push(Mismatch::StreamSize {
                    name: name.clone(),
                    source: stream.size,
                    image: other.size,
                });
                continue;
            }
            let mut a = self.extractor.open_stream(stream)?;
            let mut b = self.extractor.open_stream(other)?;
            if self.compare_content(a.as_mut(), b.as_mut())?.is_some() {
                mismatches.push(Mismatch::StreamContent { name: name.clone() });
            }
        }

        for name in got.keys().filter(|name| !want.contains_key(*name)) {
            mismatches.push(Mismatch::StreamUnexpected { name: name.clone() });
        }
        Ok(())
    }

    /// True when both paths name the same file (equal FILE_ID_128).
    pub fn validate_hardlink(&self, existing: &Path, link: &Path) -> Result<bool> {
        let a = self.extractor.extract(existing)?;
        let b = self.extractor.extract(link)?;
        Ok(a.file_id == b.file_id)
    }

    /// Mount `identity` and report whether `path` is present in it.
    pub fn path_exists(&self, identity: &ImageIdentity, path: &RelativePath) -> Result<bool> {
        let found = MountSession::new(self.engine)
            .with_mount(identity, |root| self.extractor.extract(&path.to_host_path(root)))?;
        match found {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Mount `identity` and compare `path` inside it with `source`.
    pub fn verify_entry(
        &self,
        identity: &ImageIdentity,
        source: &Path,
        path: &RelativePath,
    ) -> Result<Vec<Mismatch>> {
        let mismatches = MountSession::new(self.engine)
            .with_mount(identity, |root| self.compare_entry(source, &path.to_host_path(root)))??;
        self.enforce(mismatches.len())?;
        Ok(mismatches)
    }

    /// Mount `identity` and check that two of its paths are one file.
    pub fn verify_hardlink(
        &self,
        identity: &ImageIdentity,
        existing: &RelativePath,
        link: &RelativePath,
    ) -> Result<bool> {
        MountSession::new(self.engine).with_mount(identity, |root| {
            self.validate_hardlink(&existing.to_host_path(root), &link.to_host_path(root))
        })?
    }

    /// Compare every entry below `source_root` with the same path under `mounted_root`.
    pub fn verify_tree(&self, source_root: &Path, mounted_root: &Path) -> Result<TreeReport> {
        let mut report = TreeReport::default();
        let mut seen = BTreeSet::new();

        for entry in walk(source_root) {
            let entry = entry?;
            let relative = relative_to(source_root, entry.path())?;
            let mounted = relative.to_host_path(mounted_root);
            let key = relative.to_string();
            report.entries_checked += 1;

            let mismatches = match self.compare_entry(entry.path(), &mounted) {
                Ok(mismatches) => mismatches,
                Err(e) if e.is_not_found() && std::fs::symlink_metadata(&mounted).is_err() => {
                    vec![Mismatch::EntryMissing]
                }
                Err(e) => return Err(e),
            };
            if !mismatches.is_empty() {
                report.mismatches.insert(key.clone(), mismatches);
            }
            seen.insert(key);
        }

        for entry in walk(mounted_root) {
            let entry = entry?;
            let key = relative_to(mounted_root, entry.path())?.to_string();
            if !seen.contains(&key) {
                report.mismatches.insert(key, vec![Mismatch::EntryUnexpected]);
            }
        }

        log::debug!(
            "Checked {} entries below {}: {} mismatch(es)",
            report.entries_checked,
            source_root.display(),
            report.mismatch_count()
        );
        Ok(report)
    }

    /// Mount `identity` and run `verify_tree` against it.
    pub fn verify_image_tree(&self, identity: &ImageIdentity, source_root: &Path) -> Result<TreeReport> {
        let report = MountSession::new(self.engine)
            .with_mount(identity, |root| self.verify_tree(source_root, root))??;
        self.enforce(report.mismatch_count())?;
        Ok(report)
    }

    /// Mismatches are diagnostics unless configured to be fatal.
    pub fn enforce(&self, mismatch_count: usize) -> Result<()> {
        if self.mismatches_fatal && mismatch_count > 0 {
            return Err(CimError::VerificationFailed(mismatch_count));
        }
        Ok(())
    }
}

fn streams_by_name(meta: &SourceEntryMetadata) -> BTreeMap<String, AlternateStream> {
    meta.alternate_streams
        .iter()
        .map(|s| (s.name.name().to_string(), s.clone()))
        .collect()
}

/// Read until `buf` is full or the reader is exhausted.
fn fill(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn walk(root: &Path) -> impl Iterator<Item = Result<walkdir::DirEntry>> + '_ {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(move |entry| {
            entry.map_err(|e| {
                let context = format!("walk {}", root.display());
                match e.into_io_error() {
                    Some(io) => CimError::from_io(context, io),
                    None => CimError::InvalidInput(format!("{}: filesystem loop", context)),
                }
            })
        })
}

fn relative_to(root: &Path, path: &Path) -> Result<RelativePath> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| CimError::InvalidInput(format!("{} is outside {}", path.display(), root.display())))?;
    RelativePath::from_host(relative)
}
