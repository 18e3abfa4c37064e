// Image manifest for the local engine
// One JSON document per committed image; paths point at shared nodes so
// hardlinks are two paths naming one node.

use cim_core::{
    CimError, FileAttributes, RelativePath, Result, SourceEntryMetadata, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const MANIFEST_FORMAT: u32 = 1;

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Object digest, absent for empty streams
    pub object: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub attributes: FileAttributes,
    pub creation_time: Timestamp,
    pub last_write_time: Timestamp,
    pub last_access_time: Timestamp,
    pub change_time: Timestamp,
    pub file_size: u64,
    #[serde(with = "hex_bytes_opt", default)]
    pub reparse_data: Option<Vec<u8>>,
    #[serde(with = "hex_bytes")]
    pub security_descriptor: Vec<u8>,
    /// Object digest of the default stream, absent when empty
    pub content: Option<String>,
    #[serde(default)]
    pub streams: BTreeMap<String, StreamRecord>,
}

impl Node {
    fn from_metadata(metadata: &SourceEntryMetadata) -> Self {
        Self {
            attributes: metadata.attributes,
            creation_time: metadata.creation_time,
            last_write_time: metadata.last_write_time,
            last_access_time: metadata.last_access_time,
            change_time: metadata.change_time,
            file_size: if metadata.is_directory() { 0 } else { metadata.file_size },
            reparse_data: metadata.reparse_data.clone(),
            security_descriptor: metadata.security_descriptor.clone(),
            content: None,
            streams: BTreeMap::new(),
        }
    }

    /// Directory node for a parent that was never added explicitly.
    fn implicit_directory() -> Self {
        Self {
            attributes: FileAttributes(FileAttributes::DIRECTORY),
            creation_time: Timestamp::default(),
            last_write_time: Timestamp::default(),
            last_access_time: Timestamp::default(),
            change_time: Timestamp::default(),
            file_size: 0,
            reparse_data: None,
            security_descriptor: Vec::new(),
            content: None,
            streams: BTreeMap::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes.is_reparse_point()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: u32,
    pub image_name: String,
    /// Image this one was forked from, if any
    pub base: Option<String>,
    /// Relative path (`/`-joined) to node id. Sorted, so parents precede children.
    pub paths: BTreeMap<String, u64>,
    pub nodes: BTreeMap<u64, Node>,
    pub next_node: u64,
}

pub fn key(path: &RelativePath) -> String {
    path.components().join("/")
}

impl Manifest {
    pub fn new(image_name: &str) -> Self {
        Self {
            format: MANIFEST_FORMAT,
            image_name: image_name.to_string(),
            base: None,
            paths: BTreeMap::new(),
            nodes: BTreeMap::new(),
            next_node: 1,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CimError::from_io(format!("read image {}", path.display()), e))?;
        let manifest: Self = serde_json::from_str(&text)?;
        if manifest.format != MANIFEST_FORMAT {
            return Err(CimError::NotSupported(format!(
                "image format {} in {}",
                manifest.format,
                path.display()
            )));
        }
        Ok(manifest)
    }

    pub fn lookup(&self, path: &RelativePath) -> Option<&Node> {
        self.paths.get(&key(path)).and_then(|id| self.nodes.get(id))
    }

    pub fn node_id(&self, path: &RelativePath) -> Option<u64> {
        self.paths.get(&key(path)).copied()
    }

    pub fn node_mut(&mut self, id: u64) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    fn allocate(&mut self, node: Node) -> u64 {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(id, node);
        id
    }

    fn ensure_parents(&mut self, path: &RelativePath) -> Result<()> {
        let mut parents = Vec::new();
        let mut current = path.parent();
        while let Some(parent) = current {
            current = parent.parent();
            parents.push(parent);
        }

        for parent in parents.into_iter().rev() {
            match self.lookup(&parent) {
                Some(node) if node.is_directory() => {}
                Some(_) => {
                    return Err(CimError::InvalidInput(format!(
                        "Parent '{}' of '{}' is not a directory",
                        parent, path
                    )))
                }
                None => {
                    let id = self.allocate(Node::implicit_directory());
                    self.paths.insert(key(&parent), id);
                }
            }
        }
        Ok(())
    }

    /// Add an entry. An explicit directory may take over an implicit one.
    pub fn insert_entry(&mut self, path: &RelativePath, metadata: &SourceEntryMetadata) -> Result<u64> {
        self.ensure_parents(path)?;

        if let Some(id) = self.node_id(path) {
            let existing_is_dir = self.nodes.get(&id).map(Node::is_directory).unwrap_or(false);
            if existing_is_dir && metadata.is_directory() {
                let streams = self.nodes.get(&id).map(|n| n.streams.clone()).unwrap_or_default();
                let mut node = Node::from_metadata(metadata);
                node.streams = streams;
                self.nodes.insert(id, node);
                return Ok(id);
            }
            return Err(CimError::AlreadyExists(format!("'{}' is already in the image", path)));
        }

        let id = self.allocate(Node::from_metadata(metadata));
        self.paths.insert(key(path), id);
        Ok(id)
    }

    pub fn link(&mut self, new_path: &RelativePath, existing: &RelativePath) -> Result<()> {
        let id = self
            .node_id(existing)
            .ok_or_else(|| CimError::NotFound(format!("'{}' is not in the image", existing)))?;
        if self.nodes.get(&id).map(Node::is_directory).unwrap_or(false) {
            return Err(CimError::AccessDenied(format!("'{}' is a directory", existing)));
        }
        if self.paths.contains_key(&key(new_path)) {
            return Err(CimError::AlreadyExists(format!("'{}' is already in the image", new_path)));
        }
        self.ensure_parents(new_path)?;
        self.paths.insert(key(new_path), id);
        Ok(())
    }

    /// Remove a path and, for directories, everything below it.
    pub fn delete(&mut self, path: &RelativePath) -> Result<usize> {
        let root = key(path);
        if !self.paths.contains_key(&root) {
            return Err(CimError::NotFound(format!("'{}' is not in the image", path)));
        }

        let prefix = format!("{}/", root);
        let doomed: Vec<String> = self
            .paths
            .keys()
            .filter(|k| **k == root || k.starts_with(&prefix))
            .cloned()
            .collect();
        for k in &doomed {
            self.paths.remove(k);
        }

        let live: BTreeSet<u64> = self.paths.values().copied().collect();
        self.nodes.retain(|id, _| live.contains(id));
        Ok(doomed.len())
    }

    /// Digests of every object this image references.
    pub fn referenced_objects(&self) -> BTreeSet<String> {
        let mut objects = BTreeSet::new();
        for node in self.nodes.values() {
            objects.extend(node.content.iter().cloned());
            for stream in node.streams.values() {
                objects.extend(stream.object.iter().cloned());
            }
        }
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_core::FileId128;

    fn meta(attributes: u32, size: u64) -> SourceEntryMetadata {
        SourceEntryMetadata {
            attributes: FileAttributes(attributes),
            creation_time: Timestamp(10),
            last_write_time: Timestamp(20),
            last_access_time: Timestamp(30),
            change_time: Timestamp(40),
            file_size: size,
            reparse_data: None,
            security_descriptor: vec![1, 2, 3],
            alternate_streams: Vec::new(),
            file_id: FileId128::default(),
        }
    }

    fn rel(p: &str) -> RelativePath {
        RelativePath::parse(p).unwrap()
    }

    #[test]
    fn test_parents_created_implicitly() {
        let mut m = Manifest::new("a.cim");
        m.insert_entry(&rel("x/y/file.txt"), &meta(FileAttributes::ARCHIVE, 3)).unwrap();
        assert!(m.lookup(&rel("x")).unwrap().is_directory());
        assert!(m.lookup(&rel("x/y")).unwrap().is_directory());
        assert_eq!(m.paths.len(), 3);
    }

    #[test]
    fn test_explicit_directory_replaces_implicit() {
        let mut m = Manifest::new("a.cim");
        m.insert_entry(&rel("d/f"), &meta(FileAttributes::ARCHIVE, 1)).unwrap();
        m.insert_entry(&rel("d"), &meta(FileAttributes::DIRECTORY, 99)).unwrap();
        let d = m.lookup(&rel("d")).unwrap();
        assert_eq!(d.creation_time, Timestamp(10));
        assert_eq!(d.file_size, 0);
    }

    #[test]
    fn test_duplicate_file_rejected() {
        let mut m = Manifest::new("a.cim");
        m.insert_entry(&rel("f"), &meta(FileAttributes::ARCHIVE, 1)).unwrap();
        let err = m.insert_entry(&rel("f"), &meta(FileAttributes::ARCHIVE, 1)).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_link_rules() {
        let mut m = Manifest::new("a.cim");
        m.insert_entry(&rel("f"), &meta(FileAttributes::ARCHIVE, 1)).unwrap();
        m.insert_entry(&rel("d"), &meta(FileAttributes::DIRECTORY, 0)).unwrap();

        m.link(&rel("g"), &rel("f")).unwrap();
        assert_eq!(m.node_id(&rel("g")), m.node_id(&rel("f")));

        assert!(m.link(&rel("h"), &rel("d")).unwrap_err().is_access_denied());
        assert!(m.link(&rel("g"), &rel("f")).unwrap_err().is_already_exists());
        assert!(m.link(&rel("i"), &rel("missing")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_subtree_and_collect_nodes() {
        let mut m = Manifest::new("a.cim");
        m.insert_entry(&rel("d/a"), &meta(FileAttributes::ARCHIVE, 1)).unwrap();
        m.insert_entry(&rel("d/b"), &meta(FileAttributes::ARCHIVE, 1)).unwrap();
        m.insert_entry(&rel("d2"), &meta(FileAttributes::ARCHIVE, 1)).unwrap();

        assert_eq!(m.delete(&rel("d")).unwrap(), 3);
        assert!(m.lookup(&rel("d2")).is_some());
        assert_eq!(m.nodes.len(), 1);
        assert!(m.delete(&rel("d")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_deleting_one_link_keeps_node() {
        let mut m = Manifest::new("a.cim");
        m.insert_entry(&rel("f"), &meta(FileAttributes::ARCHIVE, 1)).unwrap();
        m.link(&rel("g"), &rel("f")).unwrap();
        m.delete(&rel("f")).unwrap();
        assert!(m.lookup(&rel("g")).is_some());
        assert_eq!(m.nodes.len(), 1);
    }

    #[test]
    fn test_json_round_trip_keeps_binary_fields() {
        let mut m = Manifest::new("a.cim");
        let mut link = meta(FileAttributes::REPARSE_POINT, 0);
        link.reparse_data = Some(vec![0xde, 0xad]);
        m.insert_entry(&rel("l"), &link).unwrap();

        let text = serde_json::to_string(&m).unwrap();
        assert!(text.contains("\"dead\""));
        let back: Manifest = serde_json::from_str(&text).unwrap();
        assert_eq!(back, m);
    }
}
