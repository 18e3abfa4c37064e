// Mounted view of a local image
// The manifest is replayed onto a fresh directory: hardlinks stay links,
// reparse points become host links, streams become host streams.

use super::manifest::{Manifest, Node};
use super::store::ObjectStore;
use cim_core::{CimError, RelativePath, Result, StreamName, Timestamp};
use cim_platform::materialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub fn materialize(manifest: &Manifest, store: &ObjectStore, root: &Path) -> Result<()> {
    let mut placed: HashMap<u64, PathBuf> = HashMap::new();
    let mut replay: Vec<(PathBuf, &Node)> = Vec::new();

    for (key, id) in &manifest.paths {
        let node = manifest
            .nodes
            .get(id)
            .ok_or_else(|| CimError::InvalidInput(format!("'{}' names missing node {}", key, id)))?;
        let path = RelativePath::parse(key)?.to_host_path(root);

        if let Some(first) = placed.get(id) {
            fs::hard_link(first, &path)
                .map_err(|e| CimError::from_io(format!("link {}", path.display()), e))?;
            continue;
        }

        place_node(node, store, &path)?;
        placed.insert(*id, path.clone());
        replay.push((path, node));
    }

    // Children first so directory times survive.
    for (path, node) in replay.iter().rev() {
        // Implicit parents carry no times of their own.
        if node.last_write_time == Timestamp::default() && node.last_access_time == Timestamp::default() {
            continue;
        }
        materialize::set_times(path, node.last_access_time, node.last_write_time)?;
    }

    log::debug!(
        "Materialized {} path(s) of {} at {}",
        manifest.paths.len(),
        manifest.image_name,
        root.display()
    );
    Ok(())
}

fn place_node(node: &Node, store: &ObjectStore, path: &Path) -> Result<()> {
    if node.is_directory() {
        fs::create_dir(path)
            .map_err(|e| CimError::from_io(format!("create directory {}", path.display()), e))?;
    } else if node.is_reparse_point() {
        let data = node.reparse_data.as_deref().unwrap_or_default();
        materialize::create_reparse_point(path, data)?;
        return Ok(());
    } else {
        match &node.content {
            Some(digest) => {
                fs::copy(store.object_path(digest), path)
                    .map_err(|e| CimError::io(format!("write {}", path.display()), e))?;
            }
            None => {
                fs::File::create(path)
                    .map_err(|e| CimError::from_io(format!("create {}", path.display()), e))?;
            }
        }
    }

    for (name, record) in &node.streams {
        let bytes = match &record.object {
            Some(digest) => store.read(digest)?,
            None => Vec::new(),
        };
        materialize::write_alternate_stream(path, &StreamName::data(name)?, &bytes)?;
    }

    materialize::apply_security_descriptor(path, &node.security_descriptor)
}
