//! Persisted snapshot of a dependency tree.
//!
//! The cache is a TOML document with the tree scalars at the top level and
//! one sub-table per node under `[dependencies]`, in tree order. Paths are
//! written with forward slashes so the file is portable across hosts.

use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use toml_edit::{value, Array, DocumentMut, Item, Table};
use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest::parse_version;
use crate::node::{GitReference, Node, Origin};
use crate::tree::{OutputSink, Tree};

/// Key prefix used on write for a node missing a name.
const UNNAMED: &str = "UNNAMED_DEPENDENCY";

/// Serialize `tree` to the file at `path`.
pub fn dump(tree: &Tree, path: &Path) -> Result<()> {
    let mut doc = DocumentMut::new();
    doc["unit"] = value(tree.output.unit());
    doc["verbosity"] = value(tree.verbosity as i64);
    doc["dep-dir"] = value(portable_path(&tree.dep_dir));
    if let Some(cache) = &tree.cache_path {
        doc["cache"] = value(portable_path(cache));
    }
    doc["ndep"] = value(tree.nodes.len() as i64);

    let mut deps = Table::new();
    deps.set_implicit(true);
    for (id, node) in tree.nodes.iter().enumerate() {
        let key = if node.name.is_empty() {
            format!("{UNNAMED}_{id}")
        } else {
            node.name.clone()
        };
        deps.insert(&key, Item::Table(node_table(node)));
    }
    doc["dependencies"] = Item::Table(deps);

    fs::write(path, doc.to_string())?;
    debug!(path = %path.display(), nodes = tree.nodes.len(), "cache written");
    Ok(())
}

/// Load the cache at `path` into `tree`, replacing its node list and
/// scalar settings. A missing file leaves the tree untouched; malformed
/// content is an error.
pub fn load_into(tree: &mut Tree, path: &Path) -> Result<()> {
    if !path.exists() {
        debug!(path = %path.display(), "no dependency cache");
        return Ok(());
    }
    let content = fs::read_to_string(path)?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e: toml_edit::TomlError| Error::CacheParse(e.to_string()))?;

    if let Some(unit) = doc.get("unit").and_then(Item::as_integer) {
        tree.output = OutputSink::from_unit(unit);
    }
    if let Some(verbosity) = doc.get("verbosity").and_then(Item::as_integer) {
        tree.verbosity = verbosity.clamp(0, u8::MAX as i64) as u8;
    }
    if let Some(dir) = doc.get("dep-dir").and_then(Item::as_str) {
        tree.dep_dir = host_path(dir);
    }
    if let Some(cache) = doc.get("cache").and_then(Item::as_str) {
        tree.cache_path = Some(host_path(cache));
    }

    let mut nodes = Vec::new();
    if let Some(deps) = doc.get("dependencies").and_then(Item::as_table) {
        for (key, item) in deps.iter() {
            let table = item
                .as_table()
                .ok_or_else(|| Error::CacheParse(format!("dependency '{key}' is not a table")))?;
            nodes.push(node_from_table(key, table)?);
        }
    }
    let ndep = doc
        .get("ndep")
        .and_then(Item::as_integer)
        .unwrap_or(nodes.len() as i64);
    if ndep != nodes.len() as i64 {
        debug!(ndep, found = nodes.len(), "cache node count differs from ndep");
    }

    tree.nodes = nodes;
    Ok(())
}

fn node_table(node: &Node) -> Table {
    let mut table = Table::new();
    match &node.origin {
        Origin::Path { path } => {
            table["path"] = value(portable_path(path));
        }
        Origin::Git { url, reference } => {
            if !url.is_empty() {
                table["git"] = value(url.as_str());
            }
            match reference {
                GitReference::Default => {}
                GitReference::Branch(branch) => table["branch"] = value(branch.as_str()),
                GitReference::Tag(tag) => table["tag"] = value(tag.as_str()),
                GitReference::Revision(rev) => table["rev"] = value(rev.as_str()),
            }
        }
        Origin::Registry {
            namespace,
            requested_version,
            ..
        } => {
            table["namespace"] = value(namespace.as_str());
            if let Some(version) = requested_version {
                table["requested-version"] = value(version.to_string());
            }
        }
    }
    if let Some(version) = &node.resolved_version {
        table["version"] = value(version.to_string());
    }
    if let Some(dir) = &node.proj_dir {
        table["proj-dir"] = value(portable_path(dir));
    }
    if let Some(revision) = &node.revision {
        table["revision"] = value(revision.as_str());
    }
    table["done"] = value(node.done);
    table["update"] = value(node.update);
    table["cached"] = value(node.cached);
    if let Some(deps) = &node.package_dep {
        let mut array = Array::new();
        for name in deps {
            array.push(name.as_str());
        }
        table["package-dep"] = value(array);
    }
    table
}

fn node_from_table(key: &str, table: &Table) -> Result<Node> {
    let origin = if let Some(path) = table.get("path").and_then(Item::as_str) {
        Origin::Path {
            path: host_path(path),
        }
    } else if let Some(namespace) = table.get("namespace").and_then(Item::as_str) {
        let requested_version = match table.get("requested-version").and_then(Item::as_str) {
            Some(raw) => Some(parse_version(raw)?),
            None => None,
        };
        Origin::Registry {
            namespace: namespace.to_string(),
            name: key.to_string(),
            requested_version,
        }
    } else {
        // Git entries may lack the url in caches written before the url
        // was recorded; resolution flags those for refetch.
        let url = table
            .get("git")
            .and_then(Item::as_str)
            .unwrap_or_default()
            .to_string();
        let reference = if let Some(branch) = table.get("branch").and_then(Item::as_str) {
            GitReference::Branch(branch.to_string())
        } else if let Some(tag) = table.get("tag").and_then(Item::as_str) {
            GitReference::Tag(tag.to_string())
        } else if let Some(rev) = table.get("rev").and_then(Item::as_str) {
            GitReference::Revision(rev.to_string())
        } else {
            GitReference::Default
        };
        Origin::Git { url, reference }
    };

    let mut node = Node::new(key, origin);
    if let Some(raw) = table.get("version").and_then(Item::as_str) {
        node.resolved_version = Some(parse_version(raw)?);
    }
    if let Some(dir) = table.get("proj-dir").and_then(Item::as_str) {
        node.proj_dir = Some(host_path(dir));
    }
    if let Some(revision) = table.get("revision").and_then(Item::as_str) {
        node.revision = Some(revision.to_string());
    }
    node.done = table.get("done").and_then(Item::as_bool).unwrap_or(false);
    node.update = table.get("update").and_then(Item::as_bool).unwrap_or(false);
    node.cached = table.get("cached").and_then(Item::as_bool).unwrap_or(false);
    if let Some(array) = table.get("package-dep").and_then(Item::as_array) {
        let mut deps = Vec::new();
        for entry in array.iter() {
            let name = entry.as_str().ok_or_else(|| {
                Error::CacheParse(format!("package-dep of '{key}' must be a string list"))
            })?;
            deps.push(name.to_string());
        }
        node.package_dep = Some(deps);
    }
    Ok(node)
}

/// Render a path with forward slashes for a platform-neutral cache.
fn portable_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if MAIN_SEPARATOR == '/' {
        raw.into_owned()
    } else {
        raw.replace(MAIN_SEPARATOR, "/")
    }
}

/// Convert a cached path back to the host convention.
fn host_path(raw: &str) -> PathBuf {
    if MAIN_SEPARATOR == '/' {
        PathBuf::from(raw)
    } else {
        PathBuf::from(raw.replace('/', &MAIN_SEPARATOR.to_string()))
    }
}
