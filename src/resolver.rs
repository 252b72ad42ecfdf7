//! Breadth-first fixed-point resolution.
//!
//! Each pass walks the nodes discovered so far; resolving one may append
//! newly found dependencies, which the next pass picks up. The tree only
//! grows, so the loop settles in at most one pass per node.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::downloader::Downloader;
use crate::error::{Error, Result};
use crate::git;
use crate::manifest::{self, Manifest};
use crate::node::{Node, Origin};
use crate::registry;
use crate::settings::GlobalSettings;
use crate::tree::Tree;
use crate::MANIFEST_FILE;

/// Extra passes tolerated beyond the theoretical bound before resolution
/// is declared divergent.
const PASS_MARGIN: usize = 16;

/// Drive every unresolved node to completion.
pub fn resolve(tree: &mut Tree, root: &Path, downloader: &dyn Downloader) -> Result<()> {
    let settings = GlobalSettings::load(tree.settings_path.as_deref())?;

    let mut passes = 0;
    while !tree.finished() {
        passes += 1;
        if passes > 2 * tree.nodes.len() + PASS_MARGIN {
            return Err(Error::FixedPointDiverged(passes));
        }
        let known = tree.nodes.len();
        for id in 0..known {
            resolve_node(tree, id, &settings, root, downloader)?;
        }
    }
    debug!(nodes = tree.nodes.len(), passes, "resolution settled");
    Ok(())
}

/// Resolve a single node: locate its sources, load its manifest, record
/// the resolved fields, and enqueue its dependencies.
fn resolve_node(
    tree: &mut Tree,
    id: usize,
    settings: &GlobalSettings,
    root: &Path,
    downloader: &dyn Downloader,
) -> Result<()> {
    if tree.nodes[id].done {
        return Ok(());
    }

    let name = tree.nodes[id].name.clone();
    let origin = tree.nodes[id].origin.clone();
    debug!(name = %name, "resolving");

    let mut revision = tree.nodes[id].revision.clone();
    let mut fetched = false;

    let proj_dir = match &origin {
        Origin::Path { path } => root.join(path),
        Origin::Git { url, reference } => {
            let target = tree.dep_dir.join(&name);
            if !target.exists() {
                tree.log(1, &format!("Fetching '{name}' from {url}"));
                git::checkout(&target, url, reference)?;
                fetched = true;
            }
            revision = Some(git::current_revision(&target)?);
            target
        }
        Origin::Registry {
            namespace,
            name: pkg,
            requested_version,
        } => {
            let (dir, _version) = registry::get_source(
                tree,
                namespace,
                pkg,
                requested_version.as_ref(),
                settings,
                downloader,
            )?;
            dir
        }
    };

    let package = manifest::read_manifest(&proj_dir.join(MANIFEST_FILE))?;
    register(&mut tree.nodes[id], &package, proj_dir, revision, fetched)?;

    tree.add_manifest(&package, false)?;
    Ok(())
}

/// Record the resolved fields from a freshly read manifest onto a node.
fn register(
    node: &mut Node,
    package: &Manifest,
    proj_dir: PathBuf,
    revision: Option<String>,
    fetched: bool,
) -> Result<()> {
    if package.name != node.name {
        return Err(Error::ManifestMismatch {
            expected: node.name.clone(),
            found: package.name.clone(),
        });
    }
    node.resolved_version = package.parsed_version()?;
    node.proj_dir = Some(proj_dir);
    if let Origin::Git { url, .. } = &node.origin {
        node.revision = revision;
        if !fetched && url.is_empty() {
            // An old cache entry without the url: refetch on the next pass.
            node.update = true;
        }
    }
    node.done = true;
    Ok(())
}
