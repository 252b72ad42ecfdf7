//! Flattened dependency tree.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cache;
use crate::downloader::{Downloader, HttpDownloader};
use crate::error::{Error, Result};
use crate::git;
use crate::graph;
use crate::manifest::{self, Manifest};
use crate::node::{cached_entry_valid, Node, Origin};
use crate::resolver;
use crate::MANIFEST_FILE;

/// Where diagnostic lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSink {
    /// Swallow all diagnostics.
    Quiet,
    Stdout,
    #[default]
    Stderr,
}

impl OutputSink {
    /// Stable integer code used by the cache codec.
    pub(crate) fn unit(self) -> i64 {
        match self {
            OutputSink::Quiet => 0,
            OutputSink::Stdout => 1,
            OutputSink::Stderr => 2,
        }
    }

    pub(crate) fn from_unit(unit: i64) -> Self {
        match unit {
            0 => OutputSink::Quiet,
            1 => OutputSink::Stdout,
            _ => OutputSink::Stderr,
        }
    }

    fn write_line(self, line: &str) {
        match self {
            OutputSink::Quiet => {}
            OutputSink::Stdout => {
                let _ = writeln!(io::stdout(), "{line}");
            }
            OutputSink::Stderr => {
                let _ = writeln!(io::stderr(), "{line}");
            }
        }
    }
}

/// Append-only, name-indexed collection of dependency nodes.
///
/// The root project is always at index 0. Nodes are never removed, only
/// mutated in place, so an index stays valid for the life of the tree.
#[derive(Debug)]
pub struct Tree {
    pub nodes: Vec<Node>,
    /// Directory under which fetched git and registry packages live.
    pub dep_dir: PathBuf,
    /// Persisted snapshot of this tree, if any.
    pub cache_path: Option<PathBuf>,
    pub verbosity: u8,
    pub output: OutputSink,
    /// Alternative location of the global registry settings file.
    pub settings_path: Option<PathBuf>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// An empty tree with the default dependency directory.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            dep_dir: PathBuf::from("build").join("dependencies"),
            cache_path: None,
            verbosity: 1,
            output: OutputSink::default(),
            settings_path: None,
        }
    }

    pub fn with_dep_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dep_dir = dir.into();
        self
    }

    pub fn with_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Index of the named node.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// The named node, if present.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.find(name).map(|id| &self.nodes[id])
    }

    /// True once every node has been resolved.
    pub fn finished(&self) -> bool {
        self.nodes.iter().all(|n| n.done)
    }

    /// Insert `incoming`, reconciling against an existing node of the same
    /// name.
    ///
    /// A manifest-declared node never displaces an existing entry: the
    /// first declaration wins. A cached node replaces the declared entry
    /// when still valid, and otherwise marks it for update.
    pub fn add_node(&mut self, incoming: Node) {
        match self.find(&incoming.name) {
            Some(id) => {
                if incoming.cached {
                    if cached_entry_valid(&incoming, &self.nodes[id]) {
                        self.log(2, &format!("Using cached resolution of '{}'", incoming.name));
                        let mut node = incoming;
                        node.update = false;
                        self.nodes[id] = node;
                    } else {
                        self.log(
                            1,
                            &format!("Dependency change detected: '{}'", incoming.name),
                        );
                        self.nodes[id].update = true;
                    }
                }
            }
            None => {
                debug!(name = %incoming.name, "new dependency");
                let mut node = incoming;
                node.update = false;
                self.nodes.push(node);
            }
        }
    }

    /// Enqueue the dependencies a manifest declares. Dev, executable,
    /// example, and test dependencies participate only for the main
    /// project.
    pub fn add_manifest(&mut self, package: &Manifest, is_main: bool) -> Result<()> {
        for (name, spec) in &package.dependencies {
            self.add_node(Node::from_spec(name, spec)?);
        }
        if !is_main {
            return Ok(());
        }
        for (name, spec) in &package.dev_dependencies {
            self.add_node(Node::from_spec(name, spec)?);
        }
        for section in package
            .executable
            .iter()
            .chain(&package.example)
            .chain(&package.test)
        {
            for (name, spec) in &section.dependencies {
                self.add_node(Node::from_spec(name, spec)?);
            }
        }
        Ok(())
    }

    /// Build the full tree for the project rooted at `root`: seed the root
    /// node, overlay the cache, resolve to a fixed point, compute the link
    /// graph, and persist the cache.
    pub fn add_project(&mut self, root: &Path) -> Result<()> {
        self.add_project_with(root, &HttpDownloader::new())
    }

    /// Same as [`Tree::add_project`] with an explicit downloader.
    pub fn add_project_with(&mut self, root: &Path, downloader: &dyn Downloader) -> Result<()> {
        let package = manifest::read_manifest(&root.join(MANIFEST_FILE))?;

        let mut root_node = Node::new(
            &package.name,
            Origin::Path {
                path: PathBuf::from("."),
            },
        );
        root_node.preprocess = package.preprocess.clone();
        root_node.resolved_version = package.parsed_version()?;
        root_node.proj_dir = Some(root.to_path_buf());
        root_node.done = true;
        self.add_node(root_node);

        self.add_manifest(&package, true)?;
        self.overlay_cache()?;
        resolver::resolve(self, root, downloader)?;
        graph::resolve_package_dependencies(self)?;
        if let Some(cache_file) = self.cache_path.clone() {
            self.dump_cache(&cache_file)?;
        }
        Ok(())
    }

    /// Run the resolution loop over all currently unresolved nodes.
    pub fn resolve(&mut self, root: &Path, downloader: &dyn Downloader) -> Result<()> {
        resolver::resolve(self, root, downloader)
    }

    /// Re-fetch and re-resolve the named dependency.
    ///
    /// Only git dependencies flagged for update are re-fetched; other
    /// origins are left untouched.
    pub fn update(&mut self, name: &str, root: &Path, downloader: &dyn Downloader) -> Result<()> {
        let id = self
            .find(name)
            .ok_or_else(|| Error::UpdateUnknown(name.to_string()))?;
        if let Origin::Git { url, reference } = self.nodes[id].origin.clone() {
            if self.nodes[id].update {
                self.log(1, &format!("Updating dependency '{name}'"));
                let target = self.dep_dir.join(name);
                git::checkout(&target, &url, &reference)?;
                self.nodes[id].done = false;
                self.nodes[id].update = false;
                resolver::resolve(self, root, downloader)?;
            }
        }
        Ok(())
    }

    /// Update every dependency, in insertion order.
    pub fn update_all(&mut self, root: &Path, downloader: &dyn Downloader) -> Result<()> {
        let names: Vec<String> = self.nodes.iter().map(|n| n.name.clone()).collect();
        for name in names {
            self.update(&name, root, downloader)?;
        }
        Ok(())
    }

    /// Topological link order for the sub-graph rooted at node `id`:
    /// providers precede consumers, ending with `id` itself.
    pub fn link_order(&self, id: usize) -> Result<Vec<usize>> {
        graph::link_order(self, id)
    }

    /// Load a persisted tree from `path`, replacing this tree's contents.
    /// Intended for freshly created trees; a missing file is not an error.
    pub fn load_cache(&mut self, path: &Path) -> Result<()> {
        cache::load_into(self, path)
    }

    /// Persist this tree to `path`.
    pub fn dump_cache(&self, path: &Path) -> Result<()> {
        cache::dump(self, path)
    }

    /// Overlay previously cached entries, each flagged `cached`. The root
    /// entry of the cache never participates.
    fn overlay_cache(&mut self) -> Result<()> {
        let Some(path) = self.cache_path.clone() else {
            return Ok(());
        };
        let mut snapshot = Tree::new();
        snapshot.load_cache(&path)?;
        for mut node in snapshot.nodes.into_iter().skip(1) {
            node.cached = true;
            self.add_node(node);
        }
        Ok(())
    }

    pub(crate) fn log(&self, level: u8, line: &str) {
        if self.verbosity >= level {
            self.output.write_line(line);
        }
    }
}
