//! A single resolved dependency and its origin.

use std::collections::BTreeMap;
use std::path::PathBuf;

use semver::Version;
use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest::{parse_version, DependencySpec, PreprocessConfig};

/// How a git dependency selects the commit to check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitReference {
    /// The remote's default branch head.
    Default,
    Branch(String),
    Tag(String),
    Revision(String),
}

impl GitReference {
    /// The object name passed to `git fetch`, if any.
    pub fn object(&self) -> Option<&str> {
        match self {
            GitReference::Default => None,
            GitReference::Branch(name) | GitReference::Tag(name) | GitReference::Revision(name) => {
                Some(name)
            }
        }
    }
}

/// The means by which a package's sources are located.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    /// A local directory, resolved relative to the enclosing project root.
    Path { path: PathBuf },
    /// A version-controlled repository.
    Git { url: String, reference: GitReference },
    /// Coordinates into a package registry, optionally pinned to one
    /// version. The pin is part of the coordinates: changing it changes
    /// the origin.
    Registry {
        namespace: String,
        name: String,
        requested_version: Option<Version>,
    },
}

/// One package participating in the build.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique key within the tree.
    pub name: String,
    pub origin: Origin,
    /// Preprocessor options declared on the dependency.
    pub preprocess: Option<BTreeMap<String, PreprocessConfig>>,
    /// Version parsed from the fetched package's own manifest.
    pub resolved_version: Option<Version>,
    /// Local directory in which the fetched package resides.
    pub proj_dir: Option<PathBuf>,
    /// Checked-out commit identifier, for git origins.
    pub revision: Option<String>,
    /// Resolution complete for this node.
    pub done: bool,
    /// The local copy must be re-fetched on the next resolve pass.
    pub update: bool,
    /// Loaded from the persisted cache rather than discovered via manifest.
    pub cached: bool,
    /// Transitive closure of required package names, in tree-index order.
    pub package_dep: Option<Vec<String>>,
}

impl Node {
    /// A fresh, unresolved node.
    pub fn new(name: impl Into<String>, origin: Origin) -> Self {
        Self {
            name: name.into(),
            origin,
            preprocess: None,
            resolved_version: None,
            proj_dir: None,
            revision: None,
            done: false,
            update: false,
            cached: false,
            package_dep: None,
        }
    }

    /// Build a node from a manifest dependency table entry.
    pub fn from_spec(name: &str, spec: &DependencySpec) -> Result<Self> {
        let mut node = Node::new(name, spec_origin(name, spec)?);
        node.preprocess = spec.preprocess.clone();
        Ok(node)
    }

    /// The version pin for registry origins, if any.
    pub fn requested_version(&self) -> Option<&Version> {
        match &self.origin {
            Origin::Registry {
                requested_version, ..
            } => requested_version.as_ref(),
            _ => None,
        }
    }
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::Manifest {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn spec_origin(name: &str, spec: &DependencySpec) -> Result<Origin> {
    let kinds =
        spec.path.is_some() as u8 + spec.git.is_some() as u8 + spec.namespace.is_some() as u8;
    if kinds != 1 {
        return Err(invalid(
            name,
            "exactly one of 'path', 'git', or 'namespace' must be given",
        ));
    }

    if let Some(path) = &spec.path {
        if spec.branch.is_some() || spec.tag.is_some() || spec.rev.is_some() || spec.v.is_some() {
            return Err(invalid(name, "path dependencies accept no further qualifiers"));
        }
        return Ok(Origin::Path { path: path.clone() });
    }

    if let Some(url) = &spec.git {
        if spec.v.is_some() {
            return Err(invalid(name, "'v' is only valid for registry dependencies"));
        }
        let reference = match (&spec.branch, &spec.tag, &spec.rev) {
            (None, None, None) => GitReference::Default,
            (Some(branch), None, None) => GitReference::Branch(branch.clone()),
            (None, Some(tag), None) => GitReference::Tag(tag.clone()),
            (None, None, Some(rev)) => GitReference::Revision(rev.clone()),
            _ => {
                return Err(invalid(
                    name,
                    "at most one of 'branch', 'tag', or 'rev' may be given",
                ))
            }
        };
        return Ok(Origin::Git {
            url: url.clone(),
            reference,
        });
    }

    if let Some(namespace) = &spec.namespace {
        if spec.branch.is_some() || spec.tag.is_some() || spec.rev.is_some() {
            return Err(invalid(name, "git qualifiers require a 'git' url"));
        }
        let requested_version = match &spec.v {
            Some(raw) => Some(parse_version(raw)?),
            None => None,
        };
        return Ok(Origin::Registry {
            namespace: namespace.clone(),
            name: name.to_string(),
            requested_version,
        });
    }

    Err(invalid(
        name,
        "exactly one of 'path', 'git', or 'namespace' must be given",
    ))
}

/// Decide whether a cached entry is still usable in place of the freshly
/// declared dependency with the same name.
///
/// A differing origin or preprocess configuration invalidates the entry.
/// For the resolved fields (version, revision, project directory) a value
/// present on only one side is tolerated: the declared side has not been
/// resolved yet.
pub fn cached_entry_valid(cached: &Node, declared: &Node) -> bool {
    if cached.origin != declared.origin {
        debug!(name = %declared.name, "cache entry invalid: origin changed");
        return false;
    }
    if cached.preprocess != declared.preprocess {
        debug!(name = %declared.name, "cache entry invalid: preprocess config changed");
        return false;
    }

    match (&cached.resolved_version, &declared.resolved_version) {
        (Some(a), Some(b)) if a != b => {
            debug!(name = %declared.name, "cache entry invalid: version changed");
            return false;
        }
        (Some(_), None) | (None, Some(_)) => {
            debug!(name = %declared.name, "version recorded on one side only");
        }
        _ => {}
    }
    match (&cached.revision, &declared.revision) {
        (Some(a), Some(b)) if a != b => {
            debug!(name = %declared.name, "cache entry invalid: revision changed");
            return false;
        }
        (Some(_), None) | (None, Some(_)) => {
            debug!(name = %declared.name, "revision recorded on one side only");
        }
        _ => {}
    }
    match (&cached.proj_dir, &declared.proj_dir) {
        (Some(a), Some(b)) if a != b => {
            debug!(name = %declared.name, "cache entry invalid: project directory changed");
            return false;
        }
        (Some(_), None) | (None, Some(_)) => {
            debug!(name = %declared.name, "project directory recorded on one side only");
        }
        _ => {}
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(toml: &str) -> DependencySpec {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn path_spec_becomes_path_origin() {
        let node = Node::from_spec("alpha", &spec("path = \"./alpha\"")).unwrap();
        assert_eq!(
            node.origin,
            Origin::Path {
                path: PathBuf::from("./alpha")
            }
        );
        assert!(!node.done && !node.update && !node.cached);
    }

    #[test]
    fn git_spec_takes_one_reference() {
        let node =
            Node::from_spec("beta", &spec("git = \"https://x/b.git\"\nbranch = \"main\"")).unwrap();
        assert_eq!(
            node.origin,
            Origin::Git {
                url: "https://x/b.git".into(),
                reference: GitReference::Branch("main".into())
            }
        );

        let err = Node::from_spec(
            "beta",
            &spec("git = \"https://x/b.git\"\nbranch = \"main\"\ntag = \"v1\""),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
    }

    #[test]
    fn registry_spec_parses_pin() {
        let node = Node::from_spec("gamma", &spec("namespace = \"ns\"\nv = \"1.2.3\"")).unwrap();
        assert_eq!(
            node.origin,
            Origin::Registry {
                namespace: "ns".into(),
                name: "gamma".into(),
                requested_version: Some(Version::new(1, 2, 3)),
            }
        );
        assert_eq!(node.requested_version().unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn changed_registry_pin_invalidates_cache_entry() {
        let declared = Node::from_spec("gamma", &spec("namespace = \"ns\"\nv = \"2.0.0\"")).unwrap();
        let mut cached = Node::from_spec("gamma", &spec("namespace = \"ns\"\nv = \"1.0.0\"")).unwrap();
        cached.cached = true;
        cached.done = true;
        cached.resolved_version = Some(Version::new(1, 0, 0));
        assert!(!cached_entry_valid(&cached, &declared));
    }

    #[test]
    fn mixed_origins_are_rejected() {
        let err = Node::from_spec("delta", &spec("path = \"./d\"\ngit = \"https://x\"")).unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
        let err = Node::from_spec("delta", &DependencySpec::default()).unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
    }

    #[test]
    fn origin_change_invalidates_cache_entry() {
        let declared = Node::from_spec("a", &spec("git = \"https://x/a.git\"\nrev = \"bbbb\"")).unwrap();
        let mut cached = Node::from_spec("a", &spec("git = \"https://x/a.git\"\nrev = \"aaaa\"")).unwrap();
        cached.cached = true;
        cached.revision = Some("aaaa".into());
        assert!(!cached_entry_valid(&cached, &declared));
    }

    #[test]
    fn unresolved_fields_do_not_invalidate() {
        let declared = Node::from_spec("a", &spec("path = \"./a\"")).unwrap();
        let mut cached = declared.clone();
        cached.cached = true;
        cached.done = true;
        cached.resolved_version = Some(Version::new(1, 2, 0));
        cached.proj_dir = Some(PathBuf::from("./a"));
        assert!(cached_entry_valid(&cached, &declared));
    }

    #[test]
    fn preprocess_presence_mismatch_invalidates() {
        let declared = Node::from_spec(
            "a",
            &spec("path = \"./a\"\n[preprocess.cpp]\nmacros = [\"X=1\"]"),
        )
        .unwrap();
        let mut cached = Node::from_spec("a", &spec("path = \"./a\"")).unwrap();
        cached.cached = true;
        assert!(!cached_entry_valid(&cached, &declared));
    }
}
