//! `fpm.toml` manifest model.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A parsed package manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Runtime dependencies, keyed by package name.
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
    /// Dependencies used only when building the package itself.
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, DependencySpec>,
    #[serde(default)]
    pub executable: Vec<TargetSection>,
    #[serde(default)]
    pub example: Vec<TargetSection>,
    #[serde(default)]
    pub test: Vec<TargetSection>,
    #[serde(default)]
    pub preprocess: Option<BTreeMap<String, PreprocessConfig>>,
}

impl Manifest {
    /// The declared version, parsed as semver.
    pub fn parsed_version(&self) -> Result<Option<Version>> {
        match &self.version {
            Some(raw) => Ok(Some(parse_version(raw)?)),
            None => Ok(None),
        }
    }
}

/// An executable, example, or test section with its own dependency table.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
}

/// One entry in a manifest dependency table, before origin validation.
///
/// Exactly one origin kind must be present: `path`, `git` (optionally
/// qualified by one of `branch`, `tag`, or `rev`), or `namespace`
/// (optionally pinned with `v`).
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct DependencySpec {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub git: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub v: Option<String>,
    #[serde(default)]
    pub preprocess: Option<BTreeMap<String, PreprocessConfig>>,
}

/// Preprocessor options attached to a package or dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub suffixes: Vec<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub macros: Vec<String>,
}

/// Read and parse the manifest at `path`.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn parse_version(input: &str) -> Result<Version> {
    Version::parse(input).map_err(|source| Error::VersionParse {
        input: input.to_string(),
        source,
    })
}
