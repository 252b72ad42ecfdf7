//! Crate-wide error type.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for dependency resolution operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A fetched package's manifest declares a different name than the
    /// dependency that requested it.
    #[error("dependency '{expected}' resolved to a package named '{found}'")]
    ManifestMismatch { expected: String, found: String },

    #[error("cannot update unknown dependency '{0}'")]
    UpdateUnknown(String),

    #[error("invalid dependency '{name}': {reason}")]
    Manifest { name: String, reason: String },

    #[error("registry response is missing required field '{0}'")]
    RegistryMissingField(&'static str),

    #[error("registry request failed with code {code}: {message}")]
    RegistryHttp { code: i64, message: String },

    #[error("invalid version string '{input}'")]
    VersionParse {
        input: String,
        #[source]
        source: semver::Error,
    },

    #[error("package manifest not found under local registry: {}", .0.display())]
    LocalRegistryMiss(PathBuf),

    #[error("local registry has no versions for package '{0}'")]
    NoVersions(String),

    #[error("package graph failed: node id {0} is out of range")]
    GraphInvalidId(usize),

    #[error("package graph failed: dependency '{dependency}' of '{package}' is not in the tree")]
    GraphMissingDep { package: String, dependency: String },

    #[error("dependency graph did not settle after {0} passes")]
    FixedPointDiverged(usize),

    #[error("malformed dependency cache: {0}")]
    CacheParse(String),

    #[error("could not create a temporary download file")]
    TempFile(#[source] io::Error),

    #[error("failed to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("git: {0}")]
    Git(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
