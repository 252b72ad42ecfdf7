//! Dependency resolution core for the fpm build system.
//!
//! Given a root project manifest declaring direct dependencies (local
//! paths, git repositories, or registry coordinates), this crate builds a
//! fully resolved, flattened dependency [`Tree`]: every transitive
//! dependency is fetched to a local directory, its own manifest loaded,
//! and its position in the build-time link graph determined.

pub mod cache;
pub mod downloader;
pub mod error;
pub mod git;
pub mod graph;
pub mod manifest;
pub mod node;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod tree;

pub use downloader::{Downloader, HttpDownloader};
pub use error::{Error, Result};
pub use manifest::{read_manifest, Manifest};
pub use node::{GitReference, Node, Origin};
pub use settings::GlobalSettings;
pub use tree::{OutputSink, Tree};

/// Per-package metadata file consumed by the resolver.
pub const MANIFEST_FILE: &str = "fpm.toml";
