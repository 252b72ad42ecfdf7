//! Global registry settings.
//!
//! Loaded once per resolve call from the user's config file; a missing
//! file yields the built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Base URL of the official package registry.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.fpm.community";

/// Contents of the global `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalSettings {
    #[serde(default)]
    pub registry: RegistrySettings,
}

/// The `[registry]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrySettings {
    /// Local filesystem registry; takes precedence over any remote.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Remote registry base URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Root of the per-user download cache.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl GlobalSettings {
    /// Load settings from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !file.is_file() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&file)?;
        toml::from_str(&content).map_err(|source| Error::Parse { path: file, source })
    }

    /// Remote registry base URL, falling back to the official registry.
    pub fn registry_url(&self) -> &str {
        self.registry.url.as_deref().unwrap_or(DEFAULT_REGISTRY_URL)
    }

    /// Per-user cache root for downloaded registry packages.
    pub fn registry_cache(&self) -> PathBuf {
        match &self.registry.cache_path {
            Some(path) => path.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".fpm-cache"))
                .join("fpm")
                .join("registry"),
        }
    }
}

/// Default settings file: `<config dir>/fpm/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fpm").join("config.toml"))
}
