//! Package acquisition from local and remote registries.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::downloader::Downloader;
use crate::error::{Error, Result};
use crate::manifest::parse_version;
use crate::settings::GlobalSettings;
use crate::tree::Tree;
use crate::MANIFEST_FILE;

/// Locate, and if necessary download, the sources for a registry
/// dependency. Returns the package directory and the negotiated version.
pub fn get_source(
    tree: &Tree,
    namespace: &str,
    name: &str,
    requested: Option<&Version>,
    settings: &GlobalSettings,
    downloader: &dyn Downloader,
) -> Result<(PathBuf, Version)> {
    match &settings.registry.path {
        Some(local) => local_package(tree, &local.join(namespace).join(name), name, requested),
        None => remote_package(tree, namespace, name, requested, settings, downloader),
    }
}

/// Select a package directory under a local filesystem registry.
fn local_package(
    tree: &Tree,
    pkg_dir: &Path,
    name: &str,
    requested: Option<&Version>,
) -> Result<(PathBuf, Version)> {
    if let Some(version) = requested {
        let dir = pkg_dir.join(version.to_string());
        if !dir.join(MANIFEST_FILE).is_file() {
            return Err(Error::LocalRegistryMiss(dir));
        }
        tree.log(2, &format!("Using '{name}' {version} from the local registry"));
        return Ok((dir, version.clone()));
    }

    // No pin: pick the newest version-named directory. Entries that do
    // not parse as a version (a `latest` link, stray metadata) are not
    // candidates.
    let entries =
        fs::read_dir(pkg_dir).map_err(|_| Error::LocalRegistryMiss(pkg_dir.to_path_buf()))?;
    let mut best: Option<(PathBuf, Version)> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Ok(version) = Version::parse(&dir_name) else {
            continue;
        };
        match &best {
            Some((_, newest)) if *newest >= version => {}
            _ => best = Some((entry.path(), version)),
        }
    }

    let (dir, version) = best.ok_or_else(|| Error::NoVersions(name.to_string()))?;
    if !dir.join(MANIFEST_FILE).is_file() {
        return Err(Error::LocalRegistryMiss(dir));
    }
    tree.log(2, &format!("Using '{name}' {version} from the local registry"));
    Ok((dir, version))
}

/// Negotiate with the remote registry, reusing the per-user download cache
/// when it already holds the requested version.
fn remote_package(
    tree: &Tree,
    namespace: &str,
    name: &str,
    requested: Option<&Version>,
    settings: &GlobalSettings,
    downloader: &dyn Downloader,
) -> Result<(PathBuf, Version)> {
    let cache_root = settings.registry_cache().join(namespace).join(name);

    if let Some(version) = requested {
        let dir = cache_root.join(version.to_string());
        if dir.join(MANIFEST_FILE).is_file() {
            tree.log(2, &format!("Using cached download of '{name}' {version}"));
            return Ok((dir, version.clone()));
        }
    }

    let base = settings.registry_url();
    let url = format!(
        "{}/packages/{}/{}",
        base.trim_end_matches('/'),
        namespace,
        name
    );
    tree.log(1, &format!("Querying registry for '{namespace}/{name}'"));
    let response = downloader.get_pkg_data(&url, requested)?;
    let (download_url, version) = parse_response(&response, requested.is_some())?;
    debug!(name, version = %version, "registry offered");

    let dir = cache_root.join(version.to_string());
    if !dir.join(MANIFEST_FILE).is_file() {
        if dir.exists() {
            // Partial unpack left by an interrupted run.
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let tmp = NamedTempFile::new().map_err(Error::TempFile)?;
        tree.log(1, &format!("Downloading '{name}' {version}"));
        downloader.get_file(&absolute_url(base, &download_url), tmp.path())?;
        downloader.unpack(tmp.path(), &dir)?;
    }
    Ok((dir, version))
}

/// Extract the download URL and version from a registry response.
fn parse_response(response: &Value, pinned: bool) -> Result<(String, Version)> {
    let code = response
        .get("code")
        .and_then(Value::as_i64)
        .ok_or(Error::RegistryMissingField("code"))?;
    if code != 200 {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown registry error")
            .to_string();
        return Err(Error::RegistryHttp { code, message });
    }

    let data = response
        .get("data")
        .ok_or(Error::RegistryMissingField("data"))?;
    let version_data = if pinned {
        data.get("version_data")
            .ok_or(Error::RegistryMissingField("version_data"))?
    } else {
        data.get("latest_version_data")
            .ok_or(Error::RegistryMissingField("latest_version_data"))?
    };
    let download_url = version_data
        .get("download_url")
        .and_then(Value::as_str)
        .ok_or(Error::RegistryMissingField("download_url"))?;
    let version = version_data
        .get("version")
        .and_then(Value::as_str)
        .ok_or(Error::RegistryMissingField("version"))?;
    Ok((download_url.to_string(), parse_version(version)?))
}

fn absolute_url(base: &str, download_url: &str) -> String {
    if download_url.starts_with("http://") || download_url.starts_with("https://") {
        download_url.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            download_url.trim_start_matches('/')
        )
    }
}
