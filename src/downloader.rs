//! Download and unpack services for registry packages.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use semver::Version;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

const USER_AGENT: &str = concat!("fpm/", env!("CARGO_PKG_VERSION"));

/// Network and archive services used during registry acquisition.
///
/// The resolver takes this as an explicit collaborator so tests can swap
/// in a canned implementation.
pub trait Downloader {
    /// Query package metadata, optionally pinned to one version.
    fn get_pkg_data(&self, url: &str, requested_version: Option<&Version>) -> Result<Value>;

    /// Download `url` into `dest`.
    fn get_file(&self, url: &str, dest: &Path) -> Result<()>;

    /// Unpack the archive at `archive` into `dest`.
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<()> {
        unpack_archive(archive, dest)
    }
}

/// Blocking HTTP downloader used outside of tests.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader for HttpDownloader {
    fn get_pkg_data(&self, url: &str, requested_version: Option<&Version>) -> Result<Value> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT);
        if let Some(version) = requested_version {
            request = request.query(&[("version", version.to_string())]);
        }
        let response = request.send()?.error_for_status()?;
        Ok(response.json()?)
    }

    fn get_file(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(url, dest = %dest.display(), "downloading");
        let mut response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()?
            .error_for_status()?;
        let mut file = File::create(dest)?;
        io::copy(&mut response, &mut file)?;
        Ok(())
    }
}

/// Unpack a gzipped tar, plain tar, or zip archive into `dest`.
///
/// Download temporaries carry no usable extension, so the format is
/// sniffed from the leading magic bytes.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    let mut magic = [0u8; 2];
    File::open(archive)?.read_exact(&mut magic)?;

    if magic == [0x1f, 0x8b] {
        unpack_tar(GzDecoder::new(BufReader::new(File::open(archive)?)), dest)
    } else if &magic == b"PK" {
        unpack_zip(archive, dest)
    } else {
        unpack_tar(BufReader::new(File::open(archive)?), dest)
    }
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.unpack(dest)?;
    Ok(())
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(io::Error::other)?;
    zip.extract(dest).map_err(io::Error::other)?;
    Ok(())
}
