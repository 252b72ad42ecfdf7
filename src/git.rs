//! Git subprocess plumbing for fetching dependencies.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Error, Result};
use crate::node::GitReference;

/// Check out `url` at `reference` into `target_dir`.
///
/// The directory is initialized in place and the requested object fetched
/// with depth 1, so the same routine serves both the first fetch and a
/// later refresh of an existing checkout.
pub fn checkout(target_dir: &Path, url: &str, reference: &GitReference) -> Result<()> {
    fs::create_dir_all(target_dir)?;
    run(
        Command::new("git").args(["init", "-q"]).current_dir(target_dir),
        "git init",
    )?;

    let object = reference.object().unwrap_or("HEAD");
    run(
        Command::new("git")
            .args(["fetch", "--depth", "1", url, object])
            .current_dir(target_dir),
        "git fetch",
    )?;
    run(
        Command::new("git")
            .args(["checkout", "-qf", "FETCH_HEAD"])
            .current_dir(target_dir),
        "git checkout",
    )?;
    debug!(url, object, dir = %target_dir.display(), "checked out");
    Ok(())
}

/// The commit currently checked out in `dir`.
pub fn current_revision(dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .stderr(Stdio::null())
        .output()
        .map_err(|e| Error::Git(format!("failed to run git rev-parse: {e}")))?;
    if !output.status.success() {
        return Err(Error::Git(format!(
            "git rev-parse failed in {}",
            dir.display()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run(command: &mut Command, what: &str) -> Result<()> {
    let status = command
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| Error::Git(format!("failed to run {what}: {e}")))?;
    if !status.success() {
        return Err(Error::Git(format!("{what} exited with {status}")));
    }
    Ok(())
}
