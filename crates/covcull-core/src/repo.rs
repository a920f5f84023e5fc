//! Working-directory preparation from a repository location.

use std::path::Path;
use tracing::info;

use crate::error::{CovcullError, Result};
use crate::process::{run_process, ProcessSpec};

/// Timeout for `git clone`.
pub const CLONE_TIMEOUT_SECS: u64 = 600;

/// Make `workdir` hold a checkout of `repository`.
///
/// An existing non-empty `workdir` is reused as-is; otherwise the repository
/// (URL or local path) is cloned into it.
pub async fn prepare_workdir(repository: &str, workdir: &Path) -> Result<()> {
    if is_populated(workdir)? {
        info!(workdir = %workdir.display(), "Reusing existing working directory");
        return Ok(());
    }

    if let Some(parent) = workdir.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CovcullError::fs(parent, e))?;
    }

    info!(repository = %repository, workdir = %workdir.display(), "Cloning repository");
    let spec = ProcessSpec::new("git-clone", "git", CLONE_TIMEOUT_SECS)
        .args(["clone", "--quiet", repository])
        .arg(workdir.display().to_string());
    let outcome = run_process(&spec).await?;

    if !outcome.passed() {
        return Err(CovcullError::Repository(format!(
            "git clone {repository} failed: {}",
            outcome.diagnostic_excerpt(10)
        )));
    }
    Ok(())
}

fn is_populated(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    if !dir.is_dir() {
        return Err(CovcullError::Repository(format!(
            "{} exists and is not a directory",
            dir.display()
        )));
    }
    let mut entries = std::fs::read_dir(dir).map_err(|e| CovcullError::fs(dir, e))?;
    Ok(entries.next().is_some())
}
