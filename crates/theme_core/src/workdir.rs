//! Directory snapshots used to find and remove artifacts of an aborted export.

use std::{
    collections::HashSet,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use shared::error::{KonsaveError, KonsaveResult};
use tokio::fs;
use tracing::{debug, warn};

pub type Snapshot = HashSet<OsString>;

pub async fn snapshot(dir: &Path) -> KonsaveResult<Snapshot> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|err| KonsaveError::io(format!("failed to list '{}'", dir.display()), err))?;
    let mut names = Snapshot::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| KonsaveError::io(format!("failed to list '{}'", dir.display()), err))?
    {
        names.insert(entry.file_name());
    }
    Ok(names)
}

/// Entries of `dir` that are absent from `before`, sorted by path.
pub async fn created_since(dir: &Path, before: &Snapshot) -> KonsaveResult<Vec<PathBuf>> {
    let now = snapshot(dir).await?;
    let mut created: Vec<PathBuf> = now
        .difference(before)
        .map(|name| dir.join(name))
        .collect();
    created.sort();
    Ok(created)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Removes everything created in `dir` since `before` was taken. Failures are
/// logged and reported, never returned.
pub async fn remove_created(dir: &Path, before: &Snapshot) -> CleanupReport {
    let mut report = CleanupReport::default();
    let created = match created_since(dir, before).await {
        Ok(created) => created,
        Err(err) => {
            warn!("cleanup skipped: {err}");
            return report;
        }
    };

    for path in created {
        match remove_entry(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed partial export artifact");
                report.removed.push(path);
            }
            Err(err) => {
                warn!(path = %path.display(), "failed to remove partial export artifact: {err}");
                report.failed.push((path, err.to_string()));
            }
        }
    }
    report
}

/// Removes a file, symlink or directory tree; a path that is already gone is not an error.
pub async fn remove_entry(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub async fn remove_dir_best_effort(dir: &Path) {
    if let Err(err) = remove_entry(dir).await {
        warn!(path = %dir.display(), "failed to remove directory: {err}");
    }
}

/// Moves every entry of `staging` into `dest`, replacing entries with the same name.
pub async fn publish(staging: &Path, dest: &Path) -> KonsaveResult<Vec<PathBuf>> {
    let mut names: Vec<OsString> = snapshot(staging).await?.into_iter().collect();
    names.sort();

    let mut published = Vec::with_capacity(names.len());
    for name in names {
        let from = staging.join(&name);
        let to = dest.join(&name);
        remove_entry(&to).await.map_err(|err| {
            KonsaveError::io(format!("failed to replace '{}'", to.display()), err)
        })?;
        fs::rename(&from, &to).await.map_err(|err| {
            KonsaveError::io(
                format!("failed to move '{}' to '{}'", from.display(), to.display()),
                err,
            )
        })?;
        published.push(to);
    }
    Ok(published)
}

#[cfg(test)]
#[path = "tests/workdir_tests.rs"]
mod tests;
