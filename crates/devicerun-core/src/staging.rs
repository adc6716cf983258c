//! Staging of local model and data files onto the device.
//!
//! Staging is best-effort: every file under the local data directory is
//! attempted, and a failed push is recorded in the [`StagingReport`] rather
//! than aborting the remaining files. A missing input usually shows up later
//! as a run error or a missing artifact, which is the more useful diagnostic.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::driver::DeviceClient;
use crate::platform::RemoteDataDir;

/// Errors that prevent staging from starting at all.
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("local data directory {0} does not exist")]
    MissingDataDir(PathBuf),

    #[error("local data path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to list {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file found under the local data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Path on the host.
    pub path: PathBuf,
    /// Path relative to the data directory root, `/`-separated.
    pub relative: String,
}

/// What happened to one file during staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Pushed { bytes: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub local: LocalFile,
    pub remote_path: String,
    pub outcome: StageOutcome,
}

/// Per-file results of a staging pass, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub files: Vec<StagedFile>,
}

impl StagingReport {
    pub fn pushed(&self) -> impl Iterator<Item = &StagedFile> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, StageOutcome::Pushed { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &StagedFile> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, StageOutcome::Failed { .. }))
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn total_bytes(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.outcome {
                StageOutcome::Pushed { bytes } => bytes,
                StageOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Convert a path relative to the data root into a device-relative path.
///
/// Components are joined with `/` whatever the host separator is.
pub fn device_relative_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().replace('\\', "/")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively list every non-directory entry under `root`.
///
/// Entries are sorted by name within each directory so the order is stable
/// across runs and hosts.
pub fn list_local_files(root: &Path) -> Result<Vec<LocalFile>, StagingError> {
    if !root.exists() {
        return Err(StagingError::MissingDataDir(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(StagingError::NotADirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    Ok(files)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<LocalFile>) -> Result<(), StagingError> {
    let walk_err = |source| StagingError::Walk {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = std::fs::read_dir(dir)
        .map_err(walk_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(walk_err)?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(walk_err)?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if path.is_dir() {
            // Symlinked directory: not a file, and not descended into.
            continue;
        } else {
            let relative = path
                .strip_prefix(root)
                .map(device_relative_path)
                .unwrap_or_else(|_| entry.file_name().to_string_lossy().into_owned());
            out.push(LocalFile { path, relative });
        }
    }
    Ok(())
}

/// Push every file under `local_root` to the matching path under `remote`.
///
/// Returns an error only when the local directory cannot be listed. Read and
/// push failures for individual files are logged and recorded in the report.
pub async fn stage_files(
    client: &dyn DeviceClient,
    local_root: &Path,
    remote: &RemoteDataDir,
) -> Result<StagingReport, StagingError> {
    let files = list_local_files(local_root)?;
    info!(
        local = %local_root.display(),
        remote = %remote,
        count = files.len(),
        "staging files"
    );

    let mut report = StagingReport::default();
    for local in files {
        let remote_path = remote.join(&local.relative);
        debug!(local = %local.path.display(), remote = %remote_path, "pushing file");

        let outcome = match tokio::fs::read(&local.path).await {
            Ok(contents) => match client.push_file(&remote_path, &contents).await {
                Ok(()) => StageOutcome::Pushed { bytes: contents.len() },
                Err(e) => {
                    warn!(remote = %remote_path, error = %e, "push failed");
                    StageOutcome::Failed { reason: e.to_string() }
                }
            },
            Err(e) => {
                warn!(local = %local.path.display(), error = %e, "read failed");
                StageOutcome::Failed { reason: e.to_string() }
            }
        };

        report.files.push(StagedFile {
            local,
            remote_path,
            outcome,
        });
    }

    let failed = report.failed().count();
    if failed > 0 {
        warn!(failed, total = report.files.len(), "staging finished with failures");
    } else {
        info!(total = report.files.len(), bytes = report.total_bytes(), "staging finished");
    }
    Ok(report)
}
