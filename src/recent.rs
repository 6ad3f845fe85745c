use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Office keeps `~$Name.pptx` lock files next to open presentations.
const LOCK_FILE_PREFIX: &str = "~$";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentFile {
    pub path: PathBuf,
    pub name: String,
    pub accessed: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub kept: usize,
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Extracted presentations in `dir`, most recently accessed first.
pub fn list_recent(dir: &Path, extension: &str) -> Result<Vec<RecentFile>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .max_depth(Some(1))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(LOCK_FILE_PREFIX) || !path.extension().is_some_and(|e| e == extension) {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let accessed = metadata
            .accessed()
            .or_else(|_| metadata.modified())
            .map(epoch_secs)
            .unwrap_or_default();
        files.push(RecentFile {
            path: path.to_path_buf(),
            name,
            accessed,
        });
    }

    files.sort_by(|a, b| b.accessed.total_cmp(&a.accessed).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Deletes the least recently accessed presentations until at most
/// `threshold` remain, or none when `delete_all` is set. Files that cannot be
/// removed are reported and left in place.
pub fn prune_oldest(dir: &Path, extension: &str, threshold: usize, delete_all: bool) -> Result<PruneReport> {
    let files = list_recent(dir, extension)?;
    let limit = if delete_all { 0 } else { threshold };
    let excess = files.len().saturating_sub(limit);

    let mut report = PruneReport::default();
    for file in files.iter().rev().take(excess) {
        match std::fs::remove_file(&file.path) {
            Ok(()) => {
                debug!("Removed old recent file {}", file.path.display());
                report.removed.push(file.path.clone());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to remove {}: {e}", file.path.display());
                report.skipped.push(file.path.clone());
            }
        }
    }
    report.kept = files.len().saturating_sub(report.removed.len());
    Ok(report)
}

fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
