//! Copies whitelisted volume files into the repository tree.
//!
//! A file is considered unchanged when the target has the same modification
//! time and size; copies carry the source modification time over so that a
//! second run over unchanged volumes copies nothing.

use crate::command::CommandError;
use crate::vcs::{default_commit_message, Vcs};
use crate::volume::VolumeResolver;
use crate::whitelist::Whitelist;
use indexmap::IndexMap;
use std::collections::HashSet;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to resolve volume {volume}: {source}")]
    Resolve {
        volume: String,
        #[source]
        source: CommandError,
    },

    #[error("volume path does not exist: {}", .0.display())]
    MissingVolumePath(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SyncError + '_ {
    move |source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub clean_orphans: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeReport {
    pub volume: String,
    pub service: String,
    /// Whitelisted files present in the volume
    pub synced: usize,
    pub skipped: usize,
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub reports: Vec<VolumeReport>,
    pub failures: Vec<(String, SyncError)>,
}

impl SyncSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn copied(&self) -> usize {
        self.reports.iter().map(|r| r.copied).sum()
    }

    pub fn removed(&self) -> usize {
        self.reports.iter().map(|r| r.removed).sum()
    }
}

pub struct VolumeSync<'a, R: VolumeResolver> {
    resolver: &'a R,
    whitelist: &'a Whitelist,
    configs_root: PathBuf,
    options: SyncOptions,
}

impl<'a, R: VolumeResolver> VolumeSync<'a, R> {
    pub fn new(
        resolver: &'a R,
        whitelist: &'a Whitelist,
        configs_root: &Path,
        options: SyncOptions,
    ) -> Self {
        Self {
            resolver,
            whitelist,
            configs_root: configs_root.to_path_buf(),
            options,
        }
    }

    /// Syncs every volume in order. A failing volume is logged and recorded,
    /// the remaining volumes still run.
    pub fn sync_all(&self, volumes: &IndexMap<String, String>) -> SyncSummary {
        info!("Starting Docker volume sync");
        let mut summary = SyncSummary::default();

        for (volume, service) in volumes {
            match self.sync_volume(volume, service) {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    error!("Failed to sync volume {}: {}", volume, e);
                    summary.failures.push((volume.clone(), e));
                }
            }
        }

        info!(
            "Sync completed: {}/{} volumes synced successfully",
            summary.reports.len(),
            volumes.len()
        );
        summary
    }

    pub fn sync_volume(&self, volume: &str, service: &str) -> Result<VolumeReport, SyncError> {
        let target_root = self.configs_root.join(service);
        info!("Syncing volume {} to {}", volume, target_root.display());

        let volume_root = self
            .resolver
            .resolve_volume_path(volume)
            .map_err(|source| SyncError::Resolve {
                volume: volume.to_string(),
                source,
            })?;
        if !volume_root.is_dir() {
            return Err(SyncError::MissingVolumePath(volume_root));
        }

        if !self.options.dry_run {
            fs::create_dir_all(&target_root).map_err(io_error(&target_root))?;
        }

        let mut report = VolumeReport {
            volume: volume.to_string(),
            service: service.to_string(),
            ..Default::default()
        };
        let mut keep = HashSet::new();

        for source in walk_files(&volume_root)? {
            let relative = relative_to(&source, &volume_root);
            if !self.whitelist.should_include(service, &relative) {
                report.skipped += 1;
                continue;
            }

            let target = target_root.join(&relative);
            if self.options.dry_run {
                info!("Would copy: {}", relative.display());
            } else if files_identical(&source, &target) {
                debug!("Unchanged: {}", relative.display());
                report.unchanged += 1;
            } else {
                copy_preserving_mtime(&source, &target)?;
                info!("Copied: {}", relative.display());
                report.copied += 1;
            }

            report.synced += 1;
            keep.insert(relative);
        }

        info!(
            "Volume {}: {} files synced, {} files skipped",
            volume, report.synced, report.skipped
        );

        if self.options.clean_orphans {
            report.removed = self.clean_orphans(&target_root, &keep)?;
        }

        Ok(report)
    }

    /// Removes files under `target_root` whose relative path is not in `keep`.
    fn clean_orphans(
        &self,
        target_root: &Path,
        keep: &HashSet<PathBuf>,
    ) -> Result<usize, SyncError> {
        info!("Cleaning orphaned files in {}", target_root.display());
        if !target_root.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        for file in walk_files(target_root)? {
            let relative = relative_to(&file, target_root);
            if keep.contains(&relative) {
                continue;
            }
            if self.options.dry_run {
                info!("Would remove orphaned file: {}", relative.display());
            } else {
                fs::remove_file(&file).map_err(io_error(&file))?;
                info!("Removed orphaned file: {}", relative.display());
            }
            removed += 1;
        }

        if removed == 0 {
            info!("No orphaned files found in {}", target_root.display());
        } else {
            info!(
                "Removed {} orphaned files from {}",
                removed,
                target_root.display()
            );
        }
        Ok(removed)
    }
}

/// All regular files below `root`, sorted. Symlinked directories are not
/// descended into.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut files = Vec::new();
    walk_into(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_into(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SyncError> {
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_error(&path))?;

        if file_type.is_dir() {
            walk_into(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn files_identical(source: &Path, target: &Path) -> bool {
    let (Ok(a), Ok(b)) = (fs::metadata(source), fs::metadata(target)) else {
        return false;
    };
    match (a.modified(), b.modified()) {
        (Ok(ma), Ok(mb)) => ma == mb && a.len() == b.len(),
        _ => false,
    }
}

fn copy_preserving_mtime(source: &Path, target: &Path) -> Result<(), SyncError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::copy(source, target).map_err(io_error(source))?;

    // by path, so read-only copies still get their mtime
    let modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .map_err(io_error(source))?;
    filetime::set_file_mtime(target, FileTime::from_system_time(modified))
        .map_err(io_error(target))
}

/// Logs pending changes and, when asked to, commits `paths`.
///
/// Returns false only when a version control command failed.
pub fn record_changes<V: Vcs>(
    vcs: &V,
    paths: &[PathBuf],
    auto_commit: bool,
    dry_run: bool,
    message: Option<&str>,
) -> bool {
    let changes = match vcs.status() {
        Ok(changes) => changes,
        Err(e) => {
            error!("Git status check failed: {}", e);
            return false;
        }
    };

    if changes.is_empty() {
        info!("No git changes detected");
        return true;
    }
    info!("Git changes detected:");
    for line in &changes {
        info!("  {}", line);
    }

    if !auto_commit {
        return true;
    }
    if dry_run {
        info!("Dry run: Would add and commit changes to git");
        return true;
    }

    let message = message
        .map(str::to_string)
        .unwrap_or_else(|| default_commit_message(&chrono::Local::now()));
    match vcs.commit(paths, &message) {
        Ok(true) => {
            info!("Changes committed: {}", message);
            true
        }
        Ok(false) => {
            info!("No changes to commit");
            true
        }
        Err(e) => {
            error!("Git commit failed: {}", e);
            false
        }
    }
}
