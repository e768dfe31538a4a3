//! The sync orchestrator.
//!
//! Every pass runs the same core, [`SyncEngine::reconcile`]:
//!
//! 1. claim the pass's roots in the lock registry;
//! 2. per root, check availability, scan, load stored state and classify;
//! 3. flush deletions (never for offline roots);
//! 4. stream new, modified and rescan targets through the worker pool,
//!    flushing every `batch_size` results in one transaction;
//! 5. refresh the folders table and emit the completion marker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;

use gallery_core::config::GalleryConfig;
use gallery_core::thumbnail::thumbnail_path;
use gallery_core::types::{EpochSecs, FileId};
use gallery_db::models::file::FileUpsert;
use gallery_db::repositories::{FileRepo, FolderRepo};
use gallery_db::DbPool;
use gallery_events::{EtaEstimator, Phase, ProgressEvent, ProgressSink};

use crate::diff::{classify, ChangeSet};
use crate::error::SyncError;
use crate::file_worker::{process_file, FileJob, FileOutcome, WorkerSnapshot};
use crate::lock::RootLocks;
use crate::scan::{root_available, scan_dir};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which unchanged files a rescan reprocesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanMode {
    /// Every indexed file.
    All,
    /// Files whose `last_scanned` is older than the given age.
    OlderThan(Duration),
}

/// Counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Whitelisted files found on available roots.
    pub scanned: usize,
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
    /// Unchanged files reprocessed by a rescan.
    pub rescanned: usize,
    pub deleted: usize,
    /// Stored files under offline roots that were kept.
    pub suppressed_deletes: usize,
    /// Files that could not be processed; they are retried next pass.
    pub failed: usize,
    /// Upsert transactions committed.
    pub flushes: usize,
    pub offline_roots: Vec<String>,
}

impl SyncReport {
    /// Files handed to the worker pool.
    pub fn dispatched(&self) -> usize {
        self.new + self.modified + self.rescanned
    }
}

/// One root or folder covered by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    path: PathBuf,
    recursive: bool,
    /// The removable mount this scope lives on, if any.
    mount: Option<PathBuf>,
    /// Nested mount scopes that are scanned, and guarded, on their own.
    excluded: Vec<PathBuf>,
}

/// Whether a pass reports progress when it finds nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reporting {
    Always,
    OnlyWithChanges,
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

/// Reconciles the configured roots with the index.
///
/// Cheap to clone; clones share the pool and the lock registry.
#[derive(Clone)]
pub struct SyncEngine {
    pool: DbPool,
    config: Arc<GalleryConfig>,
    locks: RootLocks,
}

impl SyncEngine {
    pub fn new(pool: DbPool, config: GalleryConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            locks: RootLocks::new(),
        }
    }

    pub fn config(&self) -> &GalleryConfig {
        &self.config
    }

    /// Sync every configured root.
    pub async fn full_sync(&self, sink: &dyn ProgressSink) -> Result<SyncReport, SyncError> {
        let scopes = self.root_scopes()?;
        self.reconcile(scopes, None, Reporting::Always, sink).await
    }

    /// Sync a single folder. Emits nothing when the folder has no changes.
    pub async fn sync_folder(
        &self,
        folder: &Path,
        recursive: bool,
        sink: &dyn ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        let folder = normalize(folder);
        let mounts: Vec<PathBuf> = self.config.extra_roots.iter().map(|r| normalize(r)).collect();

        let mount = mounts.iter().find(|root| folder.starts_with(root)).cloned();
        let mut scopes = vec![Scope {
            path: folder.clone(),
            recursive,
            mount,
            excluded: Vec::new(),
        }];
        if recursive {
            scopes.extend(
                mounts
                    .into_iter()
                    .filter(|root| *root != folder && root.starts_with(&folder))
                    .map(|root| Scope {
                        path: root.clone(),
                        recursive,
                        mount: Some(root),
                        excluded: Vec::new(),
                    }),
            );
        }
        self.reconcile(dedupe_scopes(scopes), None, Reporting::OnlyWithChanges, sink)
            .await
    }

    /// Sync every root and additionally reprocess unchanged files selected
    /// by `mode`, e.g. after extraction rules improved.
    pub async fn rescan(
        &self,
        mode: RescanMode,
        sink: &dyn ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        let scopes = self.root_scopes()?;
        self.reconcile(scopes, Some(mode), Reporting::Always, sink)
            .await
    }

    fn root_scopes(&self) -> Result<Vec<Scope>, SyncError> {
        let primary = self.config.roots.iter().map(|root| Scope {
            path: normalize(root),
            recursive: self.config.recursive,
            mount: None,
            excluded: Vec::new(),
        });
        let extra = self.config.extra_roots.iter().map(|root| Scope {
            path: normalize(root),
            recursive: self.config.recursive,
            mount: Some(normalize(root)),
            excluded: Vec::new(),
        });
        let scopes = dedupe_scopes(primary.chain(extra).collect());
        if scopes.is_empty() {
            return Err(SyncError::NoRoots);
        }
        Ok(scopes)
    }

    // -----------------------------------------------------------------------
    // Core pass
    // -----------------------------------------------------------------------

    async fn reconcile(
        &self,
        scopes: Vec<Scope>,
        rescan: Option<RescanMode>,
        reporting: Reporting,
        sink: &dyn ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        let paths: Vec<PathBuf> = scopes.iter().map(|s| s.path.clone()).collect();
        let _guard = self.locks.acquire(&paths)?;

        let label = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let now = chrono::Utc::now().timestamp();
        let mut report = SyncReport::default();

        if reporting == Reporting::Always {
            sink.report(ProgressEvent::new(Phase::Scanning, 0, 0).with_root(label.clone()));
        }

        // -- Scan and classify ----------------------------------------------
        let mut changes = ChangeSet::default();
        let mut folders_seen = Vec::new();

        for scope in &scopes {
            let scope_path = scope.path.to_string_lossy().to_string();
            let mut stored =
                FileRepo::list_states_under(&self.pool, &scope_path, scope.recursive).await?;
            stored.retain(|state| {
                !scope
                    .excluded
                    .iter()
                    .any(|dir| Path::new(&state.path).starts_with(dir))
            });

            if !self.scope_available(scope) {
                tracing::warn!(
                    root = %scope_path,
                    kept = stored.len(),
                    "Root offline, deletions suppressed",
                );
                report.suppressed_deletes += stored.len();
                report.offline_roots.push(scope_path);
                continue;
            }

            let (root, recursive) = (scope.path.clone(), scope.recursive);
            let whitelist = self.config.extensions.clone();
            let mut exclude = scope.excluded.clone();
            exclude.push(self.config.thumbnail_dir.clone());
            let scanned = tokio::task::spawn_blocking(move || {
                scan_dir(&root, recursive, &whitelist, &exclude)
            })
            .await?;

            report.scanned += scanned.files.len();
            folders_seen.push((scope.clone(), scanned.folders));
            changes.merge(classify(scanned.files, stored));
        }

        report.new = changes.new.len();
        report.modified = changes.modified.len();
        let targets = rescan_targets(&mut changes, rescan, now);
        report.rescanned = targets.len();
        report.unchanged = changes.unchanged.len();

        let mut jobs: Vec<FileJob> = changes
            .new
            .into_iter()
            .chain(changes.modified)
            .chain(targets)
            .map(FileJob::from)
            .collect();
        jobs.sort_by(|a, b| a.path.cmp(&b.path));

        let has_work = !jobs.is_empty() || !changes.deleted.is_empty();
        let report_progress = reporting == Reporting::Always || has_work;

        // -- Deletions --------------------------------------------------------
        let deleted_ids: Vec<FileId> = changes.deleted.into_iter().map(|s| s.id).collect();
        for chunk in deleted_ids.chunks(self.batch_size()) {
            let stats = FileRepo::flush_batch(&self.pool, &[], chunk).await?;
            report.deleted += stats.deleted;
            self.remove_thumbnails(chunk).await;
        }

        // -- Processing -------------------------------------------------------
        let total = jobs.len();
        if total > 0 {
            self.process_jobs(jobs, now, &label, report_progress, sink, &mut report)
                .await?;
        }

        // -- Folders ----------------------------------------------------------
        for (scope, folders) in &folders_seen {
            FolderRepo::replace_under(
                &self.pool,
                &scope.path.to_string_lossy(),
                scope.recursive,
                folders,
            )
            .await?;
        }

        if report_progress {
            sink.report(ProgressEvent::complete(total).with_root(label.clone()));
        }

        if has_work || reporting == Reporting::Always {
            tracing::info!(
                roots = %label,
                scanned = report.scanned,
                new = report.new,
                modified = report.modified,
                rescanned = report.rescanned,
                deleted = report.deleted,
                suppressed_deletes = report.suppressed_deletes,
                failed = report.failed,
                flushes = report.flushes,
                "Sync pass complete",
            );
        } else {
            tracing::debug!(roots = %label, "Sync pass found no changes");
        }

        Ok(report)
    }

    /// Run `jobs` through the worker pool, persisting results in batches.
    ///
    /// Results arrive in completion order. A failed flush aborts the pass;
    /// earlier batches stay committed.
    async fn process_jobs(
        &self,
        jobs: Vec<FileJob>,
        now: EpochSecs,
        label: &str,
        report_progress: bool,
        sink: &dyn ProgressSink,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let total = jobs.len();
        let batch_size = self.batch_size();
        let workers = self.config.workers.max(1);
        let snapshot = Arc::new(WorkerSnapshot::from_config(&self.config, now));
        let eta = EtaEstimator::start();

        tracing::info!(
            files = total,
            workers,
            batch_size,
            "Processing changed files",
        );

        let mut results = futures::stream::iter(
            jobs.into_iter()
                .map(|job| process_file(job, Arc::clone(&snapshot))),
        )
        .buffer_unordered(workers);

        let mut batch: Vec<FileUpsert> = Vec::with_capacity(batch_size.min(total));
        let mut processed = 0;

        while let Some(outcome) = results.next().await {
            processed += 1;
            match outcome {
                FileOutcome::Processed(upsert) => batch.push(upsert),
                FileOutcome::Failed { .. } => report.failed += 1,
            }

            if batch.len() >= batch_size {
                self.flush(&mut batch, report).await?;
            }

            if report_progress {
                sink.report(
                    ProgressEvent::new(Phase::Processing, processed, total)
                        .with_eta(eta.eta_secs(processed, total))
                        .with_root(label),
                );
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, report).await?;
        }
        Ok(())
    }

    async fn flush(
        &self,
        batch: &mut Vec<FileUpsert>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let stats = FileRepo::flush_batch(&self.pool, batch, &[]).await?;
        tracing::debug!(rows = stats.upserted, "Flushed batch");
        report.flushes += 1;
        batch.clear();
        Ok(())
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    fn scope_available(&self, scope: &Scope) -> bool {
        let mount_ok = scope
            .mount
            .as_deref()
            .map_or(true, |mount| root_available(mount, true));
        mount_ok && root_available(&scope.path, false)
    }

    async fn remove_thumbnails(&self, ids: &[FileId]) {
        for id in ids {
            let path = thumbnail_path(&self.config.thumbnail_dir, id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to remove thumbnail");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Rebuild a path from its components so `/out/` and `/out` name the same
/// scope as the folder stored for files directly inside it.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Merge duplicate scopes and drop scopes covered by a recursive ancestor.
///
/// Mount scopes are never dropped: their ancestors skip them instead, so an
/// unmounted drive keeps its files even when it sits inside another root.
fn dedupe_scopes(scopes: Vec<Scope>) -> Vec<Scope> {
    let mut unique: Vec<Scope> = Vec::new();
    for scope in scopes {
        match unique.iter_mut().find(|s| s.path == scope.path) {
            Some(existing) => {
                existing.recursive |= scope.recursive;
                if existing.mount.is_none() {
                    existing.mount = scope.mount;
                }
            }
            None => unique.push(scope),
        }
    }

    let covered = |scope: &Scope| {
        unique.iter().any(|other| {
            other.recursive && other.path != scope.path && scope.path.starts_with(&other.path)
        })
    };
    let kept: Vec<Scope> = unique
        .iter()
        .filter(|scope| scope.mount.is_some() || !covered(*scope))
        .cloned()
        .collect();

    kept.iter()
        .map(|scope| {
            let mut scope = scope.clone();
            if scope.recursive {
                scope.excluded = kept
                    .iter()
                    .filter(|other| {
                        other.mount.is_some()
                            && other.path != scope.path
                            && other.path.starts_with(&scope.path)
                    })
                    .map(|other| other.path.clone())
                    .collect();
            }
            scope
        })
        .collect()
}

/// Move the unchanged files selected by `mode` out of `changes`.
fn rescan_targets(
    changes: &mut ChangeSet,
    mode: Option<RescanMode>,
    now: EpochSecs,
) -> Vec<crate::scan::ScannedFile> {
    let Some(mode) = mode else {
        return Vec::new();
    };
    let cutoff = match mode {
        RescanMode::All => EpochSecs::MAX,
        RescanMode::OlderThan(age) => now.saturating_sub(age.as_secs() as EpochSecs),
    };

    let (targets, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut changes.unchanged)
        .into_iter()
        .partition(|u| u.last_scanned < cutoff);
    changes.unchanged = kept;
    targets.into_iter().map(|u| u.file).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Unchanged;
    use crate::scan::ScannedFile;

    fn scope(path: &str, recursive: bool) -> Scope {
        Scope {
            path: PathBuf::from(path),
            recursive,
            mount: None,
            excluded: Vec::new(),
        }
    }

    fn mount(path: &str) -> Scope {
        Scope {
            mount: Some(PathBuf::from(path)),
            ..scope(path, true)
        }
    }

    fn unchanged(path: &str, last_scanned: EpochSecs) -> Unchanged {
        Unchanged {
            file: ScannedFile {
                path: PathBuf::from(path),
                size: 1,
                mtime: 1,
            },
            last_scanned,
        }
    }

    // -- dedupe_scopes ----------------------------------------------------

    #[test]
    fn nested_scope_under_recursive_root_is_dropped() {
        let scopes = dedupe_scopes(vec![
            scope("/media", true),
            scope("/media/sub", true),
            scope("/media", true),
            scope("/other", true),
        ]);
        let paths: Vec<_> = scopes.iter().map(|s| s.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/media"), PathBuf::from("/other")]);
    }

    #[test]
    fn nested_scope_under_flat_root_is_kept() {
        let scopes = dedupe_scopes(vec![scope("/media", false), scope("/media/sub", true)]);
        assert_eq!(scopes.len(), 2);
    }

    #[test]
    fn nested_mount_is_kept_and_excluded_from_parent() {
        let scopes = dedupe_scopes(vec![scope("/data", true), mount("/data/usb")]);
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0].path, PathBuf::from("/data"));
        assert_eq!(scopes[0].excluded, vec![PathBuf::from("/data/usb")]);
        assert_eq!(scopes[1].mount, Some(PathBuf::from("/data/usb")));
        assert!(scopes[1].excluded.is_empty());
    }

    #[test]
    fn duplicate_scope_keeps_mount_guard() {
        let scopes = dedupe_scopes(vec![scope("/data", false), mount("/data")]);
        assert_eq!(scopes.len(), 1);
        assert!(scopes[0].recursive);
        assert_eq!(scopes[0].mount, Some(PathBuf::from("/data")));
    }

    // -- normalize --------------------------------------------------------

    #[test]
    fn trailing_separator_is_dropped() {
        assert_eq!(normalize(Path::new("/out/")), PathBuf::from("/out"));
        assert_eq!(normalize(Path::new("/out/./gen//")), PathBuf::from("/out/gen"));
        assert_eq!(
            normalize(Path::new("/out/")).to_string_lossy(),
            Path::new("/out/a.png").parent().unwrap().to_string_lossy()
        );
    }

    // -- rescan_targets ---------------------------------------------------

    #[test]
    fn no_mode_selects_nothing() {
        let mut changes = ChangeSet {
            unchanged: vec![unchanged("/a.png", 0)],
            ..Default::default()
        };
        assert!(rescan_targets(&mut changes, None, 100).is_empty());
        assert_eq!(changes.unchanged.len(), 1);
    }

    #[test]
    fn older_than_selects_stale_files() {
        let mut changes = ChangeSet {
            unchanged: vec![unchanged("/old.png", 10), unchanged("/fresh.png", 95)],
            ..Default::default()
        };
        let targets = rescan_targets(
            &mut changes,
            Some(RescanMode::OlderThan(Duration::from_secs(50))),
            100,
        );
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].path, PathBuf::from("/old.png"));
        assert_eq!(changes.unchanged.len(), 1);
    }

    #[test]
    fn all_selects_everything() {
        let mut changes = ChangeSet {
            unchanged: vec![unchanged("/a.png", 10), unchanged("/b.png", 100)],
            ..Default::default()
        };
        let targets = rescan_targets(&mut changes, Some(RescanMode::All), 100);
        assert_eq!(targets.len(), 2);
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn dispatched_counts_worker_input() {
        let report = SyncReport {
            new: 2,
            modified: 1,
            rescanned: 3,
            ..Default::default()
        };
        assert_eq!(report.dispatched(), 6);
    }
}
