//! Three-phase reconciliation of the local photo cache against the remote album.
//!
//! 1. Enumerate the album. Any failure aborts with nothing touched.
//! 2. Download every asset the ledger lacks (or whose file vanished). Failures
//!    are counted per asset; each success is persisted immediately.
//! 3. Delete orphans, but only when phase 2 had no failures. An incomplete
//!    picture of what should exist never prunes the cache.

pub mod ledger;
pub mod normalize;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AssetError, NormalizeError, SourceError};
use crate::render::DisplaySlot;
use crate::source::{AssetSource, RemoteAsset};

pub use ledger::{AssetLedger, AssetRecord, LedgerStore};
pub use normalize::local_file_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// All three phases ran.
    Complete,
    /// Some downloads failed; the delete phase was skipped.
    PartialNoDelete,
    /// Enumeration failed; nothing was changed.
    Fatal,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Complete => "complete",
            Self::PartialNoDelete => "partial-no-delete",
            Self::Fatal => "fatal",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedAsset {
    pub id: String,
    pub local_file: String,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub status: SyncStatus,
    /// Newly downloaded assets.
    pub added: Vec<SyncedAsset>,
    /// Orphans whose files and ledger entries were removed.
    pub removed: Vec<SyncedAsset>,
    /// Orphans kept for another cycle because they are on display.
    pub deferred: Vec<SyncedAsset>,
    /// Remote assets already cached.
    pub skipped: usize,
    /// Assets that failed to download or normalize.
    pub failed: usize,
    /// Why the sync was fatal.
    pub error: Option<String>,
}

impl SyncReport {
    fn new(status: SyncStatus) -> Self {
        Self {
            status,
            added: Vec::new(),
            removed: Vec::new(),
            deferred: Vec::new(),
            skipped: 0,
            failed: 0,
            error: None,
        }
    }

    fn fatal(err: &SourceError) -> Self {
        let mut report = Self::new(SyncStatus::Fatal);
        report.error = Some(format!("{err:#}"));
        report
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub album: String,
    pub cache_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub jpeg_quality: u8,
}

pub struct SyncEngine<S> {
    source: S,
    album: String,
    cache_dir: PathBuf,
    jpeg_quality: u8,
    ledger_store: LedgerStore,
    /// Also the sync gate: whoever holds it is the only sync in flight.
    ledger: Mutex<AssetLedger>,
}

impl<S: AssetSource> SyncEngine<S> {
    pub fn new(source: S, options: SyncOptions) -> Self {
        let ledger_store = LedgerStore::new(options.ledger_path);
        let ledger = ledger_store.load();
        Self {
            source,
            album: options.album,
            cache_dir: options.cache_dir,
            jpeg_quality: options.jpeg_quality,
            ledger_store,
            ledger: Mutex::new(ledger),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs a sync, waiting for any sync already in flight to finish first.
    pub async fn sync(&self, display: &DisplaySlot) -> SyncReport {
        let ledger = self.ledger.lock().await;
        self.run_locked(ledger, display).await
    }

    /// Runs a sync unless one is already in flight.
    pub async fn try_sync(&self, display: &DisplaySlot) -> Option<SyncReport> {
        let ledger = self.ledger.try_lock().ok()?;
        Some(self.run_locked(ledger, display).await)
    }

    pub async fn ledger_snapshot(&self) -> AssetLedger {
        self.ledger.lock().await.clone()
    }

    /// Cache files the last complete sync left in place because they were on
    /// display. Empty while a sync holds the ledger.
    pub fn deferred_files(&self) -> HashSet<String> {
        match self.ledger.try_lock() {
            Ok(ledger) => ledger.deferred_files().map(str::to_string).collect(),
            Err(_) => HashSet::new(),
        }
    }

    #[instrument(skip_all, fields(album = %self.album))]
    async fn run_locked(
        &self,
        mut ledger: MutexGuard<'_, AssetLedger>,
        display: &DisplaySlot,
    ) -> SyncReport {
        info!("sync started");

        // Phase 1
        let remote = match self.enumerate().await {
            Ok(remote) => remote,
            Err(err) => {
                error!(error = %err, "sync aborted: enumeration failed");
                return SyncReport::fatal(&err);
            }
        };
        info!(remote = remote.len(), "album enumerated");

        // Phase 2
        let mut report = SyncReport::new(SyncStatus::Complete);
        self.download_missing(&remote, &mut ledger, &mut report).await;
        if report.failed > 0 {
            warn!(
                downloaded = report.added.len(),
                failed = report.failed,
                "sync aborted before delete phase: download failures detected"
            );
            report.status = SyncStatus::PartialNoDelete;
            return report;
        }
        info!(
            downloaded = report.added.len(),
            skipped = report.skipped,
            "download phase complete"
        );

        // Phase 3
        let remote_ids: HashSet<&str> = remote.iter().map(|a| a.id.as_str()).collect();
        self.delete_orphans(&remote_ids, &mut ledger, display, &mut report)
            .await;

        info!(
            downloaded = report.added.len(),
            skipped = report.skipped,
            deleted = report.removed.len(),
            deferred = report.deferred.len(),
            "sync complete"
        );
        report
    }

    async fn enumerate(&self) -> Result<Vec<RemoteAsset>, SourceError> {
        let listed = self.source.list_assets(&self.album).await?;
        let mut seen = HashSet::new();
        let mut remote = Vec::with_capacity(listed.len());
        for asset in listed {
            if asset.id.is_empty() {
                warn!(filename = %asset.filename, "ignoring remote asset without an id");
                continue;
            }
            if seen.insert(asset.id.clone()) {
                remote.push(asset);
            }
        }
        Ok(remote)
    }

    async fn download_missing(
        &self,
        remote: &[RemoteAsset],
        ledger: &mut AssetLedger,
        report: &mut SyncReport,
    ) {
        for asset in remote {
            let existing = ledger.get(&asset.id).cloned();
            if let Some(record) = &existing {
                if self.cache_dir.join(&record.local_file).is_file() {
                    report.skipped += 1;
                    continue;
                }
                warn!(id = %asset.id, file = %record.local_file, "cached file missing; downloading again");
            }

            info!(id = %asset.id, filename = %asset.filename, "downloading asset");
            let local_file = local_file_for(&asset.id);
            match self.fetch(&asset.id, &local_file).await {
                Ok(()) => {
                    let added_at = existing.map_or_else(Utc::now, |record| record.added_at);
                    ledger.insert(
                        asset.id.clone(),
                        AssetRecord {
                            local_file: local_file.clone(),
                            added_at,
                        },
                    );
                    if let Err(err) = self.ledger_store.save(ledger) {
                        error!(id = %asset.id, error = ?err, "failed to persist asset ledger");
                        report.failed += 1;
                    }
                    report.added.push(SyncedAsset {
                        id: asset.id.clone(),
                        local_file,
                    });
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        id = %asset.id,
                        filename = %asset.filename,
                        error = ?err,
                        "failed to process asset"
                    );
                }
            }
        }
    }

    async fn fetch(&self, id: &str, local_file: &str) -> Result<(), AssetError> {
        let bytes = self.source.download_asset(id).await?;
        let dest = self.cache_dir.join(local_file);
        let quality = self.jpeg_quality;
        let cache_dir = self.cache_dir.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_dir).map_err(|source| NormalizeError::Io {
                path: cache_dir.clone(),
                source,
            })?;
            normalize::normalize_to_jpeg(&bytes, &dest, quality)
        })
        .await??;
        Ok(())
    }

    async fn delete_orphans(
        &self,
        remote_ids: &HashSet<&str>,
        ledger: &mut AssetLedger,
        display: &DisplaySlot,
        report: &mut SyncReport,
    ) {
        let orphans: Vec<SyncedAsset> = ledger
            .iter()
            .filter(|(id, _)| !remote_ids.contains(id))
            .map(|(id, record)| SyncedAsset {
                id: id.to_string(),
                local_file: record.local_file.clone(),
            })
            .collect();

        if !orphans.is_empty() {
            // Waits out any render in progress and blocks new ones until done.
            let on_display = display.lock().await;
            for orphan in orphans {
                if on_display.as_deref() == Some(orphan.local_file.as_str()) {
                    info!(id = %orphan.id, file = %orphan.local_file, "orphan is on display; deferring delete");
                    report.deferred.push(orphan);
                    continue;
                }
                info!(id = %orphan.id, file = %orphan.local_file, "deleting orphaned file");
                match delete_if_exists(&self.cache_dir.join(&orphan.local_file)) {
                    Ok(()) => {
                        ledger.remove(&orphan.id);
                        report.removed.push(orphan);
                    }
                    Err(err) => {
                        warn!(id = %orphan.id, error = %err, "failed to delete orphan; will retry next sync");
                    }
                }
            }
        }

        let deferred: BTreeSet<String> = report.deferred.iter().map(|a| a.id.clone()).collect();
        let deferred_changed = ledger.set_deferred(deferred);
        if !report.removed.is_empty() || deferred_changed {
            if let Err(err) = self.ledger_store.save(ledger) {
                error!(error = ?err, "failed to persist asset ledger after deletes");
            }
        }
    }
}

fn delete_if_exists(p: &Path) -> io::Result<()> {
    match std::fs::remove_file(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %p.display(), "delete: file already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
