use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Configuration, SelectionOptions};
use crate::events::{FrameEvent, SyncTrigger};
use crate::library;
use crate::render::{DisplaySlot, Renderer};
use crate::selection::Selector;
use crate::source::AssetSource;
use crate::state::{PersistentState, StateStore, Style};
use crate::sync::{SyncEngine, SyncOptions, SyncReport, SyncStatus};

#[derive(Debug, Clone)]
pub struct FrameOptions {
    pub cache_dir: PathBuf,
    pub state_path: PathBuf,
    pub ledger_path: PathBuf,
    pub album: String,
    pub jpeg_quality: u8,
    pub selection: SelectionOptions,
}

impl From<&Configuration> for FrameOptions {
    fn from(cfg: &Configuration) -> Self {
        Self {
            cache_dir: cfg.photo_cache_path.clone(),
            state_path: cfg.state_path.clone(),
            ledger_path: cfg.ledger_path.clone(),
            album: cfg.album.clone(),
            jpeg_quality: cfg.jpeg_quality,
            selection: cfg.selection,
        }
    }
}

struct Shared {
    state: PersistentState,
    selector: Selector,
    /// Cache files awaiting deletion; never selected.
    retired: HashSet<String>,
}

/// Owns the state, the sync engine and the renderer, and turns triggers into
/// sync / select / render sequences.
///
/// Lock order: the display slot before the shared state. Sync takes the
/// display slot only from inside its own gate and never the shared state
/// while holding it.
pub struct Frame<S, R> {
    store: StateStore,
    shared: Mutex<Shared>,
    sync: SyncEngine<S>,
    renderer: R,
    display: DisplaySlot,
    cache_dir: PathBuf,
}

impl<S: AssetSource, R: Renderer> Frame<S, R> {
    pub fn new(source: S, renderer: R, options: FrameOptions) -> Self {
        let store = StateStore::new(options.state_path);
        let state = store.load();
        let sync = SyncEngine::new(
            source,
            SyncOptions {
                album: options.album,
                cache_dir: options.cache_dir.clone(),
                ledger_path: options.ledger_path,
                jpeg_quality: options.jpeg_quality,
            },
        );
        let retired = sync.deferred_files();
        if !retired.is_empty() {
            info!(count = retired.len(), "orphans awaiting deletion kept out of rotation");
        }
        Self {
            store,
            shared: Mutex::new(Shared {
                state,
                selector: Selector::new(options.selection),
                retired,
            }),
            sync,
            renderer,
            display: DisplaySlot::new(),
            cache_dir: options.cache_dir,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn source(&self) -> &S {
        self.sync.source()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub async fn state_snapshot(&self) -> PersistentState {
        self.shared.lock().await.state.clone()
    }

    /// Cache file currently on the panel.
    pub async fn current_image(&self) -> Option<String> {
        self.display.current().await
    }

    pub async fn handle(&self, event: FrameEvent) {
        match event {
            FrameEvent::Advance => {
                self.refresh_display().await;
            }
            FrameEvent::SyncNow => self.sync_and_refresh(SyncTrigger::Manual).await,
            FrameEvent::SetStyle(style) => self.set_style(style).await,
        }
    }

    /// Selects the next image and puts it on the panel.
    ///
    /// The selection is committed and persisted before the render, so an image
    /// the panel cannot show still leaves the unseen queue and the next
    /// refresh moves on. The state lock is released for the render itself.
    #[instrument(skip(self))]
    pub async fn refresh_display(&self) -> Option<String> {
        let mut on_display = self.display.lock().await;

        let available = match library::list_images(&self.cache_dir) {
            Ok(names) => names,
            Err(err) => {
                warn!(dir = %self.cache_dir.display(), error = %err, "failed to scan photo cache");
                return None;
            }
        };

        let (chosen, style) = {
            let mut shared = self.shared.lock().await;
            let Shared {
                state,
                selector,
                retired,
            } = &mut *shared;
            let candidates: Vec<String> = available
                .into_iter()
                .filter(|name| !retired.contains(name))
                .collect();

            let Some(chosen) = selector.choose_next(state, &candidates, Utc::now()) else {
                info!("no images available to display");
                return None;
            };
            if let Err(err) = self.store.save(state) {
                error!(error = ?err, "failed to persist state after selection");
            }
            (chosen, state.style)
        };

        match self.renderer.render(&self.cache_dir.join(&chosen), style).await {
            Ok(()) => {
                info!(image = %chosen, %style, "image displayed");
                *on_display = Some(chosen.clone());
                Some(chosen)
            }
            Err(err) => {
                warn!(image = %chosen, %style, error = ?err, "render failed; keeping previous image");
                None
            }
        }
    }

    /// Runs one sync and folds its outcome into the state. Returns `None`
    /// when another sync is already running.
    pub async fn run_sync(&self, trigger: SyncTrigger) -> Option<SyncReport> {
        let Some(report) = self.sync.try_sync(&self.display).await else {
            info!(%trigger, "sync already in progress; request ignored");
            return None;
        };
        if report.status != SyncStatus::Fatal {
            self.apply_report(&report).await;
        }
        Some(report)
    }

    async fn apply_report(&self, report: &SyncReport) {
        let mut shared = self.shared.lock().await;
        let Shared { state, retired, .. } = &mut *shared;

        let mut queued = 0usize;
        for asset in &report.added {
            let name = &asset.local_file;
            if state.seen.contains(name) || state.unseen_queue.contains(name) {
                continue;
            }
            state.unseen_queue.push_back(name.clone());
            queued += 1;
        }
        let removed: HashSet<&str> = report
            .removed
            .iter()
            .map(|a| a.local_file.as_str())
            .collect();
        state
            .unseen_queue
            .retain(|name| !removed.contains(name.as_str()));

        if report.status == SyncStatus::Complete {
            *retired = report
                .deferred
                .iter()
                .map(|a| a.local_file.clone())
                .collect();
        }

        if let Err(err) = self.store.save(state) {
            error!(error = ?err, "failed to persist state after sync");
        }
        debug!(
            queued,
            unseen = state.unseen_queue.len(),
            retired = retired.len(),
            "sync results merged into state"
        );
    }

    /// Sync, then show one image. A fatal sync leaves the panel alone; any
    /// other outcome refreshes exactly once, new images or not.
    #[instrument(skip(self))]
    pub async fn sync_and_refresh(&self, trigger: SyncTrigger) {
        let Some(report) = self.run_sync(trigger).await else {
            return;
        };
        match report.status {
            SyncStatus::Fatal => {
                warn!(
                    %trigger,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "sync failed; display left unchanged"
                );
            }
            status => {
                info!(
                    %trigger,
                    %status,
                    added = report.added.len(),
                    removed = report.removed.len(),
                    "sync finished; refreshing display"
                );
                self.refresh_display().await;
            }
        }
    }

    /// Persists a new style. The panel keeps its current image until the next
    /// refresh.
    pub async fn set_style(&self, style: Style) {
        let mut shared = self.shared.lock().await;
        if shared.state.style == style {
            debug!(%style, "style unchanged");
            return;
        }
        shared.state.style = style;
        if let Err(err) = self.store.save(&shared.state) {
            error!(error = ?err, "failed to persist style change");
        }
        info!(%style, "style changed");
    }
}
