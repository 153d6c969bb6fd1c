use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{FrameEvent, SyncTrigger};
use crate::frame::Frame;
use crate::render::Renderer;
use crate::source::AssetSource;

/// Drops events that arrive within `window` of the last accepted one.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// Applies input events to the frame. Manual syncs run in the background so
/// further input is handled while they download.
pub async fn run<S, R>(
    frame: Arc<Frame<S, R>>,
    mut events: mpsc::Receiver<FrameEvent>,
    cooldown: Duration,
    cancel: CancellationToken,
) -> Result<()>
where
    S: AssetSource + 'static,
    R: Renderer + 'static,
{
    let mut cooldown = Cooldown::new(cooldown);
    let mut syncs = JoinSet::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(joined) = syncs.join_next(), if !syncs.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "manual sync task failed");
                }
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if !cooldown.accept(Instant::now()) {
            debug!(?event, "input ignored during cooldown");
            continue;
        }
        info!(?event, "input event");

        match event {
            FrameEvent::SyncNow => {
                let frame = frame.clone();
                let cancel = cancel.clone();
                syncs.spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = frame.sync_and_refresh(SyncTrigger::Manual) => {}
                    }
                });
            }
            other => frame.handle(other).await,
        }
    }

    syncs.shutdown().await;
    Ok(())
}
