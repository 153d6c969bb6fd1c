use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::SyncTrigger;
use crate::frame::Frame;
use crate::render::Renderer;
use crate::schedule::FrameClock;
use crate::source::AssetSource;

/// Runs a sync and refresh each time local midnight passes.
///
/// Wakes every `check_interval` rather than sleeping until midnight so clock
/// jumps (NTP on first boot, suspend) are picked up within one interval.
pub async fn run<S, R>(
    frame: Arc<Frame<S, R>>,
    clock: FrameClock,
    check_interval: Duration,
    cancel: CancellationToken,
) -> Result<()>
where
    S: AssetSource + 'static,
    R: Renderer + 'static,
{
    run_with_now(frame, clock, check_interval, cancel, Utc::now).await
}

/// [`run`] with the wall clock supplied by `now`.
pub async fn run_with_now<S, R, N>(
    frame: Arc<Frame<S, R>>,
    clock: FrameClock,
    check_interval: Duration,
    cancel: CancellationToken,
    now: N,
) -> Result<()>
where
    S: AssetSource + 'static,
    R: Renderer + 'static,
    N: Fn() -> DateTime<Utc>,
{
    let mut due = schedule_next(clock, now())?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(check_interval) => {}
        }
        let current = now();
        if current < due {
            continue;
        }
        debug!(%due, now = %current, "midnight passed");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = frame.sync_and_refresh(SyncTrigger::Midnight) => {}
        }
        due = schedule_next(clock, now())?;
    }
    Ok(())
}

fn schedule_next(clock: FrameClock, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let due = clock
        .next_midnight_after(now)
        .with_context(|| format!("no representable midnight after {now}"))?;
    info!(next_sync = %due, ?clock, "scheduled midnight sync");
    Ok(due)
}
