use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use eink_photo_frame::config::Configuration;
use eink_photo_frame::events::{FrameEvent, SyncTrigger};
use eink_photo_frame::frame::{Frame, FrameOptions};
use eink_photo_frame::render::CommandRenderer;
use eink_photo_frame::schedule::FrameClock;
use eink_photo_frame::source::CommandSource;
use eink_photo_frame::sync::SyncStatus;
use eink_photo_frame::tasks;

#[derive(Debug, Parser)]
#[command(
    name = "photo-frame",
    version,
    about = "E-ink photo frame: mirrors a shared album and rotates it on the panel"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Run a single sync against the album and exit without touching the panel
    #[arg(long = "sync-once")]
    sync_once: bool,
    /// Deterministic RNG seed for image selection (overrides selection.seed)
    #[arg(long = "seed", value_name = "SEED")]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args {
        config,
        sync_once,
        seed,
    } = Args::parse();

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    if seed.is_some() {
        cfg.selection.seed = seed;
    }
    tracing::info!(
        "Loaded configuration from {}:\n{:#?}",
        config.display(),
        cfg
    );

    let frame = Arc::new(Frame::new(
        CommandSource::new(&cfg.remote),
        CommandRenderer::new(&cfg.render),
        FrameOptions::from(&cfg),
    ));

    if sync_once {
        return run_sync_once(&frame).await;
    }

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel::<FrameEvent>(16); // Control/signals -> Input

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = sigterm.recv() => {
                                tracing::info!("SIGTERM received; initiating shutdown");
                                cancel.cancel();
                            }
                        }
                    }
                    Err(err) => tracing::warn!("failed to register SIGTERM handler: {err}"),
                }
            });
        }
        forward_signal(
            SignalKind::user_defined1(),
            "SIGUSR1",
            FrameEvent::Advance,
            events_tx.clone(),
            cancel.clone(),
        );
        forward_signal(
            SignalKind::user_defined2(),
            "SIGUSR2",
            FrameEvent::SyncNow,
            events_tx.clone(),
            cancel.clone(),
        );
    }

    // Show something straight away rather than waiting for the first trigger.
    frame.refresh_display().await;

    let mut tasks = JoinSet::new();

    // Control socket
    tasks.spawn({
        let socket = cfg.control_socket_path.clone();
        let events = events_tx.clone();
        let cancel = cancel.clone();
        async move {
            tasks::control::run(socket, events, cancel)
                .await
                .context("control task failed")
        }
    });
    drop(events_tx);

    // Input events
    tasks.spawn({
        let frame = frame.clone();
        let cancel = cancel.clone();
        let cooldown = cfg.input_cooldown;
        async move {
            tasks::input::run(frame, events_rx, cooldown, cancel)
                .await
                .context("input task failed")
        }
    });

    // Midnight sync
    tasks.spawn({
        let frame = frame.clone();
        let cancel = cancel.clone();
        let clock = FrameClock::new(cfg.timezone);
        let interval = cfg.sync_check_interval;
        async move {
            tasks::timer::run(frame, clock, interval, cancel)
                .await
                .context("timer task failed")
        }
    });

    // Drain JoinSet (tasks exit once cancelled)
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}

async fn run_sync_once(frame: &Frame<CommandSource, CommandRenderer>) -> Result<()> {
    let Some(report) = frame.run_sync(SyncTrigger::Manual).await else {
        bail!("another sync is already running");
    };
    for asset in &report.added {
        println!("added   {} -> {}", asset.id, asset.local_file);
    }
    for asset in &report.removed {
        println!("removed {} -> {}", asset.id, asset.local_file);
    }
    for asset in &report.deferred {
        println!("kept    {} -> {} (on display)", asset.id, asset.local_file);
    }
    println!(
        "# status: {}  added: {}  removed: {}  skipped: {}  failed: {}",
        report.status,
        report.added.len(),
        report.removed.len(),
        report.skipped,
        report.failed
    );
    if report.status == SyncStatus::Fatal {
        bail!(
            "sync failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[cfg(unix)]
fn forward_signal(
    kind: SignalKind,
    name: &'static str,
    event: FrameEvent,
    events: mpsc::Sender<FrameEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        match signal(kind) {
            Ok(mut stream) => loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                        tracing::info!(?event, "{name} received");
                        if let Err(err) = events.send(event).await {
                            tracing::warn!("failed to forward {name}: {err}");
                            break;
                        }
                    }
                }
            },
            Err(err) => tracing::warn!("failed to register {name} handler: {err}"),
        }
    });
}
