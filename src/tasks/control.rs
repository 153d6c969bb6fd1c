use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::FrameEvent;
use crate::state::Style;

/// One JSON object per line, e.g. `{"command":"set-style","style":"posterize"}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
enum ControlCommand {
    Advance,
    SyncNow,
    SetStyle { style: Style },
}

impl From<ControlCommand> for FrameEvent {
    fn from(cmd: ControlCommand) -> Self {
        match cmd {
            ControlCommand::Advance => FrameEvent::Advance,
            ControlCommand::SyncNow => FrameEvent::SyncNow,
            ControlCommand::SetStyle { style } => FrameEvent::SetStyle(style),
        }
    }
}

pub fn parse_command(line: &str) -> Result<FrameEvent, serde_json::Error> {
    serde_json::from_str::<ControlCommand>(line).map(FrameEvent::from)
}

/// Accepts control connections until cancelled and forwards every valid
/// command to `events`.
pub async fn run(
    socket_path: PathBuf,
    events: mpsc::Sender<FrameEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = bind(&socket_path)?;
    info!(socket = %socket_path.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accept = listener.accept() => match accept {
                Ok((stream, _addr)) => {
                    let events = events.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve(stream, events).await {
                            debug!(error = %err, "control connection closed with error");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "control socket accept failed"),
            }
        }
    }

    if let Err(err) = fs::remove_file(&socket_path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(socket = %socket_path.display(), error = %err, "failed to remove control socket");
        }
    }
    Ok(())
}

fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match fs::remove_file(socket_path) {
        Ok(()) => debug!(socket = %socket_path.display(), "removed stale control socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to remove stale socket {}", socket_path.display())
            });
        }
    }
    UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind control socket {}", socket_path.display()))
}

async fn serve(stream: UnixStream, events: mpsc::Sender<FrameEvent>) -> io::Result<()> {
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_command(line) {
            Ok(event) => {
                debug!(?event, "control command received");
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(command = line, error = %err, "ignoring invalid control command"),
        }
    }
    Ok(())
}
