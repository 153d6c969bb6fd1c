use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use image::ImageFormat;
use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::debug;

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::processing::{PanelOptions, prepare_for_panel};
use crate::state::{Style, temp_sibling};

/// Puts an image on the panel.
pub trait Renderer: Send + Sync {
    fn render(&self, image: &Path, style: Style)
    -> impl Future<Output = Result<(), RenderError>> + Send;
}

/// The image currently on the panel, doubling as the render lock.
///
/// Holding the guard means no render is in progress; sync takes it before
/// deleting anything from the cache.
#[derive(Debug, Default)]
pub struct DisplaySlot {
    current: Mutex<Option<String>>,
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().await
    }

    pub async fn current(&self) -> Option<String> {
        self.current.lock().await.clone()
    }
}

/// Prepares the image for the panel, writes it to a spool file, and hands the
/// spool path and style to an external panel command.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    command: Vec<String>,
    spool_path: PathBuf,
    panel: PanelOptions,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(cfg: &RenderConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            spool_path: cfg.spool_path.clone(),
            panel: PanelOptions::from(cfg),
            timeout: cfg.timeout,
        }
    }

    async fn run_panel_command(&self, style: Style) -> Result<(), RenderError> {
        let Some((program, args)) = self.command.split_first() else {
            debug!("no panel command configured; spool file only");
            return Ok(());
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&self.spool_path)
            .arg(style.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| RenderError::Spawn {
                program: program.clone(),
                source,
            })?,
            Err(_) => return Err(RenderError::Timeout(self.timeout)),
        };
        if !output.status.success() {
            return Err(RenderError::Command {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Renderer for CommandRenderer {
    async fn render(&self, image: &Path, style: Style) -> Result<(), RenderError> {
        let source = image.to_path_buf();
        let spool = self.spool_path.clone();
        let panel = self.panel;
        tokio::task::spawn_blocking(move || write_spool(&source, style, panel, &spool)).await??;
        self.run_panel_command(style).await
    }
}

fn write_spool(
    source: &Path,
    style: Style,
    panel: PanelOptions,
    spool: &Path,
) -> Result<(), RenderError> {
    let prepared = prepare_for_panel(source, style, panel).map_err(|source_err| {
        RenderError::Prepare {
            path: source.to_path_buf(),
            source: source_err,
        }
    })?;
    if let Some(parent) = spool.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| RenderError::Spool {
            path: parent.to_path_buf(),
            source: err,
        })?;
    }
    let tmp = temp_sibling(spool);
    prepared
        .save_with_format(&tmp, ImageFormat::Png)
        .map_err(|err| RenderError::Prepare {
            path: tmp.clone(),
            source: err,
        })?;
    fs::rename(&tmp, spool).map_err(|err| RenderError::Spool {
        path: spool.to_path_buf(),
        source: err,
    })?;
    debug!(spool = %spool.display(), %style, "panel image prepared");
    Ok(())
}
