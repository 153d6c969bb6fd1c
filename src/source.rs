use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::SourceError;

/// Helper exit code for "album does not exist".
pub const EXIT_ALBUM_NOT_FOUND: i32 = 2;
/// Helper exit code for "credentials rejected".
pub const EXIT_AUTH_FAILED: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub id: String,
    pub filename: String,
}

/// The remote shared album, as far as the frame cares about it.
pub trait AssetSource: Send + Sync {
    fn list_assets(
        &self,
        album: &str,
    ) -> impl Future<Output = Result<Vec<RemoteAsset>, SourceError>> + Send;

    fn download_asset(&self, id: &str) -> impl Future<Output = Result<Vec<u8>, SourceError>> + Send;
}

/// Talks to the album through an external helper program.
///
/// `list-command <album>` prints a JSON array of `{id, filename}`;
/// `download-command <id>` prints the raw asset bytes. Exit code 2 means the
/// album was not found, 3 an authentication failure, anything else non-zero a
/// transport failure.
#[derive(Debug, Clone)]
pub struct CommandSource {
    list_command: Vec<String>,
    download_command: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(cfg: &RemoteConfig) -> Self {
        Self {
            list_command: cfg.list_command.clone(),
            download_command: cfg.download_command.clone(),
            timeout: cfg.timeout,
        }
    }

    async fn run(&self, template: &[String], arg: &str) -> Result<Vec<u8>, SourceError> {
        let (program, args) = template
            .split_first()
            .ok_or_else(|| SourceError::Protocol("helper command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program, arg, "running album helper");
        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| SourceError::Spawn {
                program: program.clone(),
                source,
            })?,
            Err(_) => return Err(SourceError::Timeout(self.timeout)),
        };

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(output.status.code(), arg, stderr))
    }
}

fn classify_failure(code: Option<i32>, subject: &str, stderr: String) -> SourceError {
    let detail = if stderr.is_empty() {
        subject.to_string()
    } else {
        format!("{subject}: {stderr}")
    };
    match code {
        Some(EXIT_ALBUM_NOT_FOUND) => SourceError::AlbumNotFound(detail),
        Some(EXIT_AUTH_FAILED) => SourceError::Auth(detail),
        Some(code) => SourceError::Transport(format!("exit {code}: {detail}")),
        None => SourceError::Transport(format!("terminated by signal: {detail}")),
    }
}

impl AssetSource for CommandSource {
    async fn list_assets(&self, album: &str) -> Result<Vec<RemoteAsset>, SourceError> {
        let stdout = self.run(&self.list_command, album).await?;
        serde_json::from_slice(&stdout).map_err(SourceError::Decode)
    }

    async fn download_asset(&self, id: &str) -> Result<Vec<u8>, SourceError> {
        let bytes = self.run(&self.download_command, id).await?;
        if bytes.is_empty() {
            return Err(SourceError::Protocol(format!("empty payload for {id}")));
        }
        Ok(bytes)
    }
}
