use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Failures reported by the remote album collaborator.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The configured shared album does not exist (or is not shared with us).
    #[error("album not found: {0}")]
    AlbumNotFound(String),

    /// The helper could not authenticate against the remote service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network or service failure reported by the helper.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The helper did not answer within the configured bound.
    #[error("remote call timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    /// The helper produced output we could not interpret.
    #[error("unexpected helper output: {0}")]
    Protocol(String),

    #[error("invalid asset listing")]
    Decode(#[source] serde_json::Error),

    #[error("failed to launch {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Failures while turning downloaded bytes into a cached JPEG.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to decode downloaded image")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode cached image")]
    Encode(#[source] image::ImageError),

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures for a single asset in the download phase.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("download failed")]
    Download(#[from] SourceError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("normalization worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

/// Failures writing durable records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode record")]
    Encode(#[source] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures in the render collaborator. Always logged, never fatal.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to prepare {} for the panel", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write panel spool file {}", path.display())]
    Spool {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch panel command {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("panel command exited with {status}: {stderr}")]
    Command { status: ExitStatus, stderr: String },

    #[error("panel command timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("panel preparation worker failed")]
    Worker(#[from] tokio::task::JoinError),
}
