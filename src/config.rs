use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;

pub const DEFAULT_CONTROL_SOCKET_PATH: &str = "/run/photo-frame/control.sock";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Flat directory holding the normalized local copies of album photos.
    pub photo_cache_path: PathBuf,
    /// JSON record of seen/unseen images, history and style.
    pub state_path: PathBuf,
    /// JSON record of downloaded remote assets.
    pub ledger_path: PathBuf,
    /// Name of the shared album to mirror.
    pub album: String,
    /// Zone used to find local midnight. Host local time when absent.
    pub timezone: Option<Tz>,
    /// How often the timer loop checks whether midnight has passed.
    #[serde(with = "humantime_serde")]
    pub sync_check_interval: Duration,
    /// Input events arriving within this window of the last accepted one are dropped.
    #[serde(with = "humantime_serde")]
    pub input_cooldown: Duration,
    /// Unix domain socket accepting runtime control commands.
    pub control_socket_path: PathBuf,
    /// JPEG quality for normalized cache files.
    pub jpeg_quality: u8,
    /// Weighting for random picks once the unseen queue is empty.
    pub selection: SelectionOptions,
    /// Helper commands used to talk to the remote album.
    pub remote: RemoteConfig,
    /// Panel preparation and hand-off.
    pub render: RenderConfig,
    /// Reserved for the button daemon so both processes can share one file.
    #[serde(default)]
    #[allow(dead_code)] // consumed by frame-buttond, not by this crate
    pub buttond: Option<YamlValue>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(!self.album.trim().is_empty(), "album must not be empty");
        ensure!(
            !self.photo_cache_path.as_os_str().is_empty(),
            "photo-cache-path must not be empty"
        );
        ensure!(
            self.state_path.file_name().is_some(),
            "state-path must include a file name"
        );
        ensure!(
            self.ledger_path.file_name().is_some(),
            "ledger-path must include a file name"
        );
        ensure!(
            self.state_path != self.ledger_path,
            "state-path and ledger-path must differ"
        );
        ensure!(
            !self.sync_check_interval.is_zero(),
            "sync-check-interval must be positive"
        );
        ensure!(
            (1..=100).contains(&self.jpeg_quality),
            "jpeg-quality must be between 1 and 100"
        );
        ensure!(
            self.control_socket_path.file_name().is_some(),
            "control-socket-path must include a socket file name"
        );
        self.selection
            .validate()
            .context("invalid selection configuration")?;
        self.remote
            .validate()
            .context("invalid remote configuration")?;
        self.render
            .validate()
            .context("invalid render configuration")?;
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            photo_cache_path: PathBuf::from("/var/lib/photo-frame/photos"),
            state_path: PathBuf::from("/var/lib/photo-frame/state.json"),
            ledger_path: PathBuf::from("/var/lib/photo-frame/assets.json"),
            album: String::new(),
            timezone: None,
            sync_check_interval: Duration::from_secs(30),
            input_cooldown: Duration::from_secs(1),
            control_socket_path: PathBuf::from(DEFAULT_CONTROL_SOCKET_PATH),
            jpeg_quality: 92,
            selection: SelectionOptions::default(),
            remote: RemoteConfig::default(),
            render: RenderConfig::default(),
            buttond: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SelectionOptions {
    /// Relative weight of images never shown.
    pub unseen_weight: u32,
    /// Relative weight of images already shown.
    pub seen_weight: u32,
    /// Fixed RNG seed, for reproducible rotations.
    pub seed: Option<u64>,
}

impl SelectionOptions {
    fn validate(&self) -> Result<()> {
        ensure!(self.seen_weight >= 1, "selection.seen-weight must be >= 1");
        ensure!(
            self.unseen_weight > self.seen_weight,
            "selection.unseen-weight must be greater than selection.seen-weight"
        );
        Ok(())
    }
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            unseen_weight: 5,
            seen_weight: 1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// argv prefix; the album name is appended.
    pub list_command: Vec<String>,
    /// argv prefix; the asset id is appended.
    pub download_command: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl RemoteConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.list_command.first().is_some_and(|p| !p.trim().is_empty()),
            "remote.list-command must name a program"
        );
        ensure!(
            self.download_command
                .first()
                .is_some_and(|p| !p.trim().is_empty()),
            "remote.download-command must name a program"
        );
        ensure!(!self.timeout.is_zero(), "remote.timeout must be positive");
        Ok(())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            list_command: vec![
                "/opt/photo-frame/bin/album-helper".to_string(),
                "list".to_string(),
            ],
            download_command: vec![
                "/opt/photo-frame/bin/album-helper".to_string(),
                "download".to_string(),
            ],
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RenderConfig {
    /// argv prefix; the prepared image path and style are appended.
    pub command: Vec<String>,
    pub panel_width: u32,
    pub panel_height: u32,
    /// Where the prepared panel image is written before hand-off.
    pub spool_path: PathBuf,
    /// Contrast multiplier applied to every style.
    pub contrast: f32,
    /// Colour saturation multiplier applied to every style.
    pub saturation: f32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.command.first().is_some_and(|p| !p.trim().is_empty()),
            "render.command must name a program"
        );
        ensure!(
            self.panel_width > 0 && self.panel_height > 0,
            "render.panel-width and render.panel-height must be positive"
        );
        ensure!(
            self.spool_path.file_name().is_some(),
            "render.spool-path must include a file name"
        );
        ensure!(
            self.contrast.is_finite() && self.contrast > 0.0,
            "render.contrast must be positive"
        );
        ensure!(
            self.saturation.is_finite() && self.saturation >= 0.0,
            "render.saturation must be non-negative"
        );
        ensure!(!self.timeout.is_zero(), "render.timeout must be positive");
        Ok(())
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            command: vec!["/opt/photo-frame/bin/inky-show".to_string()],
            panel_width: 1600,
            panel_height: 1200,
            spool_path: PathBuf::from("/var/lib/photo-frame/panel.png"),
            contrast: 1.6,
            saturation: 1.25,
            timeout: Duration::from_secs(120),
        }
    }
}
