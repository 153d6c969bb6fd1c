use std::fs;
use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use evdev::{Device, EventSummary, KeyCode};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONTROL_SOCKET: &str = "/run/photo-frame/control.sock";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "frame-buttond",
    about = "Maps the photo frame's panel buttons to control commands"
)]
struct Args {
    /// Frame configuration file; its `buttond` section and `control-socket-path` are used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input device path (evdev). Auto-detects when omitted.
    #[arg(long)]
    device: Option<PathBuf>,

    /// Photo frame control socket (overrides the configuration file).
    #[arg(long)]
    control_socket: Option<PathBuf>,

    /// Presses within this window of the last accepted press are ignored.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    cooldown: Duration,

    /// Logging level (error|warn|info|debug|trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// The parts of the frame's YAML file this daemon reads. Everything else in
/// the file belongs to the frame and is ignored here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SharedConfig {
    #[serde(default)]
    control_socket_path: Option<PathBuf>,
    #[serde(default)]
    buttond: ButtondConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
struct ButtondConfig {
    device: Option<PathBuf>,
    keys: KeyMap,
}

/// Linux input key codes of the four panel buttons, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
struct KeyMap {
    advance: u16,
    sync_now: u16,
    posterize: u16,
    painterly: u16,
}

impl Default for KeyMap {
    fn default() -> Self {
        // KEY_A, KEY_B, KEY_C, KEY_D as emitted by the gpio-keys overlay.
        Self {
            advance: 30,
            sync_now: 48,
            posterize: 46,
            painterly: 32,
        }
    }
}

impl KeyMap {
    fn action_for(&self, code: u16) -> Option<Action> {
        match code {
            c if c == self.advance => Some(Action::Advance),
            c if c == self.sync_now => Some(Action::SyncNow),
            c if c == self.posterize => Some(Action::Style("posterize")),
            c if c == self.painterly => Some(Action::Style("painterly")),
            _ => None,
        }
    }

    fn codes(&self) -> [KeyCode; 4] {
        [self.advance, self.sync_now, self.posterize, self.painterly].map(KeyCode::new)
    }

    fn validate(&self) -> Result<()> {
        let mut codes = [self.advance, self.sync_now, self.posterize, self.painterly];
        codes.sort_unstable();
        if codes.windows(2).any(|pair| pair[0] == pair[1]) {
            bail!("buttond.keys must map four distinct key codes");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Advance,
    SyncNow,
    Style(&'static str),
}

impl Action {
    fn command_line(&self) -> String {
        let value = match self {
            Action::Advance => serde_json::json!({ "command": "advance" }),
            Action::SyncNow => serde_json::json!({ "command": "sync-now" }),
            Action::Style(style) => serde_json::json!({ "command": "set-style", "style": style }),
        };
        format!("{value}\n")
    }
}

struct Cooldown {
    window: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let shared = match &args.config {
        Some(path) => load_shared_config(path)?,
        None => SharedConfig::default(),
    };
    let keys = shared.buttond.keys;
    keys.validate()?;
    let control_socket = args
        .control_socket
        .clone()
        .or(shared.control_socket_path)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTROL_SOCKET));
    let device_path = args.device.clone().or(shared.buttond.device);

    let (mut device, path) = open_device(device_path.as_deref(), &keys)?;
    info!(
        device = %path.display(),
        socket = %control_socket.display(),
        ?keys,
        "listening for panel button events"
    );

    let mut cooldown = Cooldown::new(args.cooldown);
    loop {
        let events = device
            .fetch_events()
            .context("failed reading input events")?;
        for event in events {
            let EventSummary::Key(_, code, 1) = event.destructure() else {
                continue;
            };
            let Some(action) = keys.action_for(code.code()) else {
                continue;
            };
            if !cooldown.accept(Instant::now()) {
                debug!(?action, "press ignored during cooldown");
                continue;
            }
            perform_action(action, &control_socket);
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::builder()
        .parse(level)
        .with_context(|| format!("invalid log level '{level}'"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn load_shared_config(path: &Path) -> Result<SharedConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn open_device(path: Option<&Path>, keys: &KeyMap) -> Result<(Device, PathBuf)> {
    if let Some(path) = path {
        let device =
            Device::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        ensure_keys(&device, path, keys)?;
        return Ok((device, path.to_path_buf()));
    }

    if let Some(result) = scan_dir("/dev/input/by-path", Some("gpio"), keys)? {
        return Ok(result);
    }

    if let Some(result) = scan_dir("/dev/input", None, keys)? {
        return Ok(result);
    }

    bail!("no input devices advertising the configured button keys found");
}

fn scan_dir<P: AsRef<Path>>(
    dir: P,
    name_filter: Option<&str>,
    keys: &KeyMap,
) -> Result<Option<(Device, PathBuf)>> {
    let dir = dir.as_ref().to_path_buf();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read directory {}", dir.display()));
        }
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let wanted = match name_filter {
            Some(filter) => name.to_ascii_lowercase().contains(filter),
            None => name.starts_with("event"),
        };
        if !wanted {
            continue;
        }

        if let Some(device) = open_button_device(&path, keys)? {
            candidates.push((device, path));
        }
    }

    candidates.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(candidates.into_iter().next())
}

fn open_button_device(path: &Path, keys: &KeyMap) -> Result<Option<Device>> {
    let device = match Device::open(path) {
        Ok(device) => device,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            warn!(device = %path.display(), "no permission to read device");
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| format!("failed to open {}", path.display())),
    };
    match ensure_keys(&device, path, keys) {
        Ok(()) => Ok(Some(device)),
        Err(err) => {
            debug!(device = %path.display(), "{}", err);
            Ok(None)
        }
    }
}

fn ensure_keys(device: &Device, path: &Path, keys: &KeyMap) -> Result<()> {
    let Some(supported) = device.supported_keys() else {
        bail!("{} does not advertise any keys", path.display());
    };
    for code in keys.codes() {
        if !supported.contains(code) {
            bail!("{} does not support key code {}", path.display(), code.code());
        }
    }
    Ok(())
}

fn perform_action(action: Action, socket: &Path) {
    info!(?action, "button press");
    if let Err(err) = send_command(socket, action) {
        error!(?err, ?action, "failed to send control command");
    }
}

fn send_command(socket: &Path, action: Action) -> Result<()> {
    let mut stream = UnixStream::connect(socket).with_context(|| {
        format!("failed to connect to control socket at {}", socket.display())
    })?;
    stream
        .write_all(action.command_line().as_bytes())
        .context("failed to send control command")?;
    Ok(())
}
