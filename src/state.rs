//! Durable record of what the frame has shown and what it still owes the viewer.
//!
//! The store never fails to load: a missing or unreadable file yields the
//! default record, and a record with missing fields is back-filled field by
//! field. Either repair is written back immediately so the file on disk is
//! always complete.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;

/// Number of recent displays remembered in [`History`].
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Style {
    #[default]
    Normal,
    Posterize,
    Painterly,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown style `{0}` (expected normal, posterize or painterly)")]
pub struct UnknownStyle(pub String);

impl Style {
    pub const ALL: [Style; 3] = [Style::Normal, Style::Posterize, Style::Painterly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Posterize => "posterize",
            Self::Painterly => "painterly",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = UnknownStyle;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| UnknownStyle(raw.to_string()))
    }
}

/// Most recent displays, oldest first, never longer than [`HISTORY_CAPACITY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct History(VecDeque<String>);

impl History {
    pub fn push(&mut self, id: String) {
        self.0.push_back(id);
        while self.0.len() > HISTORY_CAPACITY {
            self.0.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.back().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|entry| entry == id)
    }
}

impl From<Vec<String>> for History {
    fn from(entries: Vec<String>) -> Self {
        let skip = entries.len().saturating_sub(HISTORY_CAPACITY);
        Self(entries.into_iter().skip(skip).collect())
    }
}

impl From<History> for Vec<String> {
    fn from(history: History) -> Self {
        history.0.into()
    }
}

/// The single per-deployment record consumed by selection and sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Images shown at least once. Only grows, except on reset.
    pub seen: BTreeSet<String>,
    /// Newly synced images that have not been shown yet, oldest first.
    pub unseen_queue: VecDeque<String>,
    pub last_shown_at: BTreeMap<String, DateTime<Utc>>,
    pub history: History,
    pub style: Style,
}

/// On-disk shape: every known field optional so absent ones can be back-filled
/// individually instead of discarding the whole record.
#[derive(Debug, Default, Deserialize)]
struct StoredState {
    seen: Option<BTreeSet<String>>,
    #[serde(alias = "unseen_new")]
    unseen_queue: Option<VecDeque<String>>,
    last_shown_at: Option<BTreeMap<String, DateTime<Utc>>>,
    history: Option<Vec<String>>,
    style: Option<Style>,
}

impl StoredState {
    /// Returns the merged state plus the names of fields that had to be repaired.
    fn into_state(self) -> (PersistentState, Vec<&'static str>) {
        let mut repaired = Vec::new();
        let mut state = PersistentState::default();

        match self.seen {
            Some(seen) => state.seen = seen,
            None => repaired.push("seen"),
        }
        match self.unseen_queue {
            Some(queue) => state.unseen_queue = queue,
            None => repaired.push("unseen_queue"),
        }
        match self.last_shown_at {
            Some(last_shown_at) => state.last_shown_at = last_shown_at,
            None => repaired.push("last_shown_at"),
        }
        match self.history {
            Some(history) => {
                if history.len() > HISTORY_CAPACITY {
                    repaired.push("history");
                }
                state.history = History::from(history);
            }
            None => repaired.push("history"),
        }
        match self.style {
            Some(style) => state.style = style,
            None => repaired.push("style"),
        }

        (state, repaired)
    }
}

/// Loads and saves [`PersistentState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> PersistentState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state file found; creating fresh state");
                return self.reset();
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read state file; resetting to defaults"
                );
                return self.reset();
            }
        };

        let stored: StoredState = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "state file is malformed; resetting to defaults"
                );
                return self.reset();
            }
        };

        let (state, repaired) = stored.into_state();
        if !repaired.is_empty() {
            for field in &repaired {
                warn!(field, "state field missing or out of bounds; restoring default");
            }
            self.save_logged(&state);
        }
        debug!(
            seen = state.seen.len(),
            unseen = state.unseen_queue.len(),
            style = %state.style,
            "state loaded"
        );
        state
    }

    pub fn save(&self, state: &PersistentState) -> Result<(), StoreError> {
        write_json_atomic(&self.path, state)
    }

    fn reset(&self) -> PersistentState {
        let state = PersistentState::default();
        self.save_logged(&state);
        state
    }

    fn save_logged(&self, state: &PersistentState) {
        if let Err(err) = self.save(state) {
            error!(path = %self.path.display(), error = ?err, "failed to persist state");
        }
    }
}

/// Serializes `value` next to `path`, syncs it, then renames it into place so
/// a power cut leaves either the old or the new file, never a truncated one.
pub(crate) fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let mut bytes = serde_json::to_vec_pretty(value).map_err(StoreError::Encode)?;
    bytes.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::io(parent, source))?;
    }

    let tmp = temp_sibling(path);
    let mut file = File::create(&tmp).map_err(|source| StoreError::io(&tmp, source))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|source| StoreError::io(&tmp, source))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| StoreError::io(path, source))
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("record"));
    name.push(".tmp");
    path.with_file_name(name)
}
