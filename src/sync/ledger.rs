use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::state::write_json_atomic;

/// One downloaded remote asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// File name inside the photo cache.
    #[serde(alias = "file")]
    pub local_file: String,
    /// First successful download.
    #[serde(alias = "added", deserialize_with = "deserialize_timestamp")]
    pub added_at: DateTime<Utc>,
}

/// Remote asset id -> local bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLedger {
    #[serde(default)]
    assets: BTreeMap<String, AssetRecord>,
    /// Orphan ids the last complete sync kept because they were on display.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    deferred: BTreeSet<String>,
}

impl AssetLedger {
    pub fn get(&self, id: &str) -> Option<&AssetRecord> {
        self.assets.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.assets.contains_key(id)
    }

    pub fn insert(&mut self, id: String, record: AssetRecord) -> Option<AssetRecord> {
        self.assets.insert(id, record)
    }

    pub fn remove(&mut self, id: &str) -> Option<AssetRecord> {
        self.deferred.remove(id);
        self.assets.remove(id)
    }

    /// Replaces the deferred orphan set. Returns whether it changed.
    pub fn set_deferred(&mut self, ids: BTreeSet<String>) -> bool {
        if self.deferred == ids {
            return false;
        }
        self.deferred = ids;
        true
    }

    /// Cache files of deferred orphans still in the ledger.
    pub fn deferred_files(&self) -> impl Iterator<Item = &str> {
        self.deferred
            .iter()
            .filter_map(|id| self.assets.get(id))
            .map(|record| record.local_file.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssetRecord)> {
        self.assets.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Loads and saves the [`AssetLedger`] with the same discipline as the state
/// store: never fails to load, always replaces atomically.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AssetLedger {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no asset ledger found; starting empty");
                return AssetLedger::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read asset ledger; starting empty");
                return AssetLedger::default();
            }
        };
        match serde_json::from_str::<AssetLedger>(&raw) {
            Ok(ledger) => {
                debug!(assets = ledger.len(), "asset ledger loaded");
                ledger
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "asset ledger is malformed; starting empty");
                AssetLedger::default()
            }
        }
    }

    pub fn save(&self, ledger: &AssetLedger) -> Result<(), StoreError> {
        write_json_atomic(&self.path, ledger)
    }
}

/// RFC 3339, or a naive ISO timestamp (taken as UTC) as older ledgers wrote.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&raw), &"an ISO 8601 timestamp"))
}
