//! This module handles persistence of settings and session history.
//! It defines the `KeyValueStore` trait the rest of the crate reads from and
//! writes to, a JSON-file backed store and an in-memory store, and the
//! `SessionHistory` that keeps scored sessions newest first.
//!
//! Storage failures never stop monitoring: they are logged and the caller
//! carries on with in-memory data. Only an explicit export reports errors.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::scorer::{Intensity, ScoredSession, SleepQuality};
use crate::settings::SETTINGS_KEY;

/// Store key for the session history.
pub const SESSIONS_KEY: &str = "sessions";

/// Prefix shared by every key written to disk.
const KEY_PREFIX: &str = "snoreTracker_";

/// Opaque JSON key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if nothing is stored.
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Stores each key as `snoreTracker_<key>.json` inside a directory.
#[derive(Debug)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    /// Opens the store, creating `directory` if needed.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{KEY_PREFIX}{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let path = self.path_for(key);
        // the target is only ever replaced whole
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(value)?)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Keeps values in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}

/// Opens a [`JsonFileStore`] at `data_path`, or an in-memory store when the
/// directory is unusable.
pub fn open_store(data_path: &Path) -> Arc<dyn KeyValueStore> {
    match JsonFileStore::open(data_path) {
        Ok(store) => {
            info!("Storing data in {}", store.directory().display());
            Arc::new(store)
        }
        Err(e) => {
            warn!("Data directory {} is unusable, keeping data in memory only: {e}", data_path.display());
            Arc::new(MemoryStore::new())
        }
    }
}

/// Aggregate figures over the whole history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySummary {
    /// Rounded mean snore score.
    pub average_score: u8,
    pub total_sessions: usize,
    /// Score of the newest session.
    pub last_score: Option<u8>,
}

/// Session history kept under [`SESSIONS_KEY`], newest first.
#[derive(Clone)]
pub struct SessionHistory {
    store: Arc<dyn KeyValueStore>,
}

impl SessionHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Loads the history.
    ///
    /// An absent or empty history is seeded with the built-in sample sessions,
    /// which are persisted. An unreadable history falls back to the samples
    /// without touching the store.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Vec<ScoredSession> {
        let stored = self.store.load(SESSIONS_KEY).and_then(|value| match value {
            Some(value) => serde_json::from_value::<Vec<ScoredSession>>(value).map_err(StorageError::from),
            None => Ok(Vec::new()),
        });
        match stored {
            Ok(sessions) if sessions.is_empty() => {
                info!("No saved sessions, seeding history with sample sessions.");
                let samples = sample_sessions();
                self.save(&samples);
                samples
            }
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Sessions could not be loaded, showing sample sessions: {e}");
                sample_sessions()
            }
        }
    }

    /// Puts `session` at the front of the history and persists it.
    ///
    /// An unreadable stored history is replaced by the sample sessions
    /// followed by `session`; the new session is never dropped.
    #[tracing::instrument(skip(self, session), fields(id = %session.id))]
    pub fn record(&self, session: ScoredSession) -> Vec<ScoredSession> {
        let mut sessions = self.load();
        sessions.insert(0, session);
        self.save(&sessions);
        info!("Session saved, {} sessions in history.", sessions.len());
        sessions
    }

    pub fn summary(&self) -> HistorySummary {
        summarize(&self.load())
    }

    /// Writes the history as pretty-printed JSON to
    /// `<directory>/snoretracker-data-<date>.json` and returns the path.
    #[tracing::instrument(skip(self))]
    pub fn export(&self, directory: &Path, date: NaiveDate) -> Result<PathBuf, StorageError> {
        let sessions = self.load();
        let path = directory.join(export_file_name(date));
        fs::create_dir_all(directory)?;
        fs::write(&path, serde_json::to_string_pretty(&sessions)?)?;
        info!("Exported {} sessions to {}", sessions.len(), path.display());
        Ok(path)
    }

    /// Exports under today's UTC date, the calendar used for session dates.
    pub fn export_today(&self, directory: &Path) -> Result<PathBuf, StorageError> {
        self.export(directory, Utc::now().date_naive())
    }

    /// Removes all stored sessions and settings.
    #[tracing::instrument(skip(self))]
    pub fn clear(&self) {
        for key in [SESSIONS_KEY, SETTINGS_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Data could not be cleared ({key}): {e}");
            }
        }
    }

    fn save(&self, sessions: &[ScoredSession]) {
        let result = serde_json::to_value(sessions)
            .map_err(StorageError::from)
            .and_then(|value| self.store.save(SESSIONS_KEY, &value));
        if let Err(e) = result {
            warn!("Sessions could not be saved: {e}");
        }
    }
}

/// File name used when exporting the history on `date`.
pub fn export_file_name(date: NaiveDate) -> String {
    format!("snoretracker-data-{}.json", date.format("%Y-%m-%d"))
}

pub fn summarize(sessions: &[ScoredSession]) -> HistorySummary {
    let total: u32 = sessions.iter().map(|s| u32::from(s.snore_score)).sum();
    let average_score = if sessions.is_empty() {
        0
    } else {
        (f64::from(total) / sessions.len() as f64).round() as u8
    };
    HistorySummary {
        average_score,
        total_sessions: sessions.len(),
        last_score: sessions.first().map(|s| s.snore_score),
    }
}

/// Example nights shown until the first real session is recorded.
pub fn sample_sessions() -> Vec<ScoredSession> {
    vec![
        ScoredSession {
            id: "session_20250722_001".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 7, 21).unwrap_or_default(),
            duration: 480,
            snore_score: 73,
            event_count: 12,
            intensity: Intensity::Moderate,
            total_snore_time: 45,
            avg_volume: 42,
            peak_volume: 78,
            sleep_quality: SleepQuality::Good,
            raw_data: None,
        },
        ScoredSession {
            id: "session_20250721_001".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 7, 20).unwrap_or_default(),
            duration: 420,
            snore_score: 85,
            event_count: 8,
            intensity: Intensity::Light,
            total_snore_time: 23,
            avg_volume: 38,
            peak_volume: 65,
            sleep_quality: SleepQuality::Excellent,
            raw_data: None,
        },
        ScoredSession {
            id: "session_20250720_001".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 7, 19).unwrap_or_default(),
            duration: 510,
            snore_score: 45,
            event_count: 28,
            intensity: Intensity::Heavy,
            total_snore_time: 89,
            avg_volume: 55,
            peak_volume: 92,
            sleep_quality: SleepQuality::Poor,
            raw_data: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::EventAggregator;
    use crate::scorer::score_session;
    use crate::settings::{Settings, SettingsHandle};
    use chrono::DateTime;
    use serde_json::json;
    use test_log::test;

    /// Store whose every operation fails.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn load(&self, _key: &str) -> Result<Option<Value>, StorageError> {
            Err(std::io::Error::other("disk on fire").into())
        }
        fn save(&self, _key: &str, _value: &Value) -> Result<(), StorageError> {
            Err(std::io::Error::other("quota exceeded").into())
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(std::io::Error::other("read only").into())
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("snore_recorder_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn scored_at(ms: i64) -> ScoredSession {
        let start = DateTime::from_timestamp_millis(ms).unwrap();
        let mut aggregator = EventAggregator::start(start);
        aggregator.push(start, 0.9, &Settings::default());
        score_session(&aggregator.finish(start + chrono::TimeDelta::minutes(30)))
    }

    #[test]
    fn test_empty_history_is_seeded_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let history = SessionHistory::new(store.clone());

        let sessions = history.load();

        assert_eq!(sessions, sample_sessions());
        assert!(store.load(SESSIONS_KEY).unwrap().is_some());
    }

    #[test]
    fn test_record_prepends_newest_first() {
        let history = SessionHistory::new(Arc::new(MemoryStore::new()));
        let first = scored_at(1_753_000_000_000);
        let second = scored_at(1_753_100_000_000);

        history.record(first.clone());
        let sessions = history.record(second.clone());

        assert_eq!(sessions.len(), 5);
        assert_eq!(sessions[0], second);
        assert_eq!(sessions[1], first);
        assert_eq!(history.load(), sessions);
    }

    #[test]
    fn test_unreadable_history_falls_back_to_samples() {
        let store = Arc::new(MemoryStore::new());
        store.save(SESSIONS_KEY, &json!({ "not": "a list" })).unwrap();

        assert_eq!(SessionHistory::new(store.clone()).load(), sample_sessions());
        // loading alone leaves the broken value in place
        assert_eq!(store.load(SESSIONS_KEY).unwrap(), Some(json!({ "not": "a list" })));
    }

    #[test]
    fn test_record_replaces_unreadable_history() {
        let store = Arc::new(MemoryStore::new());
        store.save(SESSIONS_KEY, &json!({ "not": "a list" })).unwrap();
        let history = SessionHistory::new(store.clone());
        let newest = scored_at(1_753_000_000_000);

        let sessions = history.record(newest.clone());

        assert_eq!(sessions.len(), 4);
        assert_eq!(sessions[0], newest);
        assert_eq!(sessions[1..], sample_sessions()[..]);
        let stored: Vec<ScoredSession> = serde_json::from_value(store.load(SESSIONS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, sessions);
    }

    #[test]
    fn test_broken_store_never_panics() {
        let store: Arc<dyn KeyValueStore> = Arc::new(BrokenStore);
        let history = SessionHistory::new(store.clone());

        assert_eq!(history.load(), sample_sessions());
        let sessions = history.record(scored_at(1_753_000_000_000));
        assert_eq!(sessions.len(), 4);
        history.clear();

        let settings = SettingsHandle::load(store);
        assert_eq!(settings.snapshot(), Settings::default());
        assert_eq!(settings.set_sensitivity(7).sensitivity, 7);
    }

    #[test]
    fn test_summary() {
        let summary = summarize(&sample_sessions());
        assert_eq!(summary, HistorySummary { average_score: 68, total_sessions: 3, last_score: Some(73) });
        assert_eq!(summarize(&[]), HistorySummary { average_score: 0, total_sessions: 0, last_score: None });
    }

    #[test]
    fn test_clear_removes_sessions_and_settings() {
        let store = Arc::new(MemoryStore::new());
        let history = SessionHistory::new(store.clone());
        history.record(scored_at(1_753_000_000_000));
        SettingsHandle::load(store.clone()).set_sensitivity(2);

        history.clear();

        assert!(store.load(SESSIONS_KEY).unwrap().is_none());
        assert!(store.load(SETTINGS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_export_writes_pretty_json_array() {
        let dir = scratch_dir("export");
        let history = SessionHistory::new(Arc::new(MemoryStore::new()));
        let date = NaiveDate::from_ymd_opt(2025, 7, 22).unwrap();

        let path = history.export(&dir, date).expect("Failed to export history");

        assert_eq!(path.file_name().unwrap(), "snoretracker-data-2025-07-22.json");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("[\n"));
        let exported: Vec<ScoredSession> = serde_json::from_str(&contents).unwrap();
        assert_eq!(exported, sample_sessions());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_export_today_uses_utc_date() {
        let dir = scratch_dir("export_today");
        let history = SessionHistory::new(Arc::new(MemoryStore::new()));

        let path = history.export_today(&dir).expect("Failed to export history");

        let expected = export_file_name(Utc::now().date_naive());
        assert_eq!(path.file_name().unwrap().to_str(), Some(expected.as_str()));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_store_uses_data_directory() {
        let dir = scratch_dir("open_store");
        let store = open_store(&dir);

        store.save(SESSIONS_KEY, &json!([])).unwrap();

        assert!(dir.join("snoreTracker_sessions.json").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_round_trip_and_remove() {
        let dir = scratch_dir("file_store");
        let store = JsonFileStore::open(&dir).expect("Failed to open store");

        assert!(store.load("settings").unwrap().is_none());
        store.save("settings", &json!({ "sensitivity": 4 })).unwrap();
        assert!(dir.join("snoreTracker_settings.json").exists());
        assert_eq!(store.load("settings").unwrap(), Some(json!({ "sensitivity": 4 })));

        store.remove("settings").unwrap();
        store.remove("settings").unwrap();
        assert!(store.load("settings").unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_reports_corrupt_json() {
        let dir = scratch_dir("corrupt");
        let store = JsonFileStore::open(&dir).unwrap();
        fs::write(dir.join("snoreTracker_sessions.json"), "{ truncated").unwrap();

        assert!(matches!(store.load(SESSIONS_KEY), Err(StorageError::Json(_))));
        assert_eq!(SessionHistory::new(Arc::new(store)).load(), sample_sessions());
        let _ = fs::remove_dir_all(&dir);
    }
}
