//! Detection settings and the shared, persisted handle the monitor reads from.
//!
//! Settings are process-wide. The monitor takes a [`Settings`] snapshot for
//! every sample, so an update made while a session is running applies from
//! the next sample onwards and never touches events already recorded.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::KeyValueStore;
use crate::error::StorageError;

/// Store key for the persisted settings.
pub const SETTINGS_KEY: &str = "settings";

/// User-tunable detection settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Sensitivity dial, 1 to 10. Scales the volume threshold.
    pub sensitivity: u8,
    /// Minimum snore duration in seconds. Stored and shown, never used by detection or scoring.
    pub min_duration: u32,
    /// Base volume threshold in `[0, 1]`.
    pub volume_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sensitivity: 5,
            min_duration: 3,
            volume_threshold: 0.3,
        }
    }
}

impl Settings {
    pub const MIN_SENSITIVITY: u8 = 1;
    pub const MAX_SENSITIVITY: u8 = 10;

    /// Volume a sample has to exceed to count as snoring.
    pub fn detection_threshold(&self) -> f64 {
        self.volume_threshold * (f64::from(self.sensitivity) / 10.0)
    }

    /// Brings out-of-range values (e.g. from a hand-edited store) back into range.
    pub fn sanitized(self) -> Self {
        let volume_threshold = if self.volume_threshold.is_nan() {
            Self::default().volume_threshold
        } else {
            self.volume_threshold.clamp(0.0, 1.0)
        };
        Self {
            sensitivity: self.sensitivity.clamp(Self::MIN_SENSITIVITY, Self::MAX_SENSITIVITY),
            min_duration: self.min_duration,
            volume_threshold,
        }
    }
}

/// Shared settings backed by a key-value store.
///
/// Cloning is cheap and every clone sees the same values. Each update is
/// written through to the store; a failed write is logged and the in-memory
/// value is kept.
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Settings>>,
    store: Arc<dyn KeyValueStore>,
}

impl SettingsHandle {
    /// Loads settings from `store`, falling back to defaults for anything missing or unreadable.
    #[tracing::instrument(skip(store))]
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let settings = match store.load(SETTINGS_KEY) {
            Ok(Some(value)) => serde_json::from_value::<Settings>(value)
                .map(Settings::sanitized)
                .unwrap_or_else(|e| {
                    warn!("Stored settings are malformed, using defaults: {e}");
                    Settings::default()
                }),
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!("Settings could not be loaded, using defaults: {e}");
                Settings::default()
            }
        };
        info!("Loaded settings: {:?}", settings);
        Self {
            current: Arc::new(RwLock::new(settings)),
            store,
        }
    }

    /// Returns a copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_sensitivity(&self, sensitivity: u8) -> Settings {
        self.update(|s| s.sensitivity = sensitivity)
    }

    pub fn set_min_duration(&self, seconds: u32) -> Settings {
        self.update(|s| s.min_duration = seconds)
    }

    pub fn set_volume_threshold(&self, threshold: f64) -> Settings {
        self.update(|s| s.volume_threshold = threshold)
    }

    /// Applies `change`, clamps the result into range and persists it.
    pub fn update(&self, change: impl FnOnce(&mut Settings)) -> Settings {
        let updated = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            change(&mut guard);
            *guard = guard.sanitized();
            *guard
        };
        self.persist(&updated);
        updated
    }

    fn persist(&self, settings: &Settings) {
        let result = serde_json::to_value(settings)
            .map_err(StorageError::from)
            .and_then(|value| self.store.save(SETTINGS_KEY, &value));
        if let Err(e) = result {
            warn!("Settings could not be saved: {e}");
        }
    }
}
