//! Turns a finished [`SessionRecord`] into a [`ScoredSession`].

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregator::SessionRecord;

const MS_PER_MINUTE: f64 = 60_000.0;
const EVENT_PENALTY: f64 = 2.0;
const SNORE_MINUTE_PENALTY: f64 = 0.5;

/// How heavily the sleeper snored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Light,
    Moderate,
    Heavy,
}

impl Intensity {
    fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Intensity::Light
        } else if score >= 60.0 {
            Intensity::Moderate
        } else {
            Intensity::Heavy
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Intensity::Light => "Light",
            Intensity::Moderate => "Moderate",
            Intensity::Heavy => "Heavy",
        })
    }
}

/// Overall sleep quality derived from the snore score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SleepQuality {
    Excellent,
    Good,
    Poor,
}

impl SleepQuality {
    fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            SleepQuality::Excellent
        } else if score >= 60.0 {
            SleepQuality::Good
        } else {
            SleepQuality::Poor
        }
    }
}

impl fmt::Display for SleepQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SleepQuality::Excellent => "Excellent",
            SleepQuality::Good => "Good",
            SleepQuality::Poor => "Poor",
        })
    }
}

/// Summary of one finished session, as kept in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSession {
    pub id: String,
    /// Calendar date the session started on.
    pub date: NaiveDate,
    /// Session length in whole minutes.
    pub duration: u32,
    /// 0 to 100, higher is better.
    pub snore_score: u8,
    #[serde(rename = "snoreEvents")]
    pub event_count: u32,
    pub intensity: Intensity,
    /// Minutes spent inside snore events.
    pub total_snore_time: u32,
    /// Mean sample volume on a 0 to 100 scale.
    pub avg_volume: u32,
    /// Peak sample volume on a 0 to 100 scale.
    pub peak_volume: u32,
    pub sleep_quality: SleepQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<SessionRecord>,
}

impl ScoredSession {
    /// One-line verdict shown next to the score.
    pub fn describe_score(&self) -> &'static str {
        match SleepQuality::from_score(f64::from(self.snore_score)) {
            SleepQuality::Excellent => "Excellent sleep quality",
            SleepQuality::Good => "Good sleep quality",
            SleepQuality::Poor => "Poor sleep quality",
        }
    }
}

/// Scores a frozen session.
///
/// The result depends on `record` alone. A record without an end time is
/// scored as if it ended when it started.
///
/// * duration: whole minutes between start and end, rounded down
/// * total snore time: summed event lengths in fractional minutes
/// * score: `100 - 2 * events - 0.5 * snore minutes`, clamped to `[0, 100]`
///
/// Intensity and quality are classified on the unrounded score; the score
/// itself, the snore minutes and the volumes are rounded for storage.
pub fn score_session(record: &SessionRecord) -> ScoredSession {
    let end_time = record.end_time.unwrap_or(record.start_time);
    let duration_ms = (end_time - record.start_time).num_milliseconds().max(0);
    let duration = (duration_ms / 60_000) as u32;

    let snore_ms: i64 = record.events.iter().map(|e| e.duration().num_milliseconds()).sum();
    let total_snore_time = snore_ms as f64 / MS_PER_MINUTE;

    let avg_volume = if record.samples.is_empty() {
        0.0
    } else {
        record.samples.iter().map(|s| s.volume).sum::<f64>() / record.samples.len() as f64 * 100.0
    };

    let event_count = record.events.len() as u32;
    let score = (100.0 - f64::from(event_count) * EVENT_PENALTY - total_snore_time * SNORE_MINUTE_PENALTY)
        .clamp(0.0, 100.0);

    ScoredSession {
        id: format!("session_{}", end_time.timestamp_millis()),
        date: record.start_time.date_naive(),
        duration,
        snore_score: score.round() as u8,
        event_count,
        intensity: Intensity::from_score(score),
        total_snore_time: total_snore_time.round() as u32,
        avg_volume: avg_volume.round() as u32,
        peak_volume: (record.peak_volume * 100.0).round() as u32,
        sleep_quality: SleepQuality::from_score(score),
        raw_data: Some(record.clone()),
    }
}
