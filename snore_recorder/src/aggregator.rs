//! Snore event segmentation over a stream of volume samples.
//!
//! The [`EventAggregator`] owns the [`SessionRecord`] of the session being
//! monitored. Every sample is appended to the record; samples above the
//! detection threshold either open a new [`SnoreEvent`] or extend the most
//! recent one when they arrive within [`MERGE_GAP_MS`] of its end.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::settings::Settings;

/// Longest gap, in milliseconds, between the end of an event and a new
/// above-threshold sample for the sample to still extend that event.
pub const MERGE_GAP_MS: i64 = 5_000;

/// One volume reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSample {
    pub timestamp: DateTime<Utc>,
    /// Volume in `[0, 1]`.
    pub volume: f64,
}

/// A run of above-threshold samples, merged across gaps of at most [`MERGE_GAP_MS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoreEvent {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub peak_volume: f64,
    /// Blended volume: each extending sample averages with the previous
    /// value, `(avg + v) / 2`, so recent samples weigh more. An
    /// approximation, not the arithmetic mean of the event's samples.
    pub avg_volume: f64,
}

impl SnoreEvent {
    fn open(timestamp: DateTime<Utc>, volume: f64) -> Self {
        Self {
            start_time: timestamp,
            end_time: timestamp,
            peak_volume: volume,
            avg_volume: volume,
        }
    }

    /// A timestamp before the current end leaves the end where it is.
    fn extend(&mut self, timestamp: DateTime<Utc>, volume: f64) {
        self.end_time = self.end_time.max(timestamp);
        self.peak_volume = self.peak_volume.max(volume);
        self.avg_volume = (self.avg_volume + volume) / 2.0;
    }

    pub fn duration(&self) -> TimeDelta {
        self.end_time - self.start_time
    }
}

/// Everything captured during one monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub start_time: DateTime<Utc>,
    /// `None` while the session is still being monitored.
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "snoreEvents")]
    pub events: Vec<SnoreEvent>,
    #[serde(rename = "volumeLevels")]
    pub samples: Vec<VolumeSample>,
    pub peak_volume: f64,
    /// Running mean of every sample volume.
    pub avg_volume: f64,
}

impl SessionRecord {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time: None,
            events: Vec::new(),
            samples: Vec::new(),
            peak_volume: 0.0,
            avg_volume: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

/// What a single sample did to the event sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// At or below the threshold.
    Quiet,
    /// Above the threshold and opened a new event.
    Started,
    /// Above the threshold and extended the most recent event.
    Extended,
}

impl Detection {
    /// True when the sample was above the threshold.
    pub fn is_snore(self) -> bool {
        !matches!(self, Detection::Quiet)
    }
}

/// Builds a [`SessionRecord`] from a stream of samples.
#[derive(Debug)]
pub struct EventAggregator {
    record: SessionRecord,
}

impl EventAggregator {
    /// Starts an empty session at `start_time`.
    pub fn start(start_time: DateTime<Utc>) -> Self {
        Self {
            record: SessionRecord::new(start_time),
        }
    }

    /// Live view of the session so far.
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Feeds one sample, classified against the threshold of `settings` as they are now.
    pub fn push(&mut self, timestamp: DateTime<Utc>, volume: f64, settings: &Settings) -> Detection {
        let record = &mut self.record;
        record.samples.push(VolumeSample { timestamp, volume });
        record.avg_volume += (volume - record.avg_volume) / record.samples.len() as f64;
        if volume > record.peak_volume {
            record.peak_volume = volume;
        }

        if volume <= settings.detection_threshold() {
            return Detection::Quiet;
        }

        match record.events.last_mut() {
            Some(last) if (timestamp - last.end_time).num_milliseconds() <= MERGE_GAP_MS => {
                last.extend(timestamp, volume);
                Detection::Extended
            }
            _ => {
                record.events.push(SnoreEvent::open(timestamp, volume));
                debug!("Snore event #{} started at {} (volume {:.3})", record.events.len(), timestamp, volume);
                Detection::Started
            }
        }
    }

    /// Freezes the session at `end_time` and hands the record over for scoring.
    pub fn finish(mut self, end_time: DateTime<Utc>) -> SessionRecord {
        self.record.end_time = Some(end_time.max(self.record.start_time));
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_750_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_quiet_stream_has_no_events() {
        let settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));
        for i in 0..100 {
            assert_eq!(aggregator.push(at(i * 16), 0.15, &settings), Detection::Quiet);
        }
        let record = aggregator.finish(at(1_600));
        assert!(record.events.is_empty());
        assert_eq!(record.samples.len(), 100);
        assert_eq!(record.peak_volume, 0.15);
    }

    #[test]
    fn test_samples_within_gap_merge() {
        let settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));
        assert_eq!(aggregator.push(at(0), 0.5, &settings), Detection::Started);
        assert_eq!(aggregator.push(at(4_000), 0.7, &settings), Detection::Extended);

        let record = aggregator.finish(at(10_000));
        assert_eq!(record.events.len(), 1);
        let event = &record.events[0];
        assert_eq!(event.start_time, at(0));
        assert_eq!(event.end_time, at(4_000));
        assert_eq!(event.peak_volume, 0.7);
        assert!((event.avg_volume - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_gap_of_exactly_five_seconds_still_merges() {
        let settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));
        aggregator.push(at(0), 0.5, &settings);
        assert_eq!(aggregator.push(at(5_000), 0.5, &settings), Detection::Extended);
        assert_eq!(aggregator.push(at(10_001), 0.5, &settings), Detection::Started);
    }

    #[test]
    fn test_samples_beyond_gap_split() {
        let settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));
        aggregator.push(at(0), 0.5, &settings);
        assert_eq!(aggregator.push(at(6_000), 0.4, &settings), Detection::Started);

        let record = aggregator.finish(at(10_000));
        assert_eq!(record.events.len(), 2);
        assert_eq!(record.events[1].start_time, at(6_000));
        assert_eq!(record.events[1].end_time, at(6_000));
    }

    #[test]
    fn test_gap_is_measured_from_event_end() {
        let settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));
        for t in [0, 3_000, 6_000, 9_000, 12_000] {
            aggregator.push(at(t), 0.5, &settings);
        }
        // quiet samples between do not end an event
        aggregator.push(at(13_000), 0.01, &settings);
        aggregator.push(at(16_000), 0.5, &settings);

        let record = aggregator.finish(at(20_000));
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.events[0].duration(), TimeDelta::milliseconds(16_000));
    }

    #[test]
    fn test_blended_average_favours_recent_samples() {
        let settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));
        for (i, v) in [0.2, 0.2, 0.2, 1.0].into_iter().enumerate() {
            aggregator.push(at(i as i64 * 100), v, &settings);
        }
        let event = &aggregator.record().events[0];
        // true mean would be 0.4
        assert!((event.avg_volume - 0.6).abs() < 1e-12);
        assert!((aggregator.record().avg_volume - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_sensitivity_change_applies_only_to_later_samples() {
        let mut settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));

        // threshold 0.15 at sensitivity 5
        assert_eq!(aggregator.push(at(0), 0.2, &settings), Detection::Started);
        assert_eq!(aggregator.push(at(10_000), 0.2, &settings), Detection::Started);

        // threshold 0.27 at sensitivity 9
        settings.sensitivity = 9;
        assert_eq!(aggregator.push(at(20_000), 0.2, &settings), Detection::Quiet);
        assert_eq!(aggregator.push(at(30_000), 0.3, &settings), Detection::Started);

        let record = aggregator.finish(at(40_000));
        assert_eq!(record.events.len(), 3);
        assert_eq!(record.events[0].start_time, at(0));
        assert_eq!(record.events[1].start_time, at(10_000));
        assert_eq!(record.events[2].start_time, at(30_000));
    }

    #[test]
    fn test_backwards_timestamp_keeps_event_end() {
        let settings = Settings::default();
        let mut aggregator = EventAggregator::start(at(0));

        assert_eq!(aggregator.push(at(10_000), 0.5, &settings), Detection::Started);
        assert_eq!(aggregator.push(at(4_000), 0.7, &settings), Detection::Extended);

        let event = &aggregator.record().events[0];
        assert_eq!(event.start_time, at(10_000));
        assert_eq!(event.end_time, at(10_000));
        assert_eq!(event.duration(), TimeDelta::zero());
        assert_eq!(event.peak_volume, 0.7);
        assert_eq!(aggregator.record().samples.len(), 2);
    }

    #[test]
    fn test_finish_freezes_record() {
        let mut aggregator = EventAggregator::start(at(0));
        assert!(aggregator.record().is_active());
        aggregator.push(at(10), 0.9, &Settings::default());
        let record = aggregator.finish(at(60_000));
        assert!(!record.is_active());
        assert_eq!(record.end_time, Some(at(60_000)));
    }

    #[test]
    fn test_record_serializes_with_history_field_names() {
        let mut aggregator = EventAggregator::start(at(0));
        aggregator.push(at(10), 0.9, &Settings::default());
        let value = serde_json::to_value(aggregator.finish(at(20))).unwrap();
        assert!(value.get("snoreEvents").is_some());
        assert!(value.get("volumeLevels").is_some());
        assert!(value["snoreEvents"][0].get("peakVolume").is_some());
        assert!(value.get("peakVolume").is_some());
    }
}
