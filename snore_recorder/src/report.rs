//! Presentation helpers for scored sessions.

use crate::aggregator::SessionRecord;

const TIPS: [&str; 5] = [
    "Try sleeping on your side instead of your back",
    "Keep your bedroom humidity between 40-60%",
    "Avoid alcohol 3 hours before bedtime",
    "Consider using a humidifier",
    "Elevate your head slightly while sleeping",
];

/// Advice for a snore score; lower scores get more tips.
pub fn recommendations(score: u8) -> Vec<&'static str> {
    match score {
        0..=59 => TIPS[..4].to_vec(),
        60..=79 => TIPS[..2].to_vec(),
        _ => vec![TIPS[1]],
    }
}

/// Renders whole minutes as `<h>h <m>m`.
pub fn format_duration(minutes: u32) -> String {
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// Position of each snore event on the session timeline.
///
/// Returns `(offset, width)` pairs as fractions of the session length. An
/// unfinished or zero-length session yields no bars.
pub fn timeline(record: &SessionRecord) -> Vec<(f64, f64)> {
    let Some(end_time) = record.end_time else {
        return Vec::new();
    };
    let total = (end_time - record.start_time).num_milliseconds();
    if total <= 0 {
        return Vec::new();
    }
    let total = total as f64;

    record
        .events
        .iter()
        .map(|event| {
            let offset = (event.start_time - record.start_time).num_milliseconds() as f64 / total;
            let width = event.duration().num_milliseconds() as f64 / total;
            (offset.clamp(0.0, 1.0), width.clamp(0.0, 1.0 - offset.clamp(0.0, 1.0)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::EventAggregator;
    use crate::settings::Settings;
    use chrono::{DateTime, TimeDelta, Utc};
    use test_log::test;

    #[test]
    fn test_recommendations_by_score() {
        assert_eq!(recommendations(45).len(), 4);
        assert_eq!(recommendations(59)[3], "Consider using a humidifier");
        assert_eq!(
            recommendations(72),
            vec!["Try sleeping on your side instead of your back", "Keep your bedroom humidity between 40-60%"]
        );
        assert_eq!(recommendations(80), vec!["Keep your bedroom humidity between 40-60%"]);
        assert_eq!(recommendations(100).len(), 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0h 0m");
        assert_eq!(format_duration(462), "7h 42m");
    }

    #[test]
    fn test_timeline_fractions() {
        let start: DateTime<Utc> = DateTime::from_timestamp(1_753_135_200, 0).unwrap();
        let at = |s: i64| start + TimeDelta::seconds(s);
        let mut aggregator = EventAggregator::start(start);
        let settings = Settings::default();
        aggregator.push(at(25), 0.9, &settings);
        aggregator.push(at(30), 0.9, &settings);
        aggregator.push(at(75), 0.9, &settings);
        let record = aggregator.finish(at(100));

        assert_eq!(timeline(&record), vec![(0.25, 0.05), (0.75, 0.0)]);
        assert!(timeline(&crate::aggregator::SessionRecord::new(start)).is_empty());
    }
}
