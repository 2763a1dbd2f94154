//! Notifications published while a session is monitored.
//!
//! Detection never renders anything itself; a presentation layer subscribes
//! to a [`Notifier`] and reacts to these messages.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;

/// How long, in milliseconds, the snore indicator stays lit after the last detection.
pub const INDICATOR_HOLD_MS: i64 = 1_000;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A sample crossed the detection threshold.
    IndicatorActive { at: DateTime<Utc>, volume: f64 },
    /// No detection for [`INDICATOR_HOLD_MS`].
    IndicatorCleared { at: DateTime<Utc> },
    /// Another whole second of the session has passed.
    Elapsed { elapsed: TimeDelta },
    /// Latest volume reading, sent every tick.
    Volume { volume: f64 },
}

/// Broadcasts notifications to any number of subscribers.
///
/// Publishing without subscribers is fine; slow subscribers lag and lose
/// the oldest messages rather than blocking the monitor.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        // an error only means nobody is listening
        let _ = self.sender.send(notification);
    }
}

/// Tracks the transient snore indicator.
#[derive(Debug, Default)]
pub(crate) struct Indicator {
    lit_until: Option<DateTime<Utc>>,
}

impl Indicator {
    /// Lights the indicator; returns true if it was dark before.
    pub(crate) fn light(&mut self, now: DateTime<Utc>) -> bool {
        self.lit_until.replace(now + TimeDelta::milliseconds(INDICATOR_HOLD_MS)).is_none()
    }

    /// Switches the indicator off once its hold time has passed; returns true when it did.
    pub(crate) fn expire(&mut self, now: DateTime<Utc>) -> bool {
        match self.lit_until {
            Some(until) if now >= until => {
                self.lit_until = None;
                true
            }
            _ => false,
        }
    }
}

/// Renders an elapsed time as `HH:MM:SS`.
pub fn format_elapsed(elapsed: TimeDelta) -> String {
    let total = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", total / 3_600, (total % 3_600) / 60, total % 60)
}
