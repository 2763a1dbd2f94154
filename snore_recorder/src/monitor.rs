//! The monitoring loop: sampler and aggregator per tick, scorer on stop.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{EventAggregator, SessionRecord};
use crate::data::SessionHistory;
use crate::error::TrackerError;
use crate::notify::{Indicator, Notification, Notifier};
use crate::sampler::sample;
use crate::schedule::{Clock, Ticker};
use crate::scorer::{score_session, ScoredSession};
use crate::settings::SettingsHandle;
use crate::source::{AudioDevice, AudioSource};

/// Owns everything a session needs besides the audio itself.
pub struct Monitor {
    settings: SettingsHandle,
    history: SessionHistory,
    notifier: Notifier,
    active: AtomicBool,
}

/// Clears the active flag when a session ends, however it ends.
struct ActiveSession<'a>(&'a AtomicBool);

impl<'a> ActiveSession<'a> {
    fn claim(flag: &'a AtomicBool) -> Result<Self, TrackerError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TrackerError::AlreadyMonitoring)?;
        Ok(Self(flag))
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Monitor {
    pub fn new(settings: SettingsHandle, history: SessionHistory, notifier: Notifier) -> Self {
        Self {
            settings,
            history,
            notifier,
            active: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn is_monitoring(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Runs one session from acquisition to the saved, scored result.
    ///
    /// Sampling continues until `cancel` fires or the source is exhausted.
    /// Cancellation is checked before each sampling step, so every sample
    /// taken is recorded exactly once.
    ///
    /// # Errors
    /// * [`TrackerError::AlreadyMonitoring`] if another session is running on this monitor.
    /// * [`TrackerError::PermissionDenied`] if the device refuses access; no session is recorded.
    #[tracing::instrument(skip_all)]
    pub async fn run_session<D, T, C>(
        &self,
        device: &mut D,
        ticker: &mut T,
        clock: &C,
        cancel: &CancellationToken,
    ) -> Result<ScoredSession, TrackerError>
    where
        D: AudioDevice,
        T: Ticker,
        C: Clock,
    {
        let _active = ActiveSession::claim(&self.active)?;
        let mut source = device.acquire().await?;

        let record = self.sample_until_stopped(&mut source, ticker, clock, cancel).await;
        info!(
            "Session stopped: {} samples, {} snore events, peak volume {:.3}",
            record.samples.len(),
            record.events.len(),
            record.peak_volume
        );

        let scored = score_session(&record);
        info!("Session {} scored {} ({})", scored.id, scored.snore_score, scored.sleep_quality);
        let history = self.history.clone();
        let saved = scored.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || history.record(saved)).await {
            warn!("Session {} could not be added to history: {e}", scored.id);
        }
        Ok(scored)
    }

    async fn sample_until_stopped<S, T, C>(
        &self,
        source: &mut S,
        ticker: &mut T,
        clock: &C,
        cancel: &CancellationToken,
    ) -> SessionRecord
    where
        S: AudioSource,
        T: Ticker,
        C: Clock,
    {
        let started = clock.now();
        info!("Monitoring started at {}", started);
        let mut aggregator = EventAggregator::start(started);
        let mut indicator = Indicator::default();
        let mut elapsed_seconds = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            let Some(snapshot) = source.magnitude_snapshot().await else {
                info!("Audio source exhausted.");
                break;
            };
            let volume = sample(snapshot);
            let now = clock.now();
            let settings = self.settings.snapshot();

            self.notifier.publish(Notification::Volume { volume });
            if aggregator.push(now, volume, &settings).is_snore() {
                if indicator.light(now) {
                    debug!("Snore indicator on at {}", now);
                }
                self.notifier.publish(Notification::IndicatorActive { at: now, volume });
            } else if indicator.expire(now) {
                self.notifier.publish(Notification::IndicatorCleared { at: now });
            }

            let elapsed = now - started;
            if elapsed.num_seconds() > elapsed_seconds {
                elapsed_seconds = elapsed.num_seconds();
                debug!("Elapsed {}s, {} events", elapsed_seconds, aggregator.record().events.len());
                self.notifier.publish(Notification::Elapsed { elapsed });
            }
        }

        aggregator.finish(clock.now())
    }
}
