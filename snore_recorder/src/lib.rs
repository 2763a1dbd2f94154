use std::error::Error;
use std::path::Path;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use data::{open_store, SessionHistory};
use monitor::Monitor;
use notify::{format_elapsed, Notification, Notifier};
use schedule::{frame_interval, Immediate, SystemClock};
use scorer::ScoredSession;
use settings::SettingsHandle;
use source::{FfmpegMicrophone, Recording};

pub mod aggregator;
pub mod analyser;
pub mod data;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod report;
pub mod sampler;
pub mod schedule;
pub mod scorer;
pub mod settings;
pub mod source;

/// Builds a monitor whose settings and history live under `data_path`.
pub fn open_monitor(data_path: &Path) -> Monitor {
    let store = open_store(data_path);
    Monitor::new(SettingsHandle::load(store.clone()), SessionHistory::new(store), Notifier::new())
}

/// Monitors the microphone until Ctrl-C, then scores and saves the session.
pub async fn snore_tracker(data_path: &Path, device_id: &str) -> Result<ScoredSession, Box<dyn Error>> {
    let monitor = open_monitor(data_path);
    let cancel = shutdown_token();
    let logger = tokio::spawn(log_notifications(monitor.notifier().subscribe()));

    let mut microphone = FfmpegMicrophone::new(device_id);
    let mut interval = frame_interval();
    info!("Settings: {:?}", monitor.settings().snapshot());

    let result = monitor.run_session(&mut microphone, &mut interval, &SystemClock::new(), &cancel).await;
    logger.abort();

    let session = result?;
    info!("Monitor stopped after {} minutes.", session.duration);
    Ok(session)
}

/// Runs a recorded MP3 through the monitor as fast as it decodes.
///
/// Timestamps follow the audio, placed so the recording ends now.
pub async fn replay_recording(data_path: &Path, recording: &Path) -> Result<ScoredSession, Box<dyn Error>> {
    let monitor = open_monitor(data_path);
    let cancel = shutdown_token();

    let mut device = Recording::open_mp3(recording)?;
    let clock = device.clock();
    info!("Replaying {}", recording.display());

    let session = monitor.run_session(&mut device, &mut Immediate, &clock, &cancel).await?;
    info!("Replay of {} finished.", recording.display());
    Ok(session)
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received.");
                on_signal.cancel();
            }
            Err(e) => warn!("Could not listen for shutdown signal: {e}"),
        }
    });
    cancel
}

async fn log_notifications(mut receiver: broadcast::Receiver<Notification>) {
    loop {
        match receiver.recv().await {
            Ok(Notification::IndicatorActive { at, volume }) => debug!("Snoring at {} (volume {:.2})", at, volume),
            Ok(Notification::IndicatorCleared { at }) => debug!("Quiet since {}", at),
            Ok(Notification::Elapsed { elapsed }) if elapsed.num_seconds() % 60 == 0 => {
                info!("Monitoring for {}", format_elapsed(elapsed))
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("Notification log skipped {} messages", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
