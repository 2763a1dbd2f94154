use std::env;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use snore_recorder::data::{MemoryStore, SessionHistory};
use snore_recorder::monitor::Monitor;
use snore_recorder::notify::Notifier;
use snore_recorder::report::timeline;
use snore_recorder::schedule::Immediate;
use snore_recorder::settings::SettingsHandle;
use snore_recorder::source::Recording;

/// Scores each MP3 given on the command line without touching saved history.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // construct a subscriber that prints formatted traces to stdout
    let subscriber = tracing_subscriber::FmtSubscriber::new();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber)?;

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        warn!("Usage: analysis <recording.mp3>...");
        return Ok(());
    }

    info!("Starting snore_recorder analysis");
    for path in paths {
        if let Err(e) = analyze(Path::new(&path)).await {
            warn!("Skipping {}: {}", path, e);
        }
    }
    Ok(())
}

async fn analyze(path: &Path) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let monitor = Monitor::new(SettingsHandle::load(store.clone()), SessionHistory::new(store), Notifier::new());
    let mut recording = Recording::open_mp3(path)?;
    let clock = recording.clock();

    let session = monitor
        .run_session(&mut recording, &mut Immediate, &clock, &CancellationToken::new())
        .await?;

    info!(
        "{}: score {}, {} events, {} min snoring",
        path.display(),
        session.snore_score,
        session.event_count,
        session.total_snore_time
    );
    if let Some(raw) = &session.raw_data {
        for ((offset, width), event) in timeline(raw).into_iter().zip(&raw.events) {
            info!(
                "  {:>5.1}% +{:.1}%  peak {:.2}  avg {:.2}",
                offset * 100.0,
                width * 100.0,
                event.peak_volume,
                event.avg_volume
            );
        }
    }
    Ok(())
}
