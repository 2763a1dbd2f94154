use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use snore_recorder::report::{format_duration, recommendations};
use snore_recorder::scorer::ScoredSession;
use snore_recorder::{open_monitor, replay_recording, snore_tracker};

#[derive(Debug, Parser)]
#[command(about = "Snore monitor and sleep session history", author, version)]
struct Cli {
    /// Directory holding settings and session history
    #[arg(long, env = "SNORE_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor the microphone until Ctrl-C
    Monitor {
        /// ALSA capture device
        #[arg(long, default_value = "default")]
        device: String,
    },
    /// Score a recorded MP3 as if it had been monitored live
    Replay { path: PathBuf },
    /// List saved sessions
    History,
    /// Write the session history to a dated JSON file
    Export {
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Delete saved sessions and settings
    Clear,
    /// Show or change detection settings
    Settings {
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        sensitivity: Option<u8>,
        /// Minimum snore duration in seconds (stored, not used for detection)
        #[arg(long)]
        min_duration: Option<u32>,
        #[arg(long)]
        volume_threshold: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Monitor { device } => print_session(&snore_tracker(&cli.data_dir, &device).await?),
        Command::Replay { path } => print_session(&replay_recording(&cli.data_dir, &path).await?),
        Command::History => {
            let history = open_monitor(&cli.data_dir).history().clone();
            let summary = history.summary();
            println!(
                "{} sessions, average score {}, last score {}",
                summary.total_sessions,
                summary.average_score,
                summary.last_score.map_or_else(|| "-".to_string(), |s| s.to_string())
            );
            for session in history.load() {
                println!(
                    "{}  score {:>3}  {:>8}  {:>3} events  {}",
                    session.date,
                    session.snore_score,
                    format_duration(session.duration),
                    session.event_count,
                    session.sleep_quality
                );
            }
        }
        Command::Export { out_dir } => {
            let path = open_monitor(&cli.data_dir).history().export_today(&out_dir)?;
            println!("{}", path.display());
        }
        Command::Clear => {
            open_monitor(&cli.data_dir).history().clear();
            info!("All data cleared.");
        }
        Command::Settings {
            sensitivity,
            min_duration,
            volume_threshold,
        } => {
            let monitor = open_monitor(&cli.data_dir);
            let settings = monitor.settings();
            if let Some(sensitivity) = sensitivity {
                settings.set_sensitivity(sensitivity);
            }
            if let Some(seconds) = min_duration {
                settings.set_min_duration(seconds);
            }
            if let Some(threshold) = volume_threshold {
                settings.set_volume_threshold(threshold);
            }
            println!("{}", serde_json::to_string_pretty(&settings.snapshot())?);
        }
    }
    Ok(())
}

fn print_session(session: &ScoredSession) {
    println!("Snore score: {} ({})", session.snore_score, session.describe_score());
    println!("Duration: {}", format_duration(session.duration));
    println!("Snore events: {} ({} intensity)", session.event_count, session.intensity);
    println!("Total snore time: {} min", session.total_snore_time);
    println!("Volume: avg {}%, peak {}%", session.avg_volume, session.peak_volume);
    for tip in recommendations(session.snore_score) {
        println!("  - {tip}");
    }
}
