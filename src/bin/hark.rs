//! CLI binary for hark.

use clap::{Parser, Subcommand};
use hark::HarkConfig;
use hark::audio::capture::CpalMicrophone;
use hark::audio::playback::CpalPlayback;
use hark::pipeline::messages::{LevelReading, SessionEvent, SessionEventKind, SessionId};
use hark::pipeline::services::Microphone;
use hark::pipeline::session::CaptureSession;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Hark: voice turn-taking engine.
#[derive(Parser)]
#[command(name = "hark", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "HARK_CONFIG")]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Listen to the microphone and report turn boundaries.
    Monitor {
        /// Keep listening after each turn instead of exiting.
        #[arg(long)]
        repeat: bool,
    },

    /// List available audio devices.
    Devices,

    /// Print the effective configuration as TOML.
    Config {
        /// Write the configuration to the config path.
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hark=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(HarkConfig::default_config_path);

    let config = if config_path.exists() {
        HarkConfig::from_file(&config_path)?
    } else {
        HarkConfig::default()
    };

    match cli.command.unwrap_or(Command::Monitor { repeat: false }) {
        Command::Monitor { repeat } => run_monitor(config, repeat).await,
        Command::Devices => list_devices(),
        Command::Config { write } => show_config(&config, &config_path, write),
    }
}

async fn run_monitor(config: HarkConfig, repeat: bool) -> anyhow::Result<()> {
    config.validate()?;
    println!("Hark v{}", env!("CARGO_PKG_VERSION"));
    println!("\nCalibrating... stay quiet for a moment, then speak. Press Ctrl+C to stop.\n");

    let microphone = CpalMicrophone;
    let (levels_tx, mut levels_rx) = watch::channel(LevelReading::default());
    let mut next_id = 0_u64;
    // Registered once so a signal between sessions is still seen.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        next_id += 1;
        let id = SessionId(next_id);
        let stream = microphone.open(&config.audio)?;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = CaptureSession::spawn(id, stream, &config, events_tx, levels_tx.clone());

        match follow_session(id, &mut events_rx, &mut levels_rx, ctrl_c.as_mut()).await {
            Outcome::TurnEnded => {}
            Outcome::Interrupted => {
                info!("received Ctrl+C, shutting down...");
                session.discard();
                return Ok(());
            }
            Outcome::StreamLost => {
                session.discard();
                anyhow::bail!("microphone stream ended");
            }
        }

        let utterance = session.finish();
        println!(
            "[{id}] turn ended: {:.1}s captured at {}Hz",
            utterance.duration_secs(),
            utterance.sample_rate
        );
        if !repeat {
            return Ok(());
        }
    }
}

/// How a monitored session finished.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    TurnEnded,
    StreamLost,
    Interrupted,
}

/// Print session progress until the turn ends, the stream goes away, or
/// `shutdown` resolves.
async fn follow_session<F: Future>(
    id: SessionId,
    events_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    levels_rx: &mut watch::Receiver<LevelReading>,
    mut shutdown: Pin<&mut F>,
) -> Outcome {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.as_mut() => return Outcome::Interrupted,
            event = events_rx.recv() => match event.map(|e| e.kind) {
                Some(SessionEventKind::StateChanged(state)) => println!("[{id}] {state}"),
                Some(SessionEventKind::MicStatus { active: false }) => {
                    println!("[{id}] no audio detected; check microphone permissions");
                }
                Some(SessionEventKind::MicStatus { active: true }) => {}
                Some(SessionEventKind::TurnEnded) => return Outcome::TurnEnded,
                Some(SessionEventKind::StreamEnded) | None => return Outcome::StreamLost,
            },
            Ok(()) = levels_rx.changed() => {
                let level = *levels_rx.borrow_and_update();
                if let Some(threshold) = level.threshold {
                    tracing::trace!(rms = level.rms, threshold, "level");
                }
            }
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalMicrophone::list_input_devices()? {
        println!("  {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  {name}");
    }

    Ok(())
}

fn show_config(config: &HarkConfig, path: &std::path::Path, write: bool) -> anyhow::Result<()> {
    if write {
        config.save_to_file(path)?;
        println!("wrote {}", path.display());
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}
