//! Finplay CLI - headless client for the playback engine
//!
//! Features:
//! - Device profile inspection
//! - Bitrate probing against a server
//! - PlaybackInfo negotiation
//! - Simulated playback sessions with full reporting

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use output::OutputFormat;

/// Finplay CLI - Jellyfin playback session toolkit
#[derive(Parser)]
#[command(name = "finplay")]
#[command(version)]
#[command(about = "Negotiate and simulate playback sessions against a Jellyfin server", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    /// Server base URL
    #[arg(long, global = true, env = "FINPLAY_SERVER")]
    server: Option<String>,

    /// Access token
    #[arg(long, global = true, env = "FINPLAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Device identifier sent with every request
    #[arg(long, global = true, default_value = "finplay-cli")]
    device_id: String,

    /// JSON file with session tunables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Decoders the simulated device claims
#[derive(Args, Clone)]
pub struct CapabilityArgs {
    /// Video decoders, comma separated
    #[arg(long, default_value = "h264,hevc,vp9")]
    video: String,

    /// Audio decoders, comma separated
    #[arg(long, default_value = "aac,mp3,ac3,eac3,flac")]
    audio: String,

    /// Audio output channels (unset behaves like a missing audio device)
    #[arg(long)]
    channels: Option<u32>,
}

/// Item and stream choice shared by negotiate and play
#[derive(Args, Clone)]
pub struct ItemArgs {
    /// Item id
    item: String,

    /// Media source id to resume
    #[arg(long)]
    source: Option<String>,

    /// Audio stream index
    #[arg(long)]
    audio_index: Option<i32>,

    /// Subtitle stream index (-1 turns subtitles off)
    #[arg(long, allow_hyphen_values = true)]
    subtitle_index: Option<i32>,

    /// Start position in seconds
    #[arg(long)]
    start: Option<f64>,

    /// Skip the bitrate probe
    #[arg(long)]
    no_probe: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the device profile built from a capability list
    Profile {
        #[command(flatten)]
        caps: CapabilityArgs,
    },

    /// Measure throughput against the server's bitrate test endpoint
    Probe,

    /// Ask the server how it would deliver an item
    Negotiate {
        #[command(flatten)]
        item: ItemArgs,

        #[command(flatten)]
        caps: CapabilityArgs,
    },

    /// Run a full session with a headless player
    Play {
        #[command(flatten)]
        item: ItemArgs,

        #[command(flatten)]
        caps: CapabilityArgs,

        /// Seconds to play before stopping
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    let format = OutputFormat::from(cli.format.as_str());
    let config = commands::load_config(cli.config.as_deref())?;
    let remote = commands::Remote {
        server: cli.server,
        token: cli.token,
        device_id: cli.device_id,
    };

    match cli.command {
        Commands::Profile { caps } => {
            commands::profile(&caps, &config, format).await?;
        }
        Commands::Probe => {
            commands::probe(&remote, &config, format).await?;
        }
        Commands::Negotiate { item, caps } => {
            commands::negotiate(&remote, &item, &caps, &config, format).await?;
        }
        Commands::Play { item, caps, seconds } => {
            commands::play(&remote, &item, &caps, &config, seconds, format).await?;
        }
    }

    Ok(())
}
