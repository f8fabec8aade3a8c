//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use speed_core::config::{Config, RelayConfig};

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration: {}", e);
        Config::default()
    })
}

/// Load configuration and point it at `relay_url` when one is given.
///
/// The configured relay key is kept.
pub fn peer_config(relay_url: Option<&str>) -> anyhow::Result<Config> {
    let mut config = load_config();
    if let Some(url) = relay_url {
        let key = config.relay.key.clone();
        config.relay = RelayConfig {
            key,
            ..RelayConfig::from_url(url)?
        };
    }
    Ok(config)
}

pub mod config;
pub mod id;
pub mod receive;
pub mod relay;
pub mod send;

/// Speed - Peer-to-peer file transfer with short room IDs
#[derive(Parser)]
#[command(name = "speed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the signaling relay
    Relay(RelayArgs),

    /// Open a room and receive files
    Receive(ReceiveArgs),

    /// Send files to a room
    Send(SendArgs),

    /// Print a fresh room ID
    Id(IdArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

impl Command {
    /// Whether detailed logging was requested.
    pub const fn verbose(&self) -> bool {
        match self {
            Self::Relay(args) => args.verbose,
            Self::Receive(args) => args.verbose,
            Self::Send(args) => args.verbose,
            Self::Id(_) | Self::Config(_) => false,
        }
    }
}

/// Arguments for the relay command
#[derive(Parser)]
pub struct RelayArgs {
    /// Port to listen on (default: PORT env var, then config, then 4002)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to mount the relay at
    #[arg(long)]
    pub path: Option<String>,

    /// API key clients must present
    #[arg(long)]
    pub key: Option<String>,

    /// Allow clients to list connected peers
    #[arg(long)]
    pub allow_discovery: bool,

    /// Detailed logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// Output directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Exit after the first file
    #[arg(long)]
    pub once: bool,

    /// Relay URL (e.g., wss://relay.example.com/myapp)
    #[arg(long, env = "SPEED_RELAY")]
    pub relay: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Detailed logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Files and folders to send
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Room ID of the receiver
    #[arg(short, long, required_unless_present = "local", conflicts_with = "local")]
    pub to: Option<String>,

    /// Send to our own room: bundle and save locally
    #[arg(long)]
    pub local: bool,

    /// Output directory for a local transfer
    #[arg(short, long, requires = "local")]
    pub output: Option<PathBuf>,

    /// Relay URL (e.g., wss://relay.example.com/myapp)
    #[arg(long, env = "SPEED_RELAY")]
    pub relay: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Detailed logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the id command
#[derive(Parser)]
pub struct IdArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config action
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_requires_target() {
        assert!(Cli::try_parse_from(["speed", "send", "a.txt"]).is_err());
        assert!(Cli::try_parse_from(["speed", "send", "a.txt", "--to", "abcd1234"]).is_ok());
        assert!(Cli::try_parse_from(["speed", "send", "a.txt", "--local"]).is_ok());
        assert!(
            Cli::try_parse_from(["speed", "send", "a.txt", "--local", "--to", "abcd1234"]).is_err()
        );
    }

    #[test]
    fn test_verbose_flag() {
        let cli = Cli::try_parse_from(["speed", "receive", "--verbose"]).unwrap();
        assert!(cli.command.verbose());
        let cli = Cli::try_parse_from(["speed", "id"]).unwrap();
        assert!(!cli.command.verbose());
    }
}
