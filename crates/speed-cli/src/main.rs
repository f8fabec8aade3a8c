//! Speed CLI - Peer-to-peer file transfer with short room IDs
//!
//! One side opens a room and waits, the other sends files to that room ID.
//! A signaling relay brokers the handshake; file bytes travel directly.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a relay (once, somewhere both peers can reach)
//! speed relay
//!
//! # Receive files
//! speed receive
//!
//! # Send files (on another machine)
//! speed send ./photo.jpg --to k3x9q2ab
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.command.verbose());

    match cli.command {
        Command::Relay(args) => commands::relay::run(args).await,
        Command::Receive(args) => commands::receive::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Id(args) => commands::id::run(&args),
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "debug"
    } else {
        "warn,speed=info,speed_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
