//! Send command implementation.

use std::path::PathBuf;

use anyhow::Result;

use speed_core::file::format_size;
use speed_core::session::{Peer, SendOutcome};

use super::SendArgs;
use crate::ui::follow_session;

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::peer_config(args.relay.as_deref())?;

    let mut peer = Peer::open(&config).await?;

    let receiver = if args.local {
        peer.id().to_string()
    } else {
        args.to.clone().unwrap_or_default()
    };

    if !args.quiet && !args.json {
        println!();
        println!("Speed v{}", speed_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        if args.local {
            println!("  Local transfer of {} item(s)", args.paths.len());
        } else {
            println!(
                "  Sending {} item(s) to {}",
                args.paths.len(),
                receiver.trim()
            );
        }
        println!();
    }

    let view = if args.quiet || args.json {
        None
    } else {
        Some(tokio::spawn(follow_session(peer.status(), peer.progress())))
    };

    let result = peer.send(&receiver, &args.paths).await;

    // Closing drops the status channels, so the view drains and exits.
    peer.close().await;
    if let Some(view) = view {
        let _ = view.await;
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if args.json {
                let output = serde_json::json!({
                    "status": "error",
                    "message": e.status(),
                    "code": e.code(),
                    "recoverable": e.is_recoverable(),
                });
                println!("{}", serde_json::to_string(&output)?);
            } else if !args.quiet && e.is_recoverable() {
                println!("  Run the command again to retry.");
                println!();
            }
            return Err(e.into());
        }
    };

    match outcome {
        SendOutcome::Sent { name, size, chunks } => {
            if args.json {
                let output = serde_json::json!({
                    "status": "sent",
                    "name": name,
                    "size": size,
                    "chunks": chunks,
                    "to": receiver.trim(),
                });
                println!("{}", serde_json::to_string(&output)?);
            } else if !args.quiet {
                println!();
                println!(
                    "  Files sent successfully: {} ({})",
                    name,
                    format_size(size)
                );
                println!();
            }
        }
        SendOutcome::Local(file) => {
            let output_dir = args
                .output
                .or_else(|| config.transfer.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            let path = file.save(&output_dir).await?;

            if args.json {
                let output = serde_json::json!({
                    "status": "local",
                    "name": &file.name,
                    "size": file.data.len(),
                    "path": path.display().to_string(),
                });
                println!("{}", serde_json::to_string(&output)?);
            } else if args.quiet {
                println!("{}", path.display());
            } else {
                println!();
                println!("  Local transfer completed: {}", path.display());
                println!();
            }
        }
    }

    Ok(())
}
