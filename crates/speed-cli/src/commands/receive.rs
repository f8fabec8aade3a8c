//! Receive command implementation.

use std::path::PathBuf;

use anyhow::Result;

use speed_core::file::format_size;
use speed_core::session::Peer;
use speed_core::Error;

use super::ReceiveArgs;
use crate::ui::{follow_session, RoomBox};

/// Run the receive command.
pub async fn run(args: ReceiveArgs) -> Result<()> {
    let config = super::peer_config(args.relay.as_deref())?;

    let output_dir = args
        .output
        .clone()
        .or_else(|| config.transfer.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut peer = Peer::open(&config).await?;

    if args.json {
        let output = serde_json::json!({
            "status": "ready",
            "room_id": peer.id().as_str(),
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if args.quiet {
        println!("{}", peer.id());
    } else {
        println!();
        println!("Speed v{}", speed_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        RoomBox::new(peer.id().as_str())
            .with_hint("Send files to this ID")
            .display();
        println!();
        println!("  Saving to {}", output_dir.display());
        println!("  Waiting for a peer... (Ctrl+C to stop)");
        println!();
    }

    let view = if args.quiet || args.json {
        None
    } else {
        Some(tokio::spawn(follow_session(peer.status(), peer.progress())))
    };

    let result = receive_loop(&mut peer, &args, &output_dir).await;

    peer.close().await;
    if let Some(view) = view {
        let _ = view.await;
    }
    result
}

async fn receive_loop(
    peer: &mut Peer,
    args: &ReceiveArgs,
    output_dir: &std::path::Path,
) -> Result<()> {
    loop {
        let received = tokio::select! {
            received = peer.receive() => received,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };

        match received {
            Ok(file) => {
                let path = file.save(output_dir).await?;

                if args.json {
                    let output = serde_json::json!({
                        "status": "received",
                        "name": &file.name,
                        "type": &file.mime_type,
                        "size": file.data.len(),
                        "path": path.display().to_string(),
                    });
                    println!("{}", serde_json::to_string(&output)?);
                } else if args.quiet {
                    println!("{}", path.display());
                } else {
                    println!(
                        "  Saved {} ({}) to {}",
                        file.name,
                        format_size(file.data.len() as u64),
                        path.display()
                    );
                    println!();
                }
            }
            Err(e @ (Error::RelayUnreachable(_) | Error::Relay(_))) => return Err(e.into()),
            Err(e) => {
                if args.json {
                    let output = serde_json::json!({
                        "status": "error",
                        "message": e.status(),
                        "code": e.code(),
                        "recoverable": e.is_recoverable(),
                    });
                    println!("{}", serde_json::to_string(&output)?);
                } else if args.quiet {
                    eprintln!("{}", e.status());
                } else if !args.once && e.is_recoverable() {
                    println!("  Still listening for the next transfer.");
                    println!();
                }
                if args.once {
                    return Err(e.into());
                }
            }
        }

        if args.once {
            return Ok(());
        }
    }
}
