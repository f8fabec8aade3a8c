//! Relay command implementation.

use anyhow::Result;

use speed_core::relay::RelayServer;

use super::RelayArgs;

/// Run the relay command.
pub async fn run(args: RelayArgs) -> Result<()> {
    let mut config = super::load_config();
    config.server.apply_env()?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(path) = args.path {
        config.server.path = path;
    }
    if let Some(key) = args.key {
        config.server.key = key;
    }
    if args.allow_discovery {
        config.server.allow_discovery = true;
    }
    config.validate()?;

    let server = RelayServer::bind(config.server.clone()).await?;
    let addr = server.local_addr()?;

    println!();
    println!("Speed relay v{}", speed_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Listening on port {}", addr.port());
    println!("  Mounted at {}", config.server.path);
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    server
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("  Relay stopped.");
    Ok(())
}
