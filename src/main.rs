//! Entry point: load config, connect, and drive the sync layer from stdin.
//!
//! Each stdin line is a host event:
//! `hide` / `show` toggle visibility, `clear <id>` acknowledges a task,
//! `unread <id>` prints its count, `refresh` re-seeds, anything else counts
//! as a key press.

use notif_sync::config::Config;
use notif_sync::create_client;
use notif_sync::models::presence::{ActivityKind, Visibility};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = create_client(config);
    if !client.connect() {
        anyhow::bail!("NOTIF_TOKEN must be set");
    }
    match client.engine.refresh().await {
        Ok(count) => tracing::info!(count, "seeded unread counts"),
        Err(e) => tracing::warn!(error = %e, "initial task fetch failed"),
    }

    let heartbeat = client.start_heartbeat(Visibility::Visible);
    tracing::info!(session = %heartbeat.session_id(), "listening for host events on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line.split_once(' ') {
                    Some(("clear", id)) => client.engine.clear(id.trim()).await,
                    Some(("unread", id)) => println!("{} {}", id.trim(), client.engine.unread(id.trim())),
                    _ if line == "hide" => heartbeat.set_visibility(Visibility::Hidden),
                    _ if line == "show" => heartbeat.set_visibility(Visibility::Visible),
                    _ if line == "refresh" => {
                        if let Err(e) = client.engine.refresh().await {
                            tracing::warn!(error = %e, "task fetch failed");
                        }
                    }
                    _ => heartbeat.activity(ActivityKind::KeyDown),
                }
            }
        }
    }

    heartbeat.teardown();
    client.shutdown();
    tracing::info!(total_unread = client.engine.total_unread(), "stopped");
    Ok(())
}
