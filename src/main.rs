//! KlipperFleet daemon and CLI
//!
//! `klipperfleet serve` runs the HTTP API; the other subcommands drive the
//! orchestrator directly from a terminal.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

use klipperfleet::jobs::batch::{self, BatchAction};
use klipperfleet::server;
use klipperfleet::{AppPaths, AppState, TaskStatus};

const DEFAULT_LISTEN: &str = "0.0.0.0:8321";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("klipperfleet=info".parse()?),
        )
        .init();

    let paths = AppPaths::from_env()?;
    let state = Arc::new(AppState::new(paths));

    match cli.command {
        None => server::serve(state, DEFAULT_LISTEN).await?,
        Some(Commands::Serve { listen }) => server::serve(state, &listen).await?,

        Some(Commands::Discover) => {
            let serial = state.flash.discover_serial_devices(false).await;
            let mut can = Vec::new();
            for interface in state.flash.list_can_interfaces().await {
                can.extend(state.flash.discover_can_devices(&interface, true).await);
            }
            let dfu = state.flash.discover_dfu_devices(true).await;
            let linux = state.flash.discover_host_process();
            let listing = json!({
                "serial": serial,
                "can": can,
                "dfu": dfu,
                "linux": linux,
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }

        Some(Commands::Fleet) => {
            let fleet = server::fleet_snapshot(&state, false).await?;
            println!("{}", serde_json::to_string_pretty(&fleet)?);
        }

        Some(Commands::Batch { action }) => {
            let action = BatchAction::parse(&action)
                .ok_or_else(|| anyhow::anyhow!("invalid batch action: {action}"))?;
            let task_id = batch::spawn(state.clone(), action);

            // Follow the task log until it finishes
            let mut printed = 0;
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let Some(snapshot) = state.tasks.get(&task_id) else {
                    break;
                };
                for line in &snapshot.logs[printed..] {
                    print!("{line}");
                }
                printed = snapshot.logs.len();
                std::io::stdout().flush()?;
                if snapshot.completed {
                    if snapshot.status != TaskStatus::Completed {
                        std::process::exit(1);
                    }
                    break;
                }
            }
        }
    }

    Ok(())
}
