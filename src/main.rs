//! Gleaner 命令行入口
//!
//! 初始化日志与配置，组装同步运行时，并通过控制通道下发请求。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use gleaner::channel::{ControlRequest, MessageResponse, Requester};
use gleaner::core::builder::create_sync_builder;
use gleaner::core::shutdown::{run_with_graceful_shutdown, ShutdownCoordinator, StopSyncCleanup};
use gleaner::core::{Record, ShutdownManager, ShutdownReason, SyncSource, SyncStatus};

#[derive(Parser, Debug)]
#[command(name = "gleaner", about = "Incrementally collect bookmarks, likes and posts from a feed")]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sync until the feed is exhausted or Ctrl+C
    Sync {
        /// bookmarks, likes or own_tweets
        source: SyncSource,
        /// Account handle (name, @name or profile URL); overrides sync.handle
        #[arg(long)]
        handle: Option<String>,
    },
    /// Print the persisted sync status
    Status,
    /// Print collected records, newest first
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Force the status back to idle (e.g. after an interrupted run)
    Stop,
    /// Delete collected records and reset the status
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gleaner::observability::init();
    let cli = Cli::parse();

    let runtime = create_sync_builder(cli.config)
        .build()
        .context("Failed to initialise sync runtime")?;
    let control = runtime.control();

    match cli.command {
        Command::Sync { source, handle } => {
            let response = control
                .request(ControlRequest::StartSync { source, handle })
                .await;
            let data = expect_success(response, "start sync")?;
            if data.get("started").and_then(|v| v.as_bool()) != Some(true) {
                bail!("A sync is already in progress; run `gleaner stop` if it was interrupted");
            }

            let manager = Arc::new(ShutdownManager::new());
            let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
            coordinator.register(StopSyncCleanup::new(Arc::clone(&runtime.orchestrator)));

            let mut status_rx = runtime.orchestrator.subscribe();
            let finished = async move {
                loop {
                    if !status_rx.borrow_and_update().is_syncing() {
                        break;
                    }
                    if status_rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            if run_with_graceful_shutdown(&coordinator, finished).await.is_none() {
                let reason = match manager.reason() {
                    Some(ShutdownReason::Signal) => "SIGTERM",
                    _ => "Ctrl+C",
                };
                println!("Sync stopped ({})", reason);
            }

            print_status(&control).await?;
        }
        Command::Status => print_status(&control).await?,
        Command::List { limit } => {
            let data = expect_success(
                control.request(ControlRequest::GetSyncedRecords).await,
                "list records",
            )?;
            let records: Vec<Record> =
                serde_json::from_value(data).context("Malformed record list")?;
            for record in records.iter().take(limit.unwrap_or(usize::MAX)) {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        Command::Stop => {
            expect_success(control.request(ControlRequest::StopSync).await, "stop sync")?;
            print_status(&control).await?;
        }
        Command::Clear => {
            expect_success(
                control.request(ControlRequest::ClearSyncedData).await,
                "clear data",
            )?;
            println!("Cleared");
        }
    }

    runtime.shutdown();
    Ok(())
}

fn expect_success(response: MessageResponse, action: &str) -> anyhow::Result<serde_json::Value> {
    if let Some(error) = response.error_message() {
        bail!("Failed to {}: {}", action, error);
    }
    Ok(response.data.unwrap_or(serde_json::Value::Null))
}

async fn print_status(control: &Requester<ControlRequest>) -> anyhow::Result<()> {
    let data = expect_success(
        control.request(ControlRequest::GetSyncStatus).await,
        "read status",
    )?;
    let status: SyncStatus = serde_json::from_value(data).context("Malformed sync status")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
