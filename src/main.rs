mod actions;
mod config;
mod console;
mod controller;
mod diff;
mod domain;
mod events;
mod github;
mod http;
mod retry;
mod storage;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    actions::SystemLauncher,
    config::{ConfigProvider, Configuration},
    console::ConsoleSink,
    controller::{NotificationSink, PollingController},
    events::EventBus,
    github::ApiClient,
    http::ReqwestTransport,
    storage::SettingsStore,
};

#[derive(Parser)]
#[command(name = "github-notifier")]
#[command(about = "Polls GitHub notifications and announces new ones")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to ~/.github-notifier/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Log filter, e.g. `debug` or `github_notifier=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll until interrupted (default)
    Run,
    /// Print one setting, or all of them
    Get { key: Option<String> },
    /// Change a setting
    Set { key: String, value: String },
    /// Mark every notification as read
    MarkAllRead,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let bus = EventBus::new();
    let store = Arc::new(match &cli.settings {
        Some(path) => SettingsStore::open(path, bus.clone())?,
        None => SettingsStore::initialize(bus.clone())?,
    });

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(store, bus).await,
        Command::Get { key } => show_settings(&store, key.as_deref()),
        Command::Set { key, value } => {
            store.set_from_str(&key, &value)?;
            Ok(())
        }
        Command::MarkAllRead => mark_all_read(store, bus).await,
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("github_notifier=info")),
    };

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(store: Arc<SettingsStore>, bus: EventBus) -> Result<()> {
    let config = Arc::new(Configuration::new(store, bus.clone()));
    if config.token().is_empty() {
        warn!("no token configured; set one with `github-notifier set token <TOKEN>`");
    }

    let sink = Arc::new(ConsoleSink::new());
    sink.update_visibility(config.hide_notification_count(), config.hide_widget());
    sink.follow(&bus);

    let controller = PollingController::new(
        config,
        Arc::new(ReqwestTransport::new()?),
        Arc::new(SystemLauncher),
        sink.clone(),
        bus,
    );
    controller.start();
    println!("commands: a <n> (activate), p <n> (primary), s <n> (secondary); Ctrl-C quits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => match console::parse_command(&line) {
                    Some((slot, index)) => match sink.take_action(slot, index) {
                        Some(action) => action.invoke().await,
                        None => println!("notification {index} has no such action"),
                    },
                    None if line.trim().is_empty() => {}
                    None => println!("unrecognised command: {}", line.trim()),
                },
                // stdin closed; keep polling until interrupted
                None => {
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    controller.stop();
    info!("polling stopped");
    Ok(())
}

fn show_settings(store: &SettingsStore, key: Option<&str>) -> Result<()> {
    match key {
        Some(key) => match store.get(key) {
            Some(value) => println!("{value}"),
            None => anyhow::bail!("Unknown setting \"{key}\""),
        },
        None => {
            for (key, value) in store.entries() {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}

async fn mark_all_read(store: Arc<SettingsStore>, bus: EventBus) -> Result<()> {
    let config = Configuration::new(store, bus);
    let client = ApiClient::new(
        Arc::new(ReqwestTransport::new()?),
        &config.domain(),
        &config.token(),
    );
    client.mark_all_threads_as_read(Utc::now()).await?;
    println!("all notifications marked as read");
    Ok(())
}
