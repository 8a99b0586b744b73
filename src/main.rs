// src/main.rs

//! Operator command line for the coordination layer: inspect the strategy
//! registry and send start/stop commands to engines.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use moonship::config::Config;
use moonship::core::StoreBackend;
use moonship::core::ipc::{CommandOutcome, EngineClient, EngineCommand};
use moonship::core::registry::StrategyRegistry;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const DEFAULT_CONFIG_PATH: &str = "moonship.toml";

#[derive(Parser)]
#[command(name = "moonship", version)]
#[command(about = "Inspect the strategy registry and send commands to Moonship engines")]
struct Cli {
    /// Path to the TOML configuration file [default: moonship.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// List every registered strategy
    #[command(name = "strategies")]
    ListStrategies,
    /// Show one strategy
    #[command(name = "strategy")]
    ShowStrategy { engine: String, name: String },
    /// Ask an engine to start a strategy
    Start { engine: String, name: String },
    /// Ask an engine to stop a strategy
    Stop { engine: String, name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = match Config::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!(
                "Failed to load configuration from \"{}\": {e:#}",
                config_path.display()
            );
            std::process::exit(1);
        }
    };

    // Get the log level from the environment or the config.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(config, cli.action).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: Config, action: Action) -> Result<()> {
    let backend = StoreBackend::from_config(&config).context("Invalid store configuration")?;

    match action {
        Action::ListStrategies => {
            let cache = backend.shared_cache();
            cache.open().await?;
            let result = StrategyRegistry::new(cache.clone()).list_strategies().await;
            cache.close().await?;
            let strategies = result?
                .iter()
                .map(|s| s.to_json())
                .collect::<Result<Vec<_>, _>>()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "strategies": strategies }))?
            );
        }
        Action::ShowStrategy { engine, name } => {
            let cache = backend.shared_cache();
            cache.open().await?;
            let result = StrategyRegistry::new(cache.clone())
                .get_strategy(&name, &engine)
                .await;
            cache.close().await?;
            match result? {
                Some(strategy) => {
                    println!("{}", serde_json::to_string_pretty(&strategy.to_json()?)?)
                }
                None => return Err(anyhow!("No such strategy: {engine}/{name}")),
            }
        }
        Action::Start { engine, name } => {
            send_command(&backend, &config, EngineCommand::start(engine, name)).await?;
        }
        Action::Stop { engine, name } => {
            send_command(&backend, &config, EngineCommand::stop(engine, name)).await?;
        }
    }
    Ok(())
}

async fn send_command(
    backend: &StoreBackend,
    config: &Config,
    command: EngineCommand,
) -> Result<()> {
    let (engine, name) = (command.engine.as_str(), command.strategy.as_str());
    let bus = Arc::new(backend.message_bus());
    bus.start().await?;
    let client = EngineClient::new(bus.clone(), &config.message_bus);
    let result = client.send(&command).await;
    bus.close().await?;

    match result {
        Ok(CommandOutcome::Success) => {
            info!("Engine '{}' accepted the command for '{}'.", engine, name);
            println!("OK");
            Ok(())
        }
        Ok(CommandOutcome::MissingOrInvalidParameter(parameter)) => {
            Err(anyhow!("Missing or invalid: {parameter}"))
        }
        Ok(CommandOutcome::Failed) => Err(anyhow!("Engine '{engine}' failed to run the command")),
        Err(e) if e.is_timeout() => Err(anyhow!("Operation timeout: no reply from engine '{engine}'")),
        Err(e) => Err(e.into()),
    }
}
