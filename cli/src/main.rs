// blecentral-cli: replay and configure a BLE central session
//
// Runs scripted OS callbacks through the central core against a simulated
// central and manages the JSON config the core is built from.

mod config;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blecentral")]
#[command(about = "BLE central orchestration core", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON script of callbacks and commands
    Simulate {
        script: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file as JSON
    Show,
    /// Write the default config file
    Init,
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Simulate { script, json } => cmd_simulate(cli.config, script, json).await,
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

async fn cmd_simulate(config_path: Option<PathBuf>, script: PathBuf, json: bool) -> Result<()> {
    let config = config::Config::load(config_path.as_deref())?;
    let script = simulate::Script::load(&script)?;
    let steps = script.steps.len();

    let report = simulate::run(script, &config.central).await?;

    if json {
        let out = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", out);
        return Ok(());
    }

    println!("{} Replayed {} steps", "✓".green(), steps);
    println!();

    println!("{}", "OS requests".bold());
    if report.requests.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (i, request) in report.requests.iter().enumerate() {
        println!("  {}. {}", i + 1, request);
    }
    println!();

    println!("{}", "Connect results".bold());
    if report.results.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (peripheral, result) in &report.results {
        let result = match result {
            Some(change) if change.is_connected() => change.to_string().green(),
            Some(change) => change.to_string().yellow(),
            None => "dropped".red(),
        };
        println!("  {} {}", peripheral.to_string().bright_cyan(), result);
    }
    println!();

    println!("{}", "Application events".bold());
    if report.events.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for event in &report.events {
        println!("  {}", event);
    }

    if !report.restorations.is_empty() {
        println!();
        println!("{}", "Restorations".bold());
        for restoration in &report.restorations {
            println!(
                "  restored: {}  reconnected: {}  scan resumed: {}",
                restoration.delegates_registered.len(),
                restoration.reconnected.len(),
                restoration.scan_resumed
            );
        }
    }

    if !report.reconciliations.is_empty() {
        println!();
        println!("{}", "Reconciliation".bold());
        for reconciliation in &report.reconciliations {
            println!(
                "  untracked: {:?}  orphaned: {:?}",
                reconciliation.untracked, reconciliation.orphaned
            );
        }
    }

    if !report.rejected.is_empty() {
        println!();
        println!("{}", "Rejected".bold());
        for rejected in &report.rejected {
            println!("  {} {}", "✗".red(), rejected);
        }
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load(config_path.as_deref())?;

    match action {
        ConfigAction::Show => {
            let json = config.central.to_json().context("Failed to serialize config")?;
            println!("{}", json);
        }

        ConfigAction::Init => {
            if config.path().exists() {
                println!(
                    "{} Config already exists at {}",
                    "⚠".yellow(),
                    config.path().display()
                );
            } else {
                config.save()?;
                println!(
                    "{} Wrote default config to {}",
                    "✓".green(),
                    config.path().display()
                );
            }
        }

        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!("  {}", config.path().display().to_string().dimmed());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
