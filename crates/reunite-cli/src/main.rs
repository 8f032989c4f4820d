//! Operator CLI: config inspection, ledger verification and export, and a
//! self-contained demo run against an in-memory engine.

mod demo;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reunite_core::EngineConfig;
use reunite_ledger::{AuditLedger, ChainStatus};

#[derive(Parser)]
#[command(name = "reunite", version, about = "Identity resolution engine operator tool")]
struct Cli {
    /// Path to a JSON config file; defaults apply when omitted.
    #[arg(long, global = true, env = "REUNITE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as JSON.
    Config,
    /// Verify the audit-ledger hash chain in a data directory.
    Verify {
        /// Engine data directory (containing `ledger/`).
        data_dir: PathBuf,
    },
    /// Export a range of audit events as JSON lines.
    Export {
        data_dir: PathBuf,
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = u64::MAX)]
        to: u64,
    },
    /// Seed an in-memory engine with sample cases and walk the main flows.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("reunite v{}", env!("CARGO_PKG_VERSION"));
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Verify { data_dir } => {
            let ledger = AuditLedger::open(&data_dir.join("ledger"), config.ledger)
                .context("opening audit ledger")?;
            match ledger.verify_full() {
                ChainStatus::Valid => {
                    println!("chain valid over {} events", ledger.len());
                }
                ChainStatus::BrokenAt(id) => {
                    anyhow::bail!("audit chain broken at event {id}");
                }
            }
        }
        Command::Export { data_dir, from, to } => {
            let ledger = AuditLedger::open(&data_dir.join("ledger"), config.ledger)
                .context("opening audit ledger")?;
            for event in ledger.export_range(from, to)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Command::Demo => demo::run(config).await?,
    }

    Ok(())
}
