//! AEGIS DNSSEC Rollover Entry Point
//!
//! Runs one rollover pass over every zone with an active signing key and
//! prints a single summary line. Meant to be triggered daily by an external
//! scheduler (cron, systemd timer); the process does no scheduling itself.
//!
//! ## Usage
//!
//! ```bash
//! # Normal run (API settings from the environment)
//! AEGIS_ROLLOVER_API_URL=http://127.0.0.1:8081 AEGIS_ROLLOVER_API_KEY=... aegis-dnssec-rollover
//!
//! # Show what would happen without touching keys or markers
//! aegis-dnssec-rollover --dry-run
//!
//! # Only look at selected zones, with per-zone tracing
//! aegis-dnssec-rollover --zone example.com --zone example.org --verbose
//! ```
//!
//! ## Configuration
//!
//! Built-in defaults, then the TOML file given by `--config`, then
//! `AEGIS_ROLLOVER_*` environment variables, then command-line flags.
//!
//! ## Exit status
//!
//! 0 after a completed pass (including when no zone was eligible), 1 when the
//! configuration, key-management client or database cannot be set up.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use aegis_dnssec_rollover::rollover::{
    HttpKeyClient, RolloverConfig, RolloverEngine, RolloverOrchestrator, RolloverPersistence,
};

/// AEGIS DNSSEC key rollover
#[derive(Parser, Debug)]
#[command(name = "aegis-dnssec-rollover")]
#[command(author = "AEGIS Team")]
#[command(version = "0.1.0")]
#[command(about = "AEGIS DNSSEC signing-key rollover orchestrator", long_about = None)]
struct Args {
    /// Path to configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database with zones, keys and rollover markers
    #[arg(long)]
    database: Option<PathBuf>,

    /// Only process the given zone (repeatable)
    #[arg(long = "zone", value_name = "ZONE")]
    zones: Vec<String>,

    /// Log intended actions without calling the API or writing markers
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose per-zone logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    // Dry runs exist to be read, so they always log at debug level
    let log_level = if args.verbose || args.dry_run {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Layer defaults, config file, environment and flags
fn load_config<F>(args: &Args, env: F) -> anyhow::Result<RolloverConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            RolloverConfig::from_toml(&content)?
        }
        None => RolloverConfig::default(),
    };

    config.apply_env(env)?;

    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }

    config.validate()?;
    Ok(config)
}

fn open_database(config: &RolloverConfig) -> anyhow::Result<RolloverPersistence> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let path = config
        .database_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    Ok(RolloverPersistence::new(path)?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Starting AEGIS DNSSEC rollover v{}{}",
        env!("CARGO_PKG_VERSION"),
        if args.dry_run { " (dry-run)" } else { "" }
    );

    let config = match load_config(&args, |name| std::env::var(name).ok()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Without a working client nothing can be rotated safely
    let client = match HttpKeyClient::new(&config.api) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Cannot construct key-management client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match open_database(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot open rollover database: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Rollover policy:");
    info!("  Interval: {} days", config.policy.rollover_interval_days);
    info!("  Hold: {} days", config.policy.hold_period_days);
    info!("  Deletion grace: {} days", config.policy.deletion_grace_days);
    info!(
        "  Defaults: {} {} (RSA {} bits)",
        config.policy.default_keytype, config.policy.default_algorithm, config.policy.rsa_bits
    );

    let engine = RolloverEngine::new(
        config.policy.clone(),
        client,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        args.dry_run,
    );
    let orchestrator =
        RolloverOrchestrator::new(engine, Arc::new(store)).with_zone_filter(args.zones.clone());

    match orchestrator.run(Utc::now()).await {
        Ok(report) => {
            println!("{}", report.summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cannot enumerate zones: {}", e);
            ExitCode::FAILURE
        }
    }
}
