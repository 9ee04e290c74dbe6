//! Command-line interface: `run`, `report` and `set-config`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::alert::AlertClient;
use crate::api;
use crate::config::{self, ConfigError};
use crate::db::{Store, Target};
use crate::monitor::Engine;

pub const EXIT_INVALID_ARGS: i32 = 1;
pub const EXIT_CONNECTION: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;

const DEFAULT_CONFIG_PATH: &str = "/etc/sitewatch/config.yml";
const DEFAULT_AGENT_CONFIG_PATH: &str = "/etc/sitewatch/agent.yml";
const DEFAULT_DB_PATH: &str = "/var/lib/sitewatch/sitewatch.db";

/// An agent that continuously monitors the uptime of configured websites.
#[derive(Parser)]
#[command(name = "sitewatch", version, about)]
struct Cli {
    /// Path to the monitor configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path to the agent (alert sink) configuration file
    #[arg(long, global = true, default_value = DEFAULT_AGENT_CONFIG_PATH)]
    agent_config: PathBuf,

    /// Path to the SQLite database file
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the continuous monitoring process for the configured websites
    Run {
        /// Port for the read-only reporting API
        #[arg(long, default_value_t = 8080)]
        listen: u16,
    },

    /// Print a JSON monitoring report to stdout
    Report {
        /// Report a single URL, including its recent check history
        #[arg(short, long)]
        url: Option<String>,

        /// Number of history records to include
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },

    /// Convert a JSON configuration to YAML and save it to the config file
    SetConfig {
        /// JSON document, or '-' to read it from stdin
        json: String,
    },
}

/// Parse arguments and dispatch. Only returns on success; failures exit the
/// process with the documented codes.
pub async fn execute() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_INVALID_ARGS } else { 0 };
            let _ = err.print();
            process::exit(code);
        }
    };

    match cli.command {
        Commands::Run { listen } => run(&cli.config, &cli.agent_config, &cli.db, listen).await,
        Commands::Report { url, limit } => report(&cli.db, url.as_deref(), limit),
        Commands::SetConfig { json } => set_config(&cli.config, &json),
    }
}

async fn run(config_path: &Path, agent_config_path: &Path, db_path: &Path, listen: u16) {
    tracing::info!("loading configuration from {}", config_path.display());

    let configured = match config::load_targets(config_path) {
        Ok(targets) => targets,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(EXIT_CONFIG);
        }
    };

    let store = match Store::open(db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Failed to initialize database: {e}");
            process::exit(EXIT_CONNECTION);
        }
    };

    let targets = reconcile_targets(&store, configured);

    let agent_config = config::load_agent_config(agent_config_path);
    let alert = match AlertClient::new(&agent_config) {
        Ok(alert) => Arc::new(alert),
        Err(e) => {
            eprintln!("Failed to initialize alert client: {e}");
            process::exit(EXIT_CONNECTION);
        }
    };

    let engine = Engine::new(store.clone(), alert, targets);
    engine.start();

    let api_server = api::Server::new(store, config_path.to_path_buf(), listen);
    let api_stop = engine.stop_signal();
    tokio::spawn(async move {
        if let Err(e) = api_server.start(api_stop).await {
            tracing::error!("api server error: {}", e);
        }
    });

    wait_for_shutdown().await;
    tracing::info!("shutting down gracefully...");
    engine.shutdown().await;
}

/// Merge configured targets with their persisted rows: configuration columns
/// come from the file, observed state from the store.
fn reconcile_targets(store: &Store, configured: Vec<Target>) -> Vec<Target> {
    let mut merged = Vec::with_capacity(configured.len());

    for target in configured {
        if let Err(e) = store.upsert_target_config(&target) {
            tracing::error!("{} - failed to persist configuration: {}", target.url, e);
        }

        match store.get_target(&target.url) {
            Ok(Some(row)) => merged.push(row),
            Ok(None) => merged.push(target),
            Err(e) => {
                tracing::error!("{} - failed to load persisted state: {}", target.url, e);
                merged.push(target);
            }
        }
    }

    merged
}

fn report(db_path: &Path, url: Option<&str>, limit: u32) {
    let store = match Store::open(db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to initialize database: {e}");
            process::exit(EXIT_CONNECTION);
        }
    };

    let output = match url {
        None => match store.list_targets() {
            Ok(targets) => serde_json::to_string(&targets),
            Err(e) => {
                eprintln!("Failed to retrieve targets: {e}");
                process::exit(EXIT_CONNECTION);
            }
        },
        Some(url) => match store.get_target_with_history(url, limit) {
            Ok(Some(report)) => serde_json::to_string(&report),
            Ok(None) => {
                eprintln!("{url}: record not found");
                process::exit(EXIT_INVALID_ARGS);
            }
            Err(e) => {
                eprintln!("Failed to retrieve target details: {e}");
                process::exit(EXIT_CONNECTION);
            }
        },
    };

    match output {
        Ok(json) => print!("{json}"),
        Err(_) => {
            eprintln!("Error while serializing output");
            process::exit(EXIT_INVALID_ARGS);
        }
    }
}

fn set_config(config_path: &Path, json_arg: &str) {
    let raw = if json_arg == "-" {
        let mut buf = String::new();
        if std::io::stdin().read_to_string(&mut buf).is_err() {
            eprintln!("Error reading JSON from stdin");
            process::exit(EXIT_INVALID_ARGS);
        }
        buf
    } else {
        json_arg.to_string()
    };

    match config::update_monitor_config(config_path, raw.as_bytes()) {
        Ok(()) => {}
        Err(e @ (ConfigError::Json(_) | ConfigError::MissingConfigsKey)) => {
            eprintln!("Error: {e}");
            process::exit(EXIT_INVALID_ARGS);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(EXIT_CONFIG);
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::short_id;
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["sitewatch", "run", "--listen", "9090"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { listen: 9090 }));

        let cli = Cli::try_parse_from(["sitewatch", "--db", "/tmp/x.db", "report", "--url", "https://a"]).unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/x.db"));
        assert!(matches!(cli.command, Commands::Report { .. }));

        assert!(Cli::try_parse_from(["sitewatch", "frobnicate"]).is_err());
    }

    #[test]
    fn test_reconcile_prefers_persisted_state() {
        let store = Store::open_in_memory().unwrap();

        let mut first = Target {
            id: short_id(),
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        store.upsert_target_config(&first).unwrap();
        first.is_up = Some(false);
        first.retries = 1;
        store.update_target_state(&first).unwrap();

        // A fresh config entry for the same URL with a new interval.
        let configured = Target {
            id: short_id(),
            url: "https://example.com".to_string(),
            interval: Duration::from_secs(30),
            ..Default::default()
        };

        let merged = reconcile_targets(&store, vec![configured]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, first.id);
        assert_eq!(merged[0].interval, Duration::from_secs(30));
        assert_eq!(merged[0].is_up, Some(false));
        assert_eq!(merged[0].retries, 1);
    }
}
