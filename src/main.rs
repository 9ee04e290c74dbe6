//! sitewatch - website uptime monitoring agent.
//!
//! Probes configured HTTP(S) endpoints, debounces transient failures through
//! a retry state machine, tracks incident lifecycles, and publishes them to
//! a remote alert sink.

mod alert;
mod api;
mod cli;
mod config;
mod db;
mod incident;
mod monitor;
mod probe;
mod util;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sitewatch=info")),
        )
        .init();

    cli::execute().await;
}
