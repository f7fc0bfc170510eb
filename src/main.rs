mod admin;
mod config;
mod error;
mod executor;
mod numeric;
mod params;
mod pool;
mod rows;
mod server;
mod tools;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = config::Config::from_env()?;
    tracing::info!(
        "Starting postgres-mcp ({:?} transport, database {}@{}:{}/{})",
        config.transport,
        config.pg.user,
        config.pg.host,
        config.pg.port,
        config.pg.database
    );

    server::run(config).await
}

/// Log to stderr; stdout carries the protocol when serving over stdio.
/// `LOG_FORMAT=json` switches to structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("postgres_mcp=info,rmcp=info"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}
