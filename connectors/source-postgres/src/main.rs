//! PostgreSQL Source Connector for Tabular Connect
//!
//! Reads a table or query result from PostgreSQL and hands the records to the
//! embedding pipeline as JSON lines on stdout.

mod config;
mod source;

use config::PostgresSourceConfig;
use source::PostgresSource;
use tabular_connect_core::{ConnectorResult, PipelineContext, SourceRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ConnectorResult<()> {
    // Initialize logging
    init_tracing();

    tracing::info!("Starting PostgreSQL Source Connector");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = PostgresSourceConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    tracing::info!("Component: {}", config.core.component_name);
    tracing::info!(
        "Database: {}@{}:{}/{}",
        config.postgres.user,
        config.postgres.host,
        config.postgres.port,
        config.postgres.database
    );

    // Create component instance
    let source = PostgresSource::new();

    // Create and run the runtime
    let ctx = PipelineContext::new();
    let mut runtime = SourceRuntime::new(source, config)?;
    runtime.install_signal_handler();

    let stats = runtime
        .run(Some(&ctx), |record| {
            println!("{}", record.to_json());
            Ok(())
        })
        .await?;

    tracing::info!(
        "PostgreSQL Source Connector stopped: total={} succeeded={} rejected={}",
        stats.total_count,
        stats.success_count,
        stats.reject_count
    );
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tabular_source_postgres=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
