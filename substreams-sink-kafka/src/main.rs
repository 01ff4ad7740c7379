//! Substreams to Kafka sink entry point.
//!
//! Streams the configured module's output into Kafka until the block range is
//! exhausted or the process is interrupted.

use std::env;
use std::process::ExitCode;

use dotenv::dotenv;
use substreams_sink_kafka::{AppError, Dependencies, SinkConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("substreams_sink_kafka=info,sink=info,stream=info"));

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .map_err(|e| AppError::Tracing(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .try_init()
            .map_err(|e| AppError::Tracing(e.to_string()))?;
    }

    info!(
        service_name = "substreams-sink-kafka",
        service_version = env!("CARGO_PKG_VERSION"),
        json,
        "Tracing initialized"
    );

    Ok(())
}

async fn run() -> Result<(), AppError> {
    let config = SinkConfig::from_env()?;
    let Dependencies { mut driver, events } = Dependencies::new(&config).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    let summary = driver.run(events, shutdown).await?;

    info!(
        stop = ?summary.stop,
        processed = summary.stats.processed,
        published = summary.stats.published,
        compensated = summary.stats.compensated,
        cursor = summary.cursor.as_ref().map(|c| c.position.number),
        "Sink stopped"
    );

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting substreams sink");

    match run().await {
        Ok(()) => {
            info!("Sink completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Sink failed");
            ExitCode::FAILURE
        }
    }
}
