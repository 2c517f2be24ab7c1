// Main entry point for the game engine worker

use std::sync::Arc;

use anyhow::{Context, Result};
use engine_core::Config;
use engine_core::kernel::job_runner::JobRunner;
use engine_core::kernel::jobs::PostgresJobQueue;
use engine_core::kernel::nats::NatsClientPublisher;
use engine_core::kernel::router;
use engine_core::kernel::EngineDeps;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,engine_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting trivia game engine");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    tracing::info!("Connecting to NATS at {}...", config.nats_url);
    let nats = async_nats::connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")?;

    let deps = EngineDeps::new(
        pool.clone(),
        Arc::new(PostgresJobQueue::new(pool)),
        Arc::new(NatsClientPublisher::new(nats)),
        config,
    );

    router::register_sweep(&deps)
        .await
        .context("Failed to register matchmaking sweep")?;

    tracing::info!("Starting job runner");
    JobRunner::new(deps).run().await.context("Job runner error")?;

    Ok(())
}
