//! Test harness with testcontainers for integration testing.
//!
//! Uses a shared Postgres container across all tests for dramatically
//! improved performance. The container and migrations are initialized once
//! on the first test, then reused.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use engine_core::kernel::job_runner::JobRunner;
use engine_core::kernel::jobs::PostgresJobQueue;
use engine_core::kernel::nats::TestNats;
use engine_core::kernel::EngineDeps;
use engine_core::Config;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Test harness wiring real engine dependencies against the shared database,
/// with a recording NATS mock in place of a broker.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub deps: EngineDeps,
    /// Recording publisher; assert on emitted gateway events through this.
    pub nats: Arc<TestNats>,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        // Database pool is automatically dropped
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        let nats = Arc::new(TestNats::new());
        let config = Config {
            database_url: infra.db_url.clone(),
            ..Config::default()
        };
        let deps = EngineDeps::new(
            db_pool.clone(),
            Arc::new(PostgresJobQueue::new(db_pool.clone())),
            nats.clone(),
            config,
        );

        Ok(Self {
            db_pool,
            deps,
            nats,
        })
    }

    /// Force one pending job due now and drain the runner until quiet.
    /// Drives durable timers deterministically instead of sleeping.
    pub async fn fire_job(&self, identity: &str) -> Result<()> {
        sqlx::query(
            "UPDATE engine_jobs SET run_at = NOW() WHERE identity = $1 AND status = 'pending'",
        )
        .bind(identity)
        .execute(&self.db_pool)
        .await?;
        self.drain_jobs().await
    }

    /// Run the job runner until a tick claims nothing. Repeatable jobs
    /// re-arm in the future, so this always terminates.
    pub async fn drain_jobs(&self) -> Result<()> {
        let runner = JobRunner::new(self.deps.clone());
        while runner.tick().await? > 0 {}
        Ok(())
    }

    /// Decode the event envelopes published to one subject as
    /// `(event, payload)` pairs, in publish order.
    pub fn events_for(&self, subject: &str) -> Vec<(String, serde_json::Value)> {
        self.nats
            .messages_for_subject(subject)
            .iter()
            .map(|m| {
                let envelope: serde_json::Value =
                    serde_json::from_slice(&m.payload).expect("event envelope is JSON");
                (
                    envelope["event"].as_str().unwrap_or_default().to_string(),
                    envelope["payload"].clone(),
                )
            })
            .collect()
    }

    pub fn event_count(&self, subject: &str, event: &str) -> usize {
        self.events_for(subject)
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }

    pub async fn job_status(&self, identity: &str) -> Result<Option<String>> {
        let status: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM engine_jobs WHERE identity = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(identity)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(status.map(|(s,)| s))
    }
}
