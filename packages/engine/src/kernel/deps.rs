//! Engine dependency container.
//!
//! Handlers receive everything through this cloneable container so workers
//! stay stateless: the store pool, the job queue boundary, and the outbound
//! event gateway. Trait objects at the seams keep tests free of real
//! infrastructure.

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::kernel::gateway::Gateway;
use crate::kernel::jobs::JobQueue;
use crate::kernel::nats::NatsPublisher;

/// Dependencies accessible to every action and job handler.
#[derive(Clone)]
pub struct EngineDeps {
    pub db_pool: PgPool,
    pub jobs: Arc<dyn JobQueue>,
    pub gateway: Gateway,
    pub config: Config,
}

impl EngineDeps {
    pub fn new(
        db_pool: PgPool,
        jobs: Arc<dyn JobQueue>,
        publisher: Arc<dyn NatsPublisher>,
        config: Config,
    ) -> Self {
        Self {
            db_pool,
            jobs,
            gateway: Gateway::new(publisher),
            config,
        }
    }
}
