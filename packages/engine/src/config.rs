use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    /// Interval between matchmaking sweep runs, in seconds
    pub sweep_interval_secs: i64,
    /// Initial skill-rating tolerance for a fresh waiting entry
    pub base_tolerance: i32,
    /// Tolerance added per sweep tick while an entry waits
    pub tolerance_step: i32,
    /// Sweep ticks before a waiting entry is failed back to the requester
    pub max_sweep_ticks: i32,
    /// Questions drawn per session
    pub questions_per_session: usize,
    /// Per-question budget applied when a shared-round session is created
    /// without one, in seconds
    pub default_question_time_secs: i32,
    /// Job runner poll interval, in milliseconds
    pub job_poll_interval_ms: u64,
    /// Retry ceiling for failed job handlers before dead-lettering
    pub job_max_retries: i32,
    /// Seconds a claimed job may sit unfinished before another runner
    /// reclaims it
    pub job_lease_secs: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 5)?,
            base_tolerance: env_parse("MATCH_BASE_TOLERANCE", 100)?,
            tolerance_step: env_parse("MATCH_TOLERANCE_STEP", 100)?,
            max_sweep_ticks: env_parse("MATCH_MAX_SWEEP_TICKS", 6)?,
            questions_per_session: env_parse("QUESTIONS_PER_SESSION", 50)?,
            default_question_time_secs: env_parse("DEFAULT_QUESTION_TIME_SECS", 10)?,
            job_poll_interval_ms: env_parse("JOB_POLL_INTERVAL_MS", 250)?,
            job_max_retries: env_parse("JOB_MAX_RETRIES", 3)?,
            job_lease_secs: env_parse("JOB_LEASE_SECS", 60)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            nats_url: "nats://localhost:4222".to_string(),
            sweep_interval_secs: 5,
            base_tolerance: 100,
            tolerance_step: 100,
            max_sweep_ticks: 6,
            questions_per_session: 50,
            default_question_time_secs: 10,
            job_poll_interval_ms: 250,
            job_max_retries: 3,
            job_lease_secs: 60,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}
