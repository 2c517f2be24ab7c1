//! Engine infrastructure: dependency container, job queue boundary, job
//! runner, outbound event gateway, NATS publisher.

pub mod deps;
pub mod gateway;
pub mod job_runner;
pub mod jobs;
pub mod nats;
pub mod router;

pub use deps::EngineDeps;
pub use gateway::{Address, Gateway, ALLOWED_EVENTS};
pub use job_runner::JobRunner;
pub use jobs::{
    EngineJob, JobQueue, PostgresJobQueue, ScheduleOptions, TestJobQueue,
    JOB_GAME_END, JOB_LOBBY_COUNTDOWN, JOB_MATCHMAKING_SWEEP, JOB_QUESTION_TIMEOUT,
    MATCHMAKING_SWEEP_IDENTITY,
};
pub use nats::{NatsClientPublisher, NatsPublisher, PublishedMessage, TestNats};
