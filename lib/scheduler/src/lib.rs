//! Time-driven side of the leadflow engine.
//!
//! This crate provides:
//!
//! - **Wake sweep**: Resumes waiting participants whose wait has expired and re-queues stalled ones
//! - **Job worker**: Runs queued execution jobs with exponential backoff on retryable failures
//! - **Calendar**: Five-field cron schedules that enroll cohorts into scheduled workflows

pub mod calendar;
pub mod error;
pub mod schedule;
pub mod sweep;
pub mod worker;

#[cfg(test)]
mod testing;

pub use calendar::{CalendarConfig, CalendarTicker, CohortResolver, StaticCohorts, TickReport};
pub use error::{ScheduleError, SweepError, WorkerError};
pub use schedule::CronSchedule;
pub use sweep::{SweepConfig, SweepReport, WakeSweeper};
pub use worker::{JobWorker, RetryPolicy, WorkerConfig};
