//! `logingest-scheduler` — cron-driven job engine with bounded concurrency.
//!
//! # Overview
//!
//! Jobs are held in an in-memory registry keyed by id. The [`engine::Scheduler`]
//! polls once per second, fires every job whose next cron time has arrived and
//! runs each execution as its own tokio task behind a global semaphore.
//!
//! # Trigger semantics
//!
//! | Situation                              | Behaviour                                   |
//! |----------------------------------------|---------------------------------------------|
//! | Several fires overdue                  | Coalesced into one execution                |
//! | Latest overdue fire older than grace   | Dropped, counted in `missed_count`          |
//! | Job already at its instance cap        | Fire skipped, counted in `missed_count`     |
//! | No free global slot                    | Waits until the grace window runs out       |
//! | Execution fails or panics              | Logged, `error_count` bumped, job stays     |

pub mod clock;
pub mod cron;
pub mod engine;
pub mod error;
pub mod types;

pub use clock::{Clock, SystemClock, TokioClock};
pub use cron::CronSchedule;
pub use engine::Scheduler;
pub use error::{Result, SchedulerError};
pub use types::{JobConfig, JobRunStats, JobStatus, SchedulerSettings, SchedulerStatus};
