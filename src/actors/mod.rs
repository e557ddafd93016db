pub mod run_scheduler;

pub use run_scheduler::{RunScheduler, RunSchedulerConfig, RunSchedulerMessage, SchedulerStats};
