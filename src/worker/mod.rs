pub mod poll_worker;

pub use poll_worker::{CycleReport, Scheduler, SchedulerState};
