//! Recurring exports: trigger evaluation and the background runner.

pub mod runner;
pub mod trigger;

pub use audience_core::{Clock, ManualClock, SystemClock};
pub use runner::{ScheduleRunner, ScheduleStatus, TickReport};
pub use trigger::{is_due, next_due, RunState};
