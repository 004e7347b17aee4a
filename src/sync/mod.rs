pub mod wait;

pub use wait::{Scheduler, TaskId, WaitQueue};
