//! Cooperative tick scheduling
//!
//! One scheduler drives many independently-stateful tasks across repeated
//! host-triggered ticks. Tasks suspend themselves voluntarily; stale queue
//! references are cancelled lazily through generation stamps; a tick cut
//! short by the host is resumed from a persisted cursor.

mod scheduler;
mod step;
mod task;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats, DEFAULT_STEP_BUDGET};
pub use step::{BoxedStep, Step, StepError, StepFactory, StepSource, StepStatus};
pub use task::{Task, TaskId, TaskState};
