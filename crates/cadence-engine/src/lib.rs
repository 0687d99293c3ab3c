//! Cadence Engine
//!
//! A cooperative task scheduler for hosts that hand out execution in
//! discrete, budget-bounded windows ("ticks"). The host supplies a
//! monotonic tick counter and calls [`Scheduler::tick`] once per window;
//! the scheduler drives each runnable task's resumable step, moves
//! sleeping tasks through a time-ordered suspension queue, and contains
//! every per-task failure so that one misbehaving task cannot take the
//! window down with it.
//!
//! Key mechanisms:
//! - **Generation-stamped cancellation**: every queue entry carries the
//!   task's generation at enqueue time. Suspending, rescheduling,
//!   restarting, or finishing a task bumps its generation, turning stale
//!   entries into ghosts that are dropped when dequeued instead of being
//!   searched for eagerly.
//! - **Bounded self-continuation**: a step may ask to be driven again
//!   within the same tick; a per-task step budget converts an
//!   unconditional continuation loop into a contained fault instead of a
//!   stalled host.
//! - **Abort-resilient iteration**: the host may cut a tick short at any
//!   instruction. A persisted cursor lets the next tick notify the
//!   interrupted task and continue with the entries the aborted pass
//!   never reached.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_engine::{Scheduler, StepSource, StepStatus};
//!
//! let sched = Scheduler::new();
//! let task = sched.spawn_named(
//!     "heartbeat",
//!     StepSource::from_fn(|task| {
//!         task.sleep_for(10);
//!         Ok(StepStatus::Yielded)
//!     }),
//! );
//! task.start();
//!
//! for now in 0..100 {
//!     sched.tick(now);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Fault taxonomy and diagnostic sink.
pub mod diag;

/// Scheduler, task state machine, and resumable-step contract.
pub mod sched;

pub use diag::{DiagnosticSink, Fault, FaultKind, NullSink, StderrSink};
pub use sched::{
    BoxedStep, Scheduler, SchedulerConfig, SchedulerStats, Step, StepError, StepFactory,
    StepSource, StepStatus, Task, TaskId, TaskState, DEFAULT_STEP_BUDGET,
};
