//! Fault taxonomy and diagnostic sink
//!
//! Nothing in the scheduler core propagates an error out of `tick`: every
//! failure is contained to the task that caused it and reported here. The
//! sink is injected at scheduler construction so hosts can route reports
//! into their own diagnostics.

use crate::sched::TaskId;
use crate::sched::StepError;
use thiserror::Error;

/// A contained per-task failure.
///
/// Faults never abort the tick; they identify the offending task and leave
/// every other task unaffected.
#[derive(Debug, Error)]
pub enum Fault {
    /// `sleep_for` was called with a zero delay. The call is a no-op.
    #[error("sleep delay must be greater than zero (task {name} #{id})")]
    InvalidSleepDelay {
        /// Offending task.
        id: TaskId,
        /// Diagnostic label of the offending task.
        name: String,
    },

    /// `restart` was called on a task whose step is a single-use instance.
    /// The task is forced to `Finished` rather than left inconsistent.
    #[error("restart requires a factory-backed step (task {name} #{id})")]
    RestartUnsupported {
        /// Offending task.
        id: TaskId,
        /// Diagnostic label of the offending task.
        name: String,
    },

    /// A task's self-continuation loop exceeded its per-tick step budget.
    /// Driving stops for that task for the remainder of the tick only.
    #[error("step budget of {budget} exhausted within one tick (task {name} #{id})")]
    RunawayExecution {
        /// Offending task.
        id: TaskId,
        /// Diagnostic label of the offending task.
        name: String,
        /// The budget that was exceeded.
        budget: u32,
    },

    /// A step returned an error from a drive. Treated as "did not
    /// complete"; the task keeps its state and may be driven again.
    #[error("step failed (task {name} #{id}): {source}")]
    StepFailed {
        /// Offending task.
        id: TaskId,
        /// Diagnostic label of the offending task.
        name: String,
        /// The error the step raised.
        #[source]
        source: StepError,
    },

    /// A single-use step vanished after a host abort cut a drive short.
    /// Without a factory the task cannot make progress, so it is finished.
    #[error("resumable step lost after an aborted tick (task {name} #{id})")]
    StepLost {
        /// Offending task.
        id: TaskId,
        /// Diagnostic label of the offending task.
        name: String,
    },
}

impl Fault {
    /// Discriminant of this fault, for sinks that classify reports.
    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::InvalidSleepDelay { .. } => FaultKind::InvalidSleepDelay,
            Fault::RestartUnsupported { .. } => FaultKind::RestartUnsupported,
            Fault::RunawayExecution { .. } => FaultKind::RunawayExecution,
            Fault::StepFailed { .. } => FaultKind::StepFailed,
            Fault::StepLost { .. } => FaultKind::StepLost,
        }
    }

    /// The offending task's id.
    pub fn task_id(&self) -> TaskId {
        match self {
            Fault::InvalidSleepDelay { id, .. }
            | Fault::RestartUnsupported { id, .. }
            | Fault::RunawayExecution { id, .. }
            | Fault::StepFailed { id, .. }
            | Fault::StepLost { id, .. } => *id,
        }
    }

    /// The offending task's diagnostic label.
    pub fn task_name(&self) -> &str {
        match self {
            Fault::InvalidSleepDelay { name, .. }
            | Fault::RestartUnsupported { name, .. }
            | Fault::RunawayExecution { name, .. }
            | Fault::StepFailed { name, .. }
            | Fault::StepLost { name, .. } => name,
        }
    }
}

/// Classification of a [`Fault`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Zero sleep delay.
    InvalidSleepDelay,
    /// Restart without a step factory.
    RestartUnsupported,
    /// Per-tick step budget exceeded.
    RunawayExecution,
    /// Step returned an error.
    StepFailed,
    /// Step instance lost to a host abort.
    StepLost,
}

/// Receiver for fault reports.
pub trait DiagnosticSink {
    /// Record one fault. Must not panic.
    fn report(&self, fault: &Fault);
}

/// Default sink: writes each fault to stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn report(&self, fault: &Fault) {
        eprintln!("{fault}");
    }
}

/// Sink that discards every report.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _fault: &Fault) {}
}
