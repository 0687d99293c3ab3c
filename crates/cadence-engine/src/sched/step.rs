//! Resumable step contract
//!
//! A step is the unit of work a task advances on each drive. It runs until
//! it either completes or voluntarily yields; the scheduler never preempts
//! it. Steps built from a factory can be discarded and recreated, which is
//! what makes their task restartable.

use crate::sched::Task;

/// Result of driving a step once.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// The step yielded and wants to be driven again later.
    Yielded,
    /// The step ran to completion; its task will be finished.
    Complete,
}

/// Opaque error raised by a step during a drive.
///
/// Step code belongs to the host, so its error type is a trait object. A
/// failed drive is reported through the diagnostic sink and treated as a
/// yield; it never unwinds into the scheduler.
pub type StepError = Box<dyn std::error::Error>;

/// A boxed step instance.
pub type BoxedStep = Box<dyn Step>;

/// Constructor for restartable steps. Receives the owning task handle so
/// the fresh step can capture it.
pub type StepFactory = Box<dyn Fn(&Task) -> BoxedStep>;

/// A resumable unit of work driven by the scheduler.
pub trait Step {
    /// Execute until the next voluntary yield point or completion.
    ///
    /// The task handle is the step's own task; the step may call any
    /// lifecycle operation on it, including `restart`.
    fn advance(&mut self, task: &Task) -> Result<StepStatus, StepError>;

    /// Notification that a previous tick was cut short by the host while
    /// this step was mid-drive. Delivered before the step is driven again
    /// so it can treat its next advance as a resume after an abort.
    fn interrupted(&mut self) {}
}

impl<F> Step for F
where
    F: FnMut(&Task) -> Result<StepStatus, StepError>,
{
    fn advance(&mut self, task: &Task) -> Result<StepStatus, StepError> {
        self(task)
    }
}

/// How a task obtains its step: a fixed single-use instance, or a factory
/// that can recreate the step from scratch.
///
/// Only factory-backed tasks support `restart`; restarting a fixed-instance
/// task is a fatal fault that forces the task to `Finished`.
pub enum StepSource {
    /// A single-use step instance.
    Instance(BoxedStep),
    /// A factory invoked lazily on the first drive, and again after every
    /// restart.
    Factory(StepFactory),
}

impl StepSource {
    /// Wrap a step instance.
    pub fn instance(step: impl Step + 'static) -> Self {
        StepSource::Instance(Box::new(step))
    }

    /// Wrap a closure as a single-use step.
    pub fn from_fn(f: impl FnMut(&Task) -> Result<StepStatus, StepError> + 'static) -> Self {
        StepSource::Instance(Box::new(f))
    }

    /// Wrap a step factory, making the task restartable.
    pub fn factory(make: impl Fn(&Task) -> BoxedStep + 'static) -> Self {
        StepSource::Factory(Box::new(make))
    }
}
