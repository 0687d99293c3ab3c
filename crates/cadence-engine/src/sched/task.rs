//! Task structure and lifecycle state machine
//!
//! A task wraps one resumable step and carries the generation counter that
//! makes lazy cancellation work: every operation that invalidates the
//! task's current execution bumps the generation, turning any queue entry
//! stamped with the old value into a ghost that is dropped on sight.

use crate::diag::Fault;
use crate::sched::scheduler::SchedulerCore;
use crate::sched::step::{BoxedStep, StepFactory, StepSource, StepStatus};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique task id.
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a task id from a raw value.
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Created but never enqueued.
    Created,
    /// In the active queue, or currently being driven.
    Running,
    /// Waiting for a future tick, or parked with no queue entry.
    Suspended,
    /// Terminal. No operation transitions out of this state except
    /// `restart`.
    Finished,
}

pub(crate) struct TaskCore {
    id: TaskId,
    name: String,
    sched: Weak<SchedulerCore>,
    state: Cell<TaskState>,
    generation: Cell<u64>,
    continued: Cell<bool>,
    step_budget: Cell<u32>,
    /// Present only for restartable tasks.
    factory: Option<StepFactory>,
    /// The live step instance. Taken out of the cell for the duration of a
    /// drive so the step can reentrantly call back into its own task.
    step: RefCell<Option<BoxedStep>>,
    /// Set by `restart`; consumed at the next drive, which discards the
    /// old step instance and rebuilds from the factory.
    reset_pending: Cell<bool>,
}

/// Handle to a cooperatively scheduled task.
///
/// Handles are cheap to clone and all refer to the same task. Lifecycle
/// operations called from an incompatible state are deliberate no-ops, so
/// a stale handle can never corrupt the state machine.
#[derive(Clone)]
pub struct Task {
    core: Rc<TaskCore>,
}

impl Task {
    pub(crate) fn new(
        sched: Weak<SchedulerCore>,
        name: Option<String>,
        source: StepSource,
        step_budget: u32,
    ) -> Self {
        let id = TaskId::new();
        let name = name.unwrap_or_else(|| format!("task-{id}"));
        let (factory, step) = match source {
            StepSource::Instance(step) => (None, Some(step)),
            // Factory steps are built lazily on the first drive.
            StepSource::Factory(make) => (Some(make), None),
        };
        Task {
            core: Rc::new(TaskCore {
                id,
                name,
                sched,
                state: Cell::new(TaskState::Created),
                generation: Cell::new(0),
                continued: Cell::new(false),
                step_budget: Cell::new(step_budget),
                factory,
                step: RefCell::new(step),
                reset_pending: Cell::new(false),
            }),
        }
    }

    /// Get the task's unique id.
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Get the task's diagnostic label.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.core.state.get()
    }

    /// Whether the task is currently `Running`.
    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Whether the task is currently `Suspended`.
    pub fn is_suspended(&self) -> bool {
        self.state() == TaskState::Suspended
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Current generation. Queue entries stamped with an older value are
    /// ghosts.
    pub fn generation(&self) -> u64 {
        self.core.generation.get()
    }

    /// Whether the step was built from a factory and the task therefore
    /// supports `restart`.
    pub fn is_restartable(&self) -> bool {
        self.core.factory.is_some()
    }

    /// Maximum drives per tick before further self-continuation is treated
    /// as a runaway-execution fault.
    pub fn step_budget(&self) -> u32 {
        self.core.step_budget.get()
    }

    /// Override the per-tick step budget for this task.
    pub fn set_step_budget(&self, budget: u32) {
        self.core.step_budget.set(budget);
    }

    /// Whether the step asked to be driven again within the current tick.
    /// Reset at the start of every drive.
    pub fn continuation_requested(&self) -> bool {
        self.core.continued.get()
    }

    fn bump_generation(&self) {
        self.core.generation.set(self.core.generation.get() + 1);
    }

    /// Enqueue a freshly created task into the active queue.
    ///
    /// No-op unless the task is `Created`.
    pub fn start(&self) {
        if self.state() != TaskState::Created {
            return;
        }
        let Some(sched) = self.core.sched.upgrade() else {
            return;
        };
        sched.enqueue(self);
        self.core.state.set(TaskState::Running);
    }

    /// Finish the task. Terminal: bumps the generation so every
    /// outstanding queue entry becomes a ghost, and removes the task from
    /// the scheduler registry.
    pub fn finish(&self) {
        if self.state() == TaskState::Finished {
            return;
        }
        self.bump_generation();
        self.core.state.set(TaskState::Finished);
        if let Some(sched) = self.core.sched.upgrade() {
            sched.unregister(self.id());
            sched.note_finished();
        }
    }

    /// Suspend indefinitely with no queue entry. The task runs again only
    /// after an explicit `resume` or `schedule_at`.
    ///
    /// No-op unless the task is `Running`.
    pub fn suspend(&self) {
        if self.state() != TaskState::Running {
            return;
        }
        self.bump_generation();
        self.core.state.set(TaskState::Suspended);
    }

    /// Suspend until the given absolute tick.
    ///
    /// From `Suspended` this reschedules: the generation bumps first so the
    /// previous suspended entry can never fire. From `Running` the
    /// generation is untouched; the live active entry simply stops being
    /// re-enqueued once the drive observes the suspended state. No-op from
    /// `Created` or `Finished`.
    pub fn schedule_at(&self, time: u64) {
        match self.state() {
            TaskState::Created | TaskState::Finished => return,
            TaskState::Suspended => self.bump_generation(),
            TaskState::Running => {}
        }
        let Some(sched) = self.core.sched.upgrade() else {
            return;
        };
        sched.schedule(time, self);
        self.core.state.set(TaskState::Suspended);
    }

    /// Suspend for `delay` ticks from now. A zero delay is a usage fault:
    /// it is reported and the call is a no-op.
    ///
    /// No-op unless the task is `Running`.
    pub fn sleep_for(&self, delay: u64) {
        if self.state() != TaskState::Running {
            return;
        }
        let Some(sched) = self.core.sched.upgrade() else {
            return;
        };
        if delay == 0 {
            sched.report(&Fault::InvalidSleepDelay {
                id: self.id(),
                name: self.core.name.clone(),
            });
            return;
        }
        self.bump_generation();
        sched.schedule(sched.time().saturating_add(delay), self);
        self.core.state.set(TaskState::Suspended);
    }

    /// Move the task back into the active queue.
    ///
    /// From `Suspended` the generation bumps, orphaning any pending
    /// suspended entry. Also legal from `Created`; no-op otherwise.
    pub fn resume(&self) {
        match self.state() {
            TaskState::Suspended => self.bump_generation(),
            TaskState::Created => {}
            _ => return,
        }
        let Some(sched) = self.core.sched.upgrade() else {
            return;
        };
        sched.enqueue(self);
        self.core.state.set(TaskState::Running);
    }

    /// Restart and re-enqueue immediately.
    ///
    /// Discards the current step instance and rebuilds it from the factory
    /// at the next drive; fails fatally (task forced to `Finished`) if the
    /// step is a single-use instance. No-op on a `Created` task. May be
    /// called by the step from within its own drive.
    pub fn restart(&self) {
        self.restart_inner(RestartAt::Now);
    }

    /// Restart and resume after `delay` ticks. A zero delay behaves as
    /// [`Task::restart`].
    pub fn restart_after(&self, delay: u64) {
        if delay == 0 {
            self.restart_inner(RestartAt::Now);
        } else {
            self.restart_inner(RestartAt::After(delay));
        }
    }

    /// Restart into `Suspended` with no queue entry; the task stays parked
    /// until an explicit `resume` or `schedule_at`.
    pub fn restart_parked(&self) {
        self.restart_inner(RestartAt::Parked);
    }

    fn restart_inner(&self, at: RestartAt) {
        if self.state() == TaskState::Created {
            return;
        }
        let Some(sched) = self.core.sched.upgrade() else {
            return;
        };
        self.bump_generation();
        self.core.state.set(TaskState::Created);
        if self.core.factory.is_none() {
            sched.report(&Fault::RestartUnsupported {
                id: self.id(),
                name: self.core.name.clone(),
            });
            self.finish();
            return;
        }
        self.core.reset_pending.set(true);
        // A previously finished task was dropped from the registry.
        sched.register(self);
        match at {
            RestartAt::Now => {
                sched.enqueue(self);
                self.core.state.set(TaskState::Running);
            }
            RestartAt::After(delay) => {
                sched.schedule(sched.time().saturating_add(delay), self);
                self.core.state.set(TaskState::Suspended);
            }
            RestartAt::Parked => {
                self.core.state.set(TaskState::Suspended);
            }
        }
    }

    /// Ask to be driven again within the current tick, subject to the step
    /// budget. Valid only while `Running`; cleared at the start of every
    /// drive.
    pub fn request_continue(&self) {
        if self.state() == TaskState::Running {
            self.core.continued.set(true);
        }
    }

    /// Take the current step instance, building it from the factory when
    /// the slot is empty. Returns `None` for a fixed-instance task whose
    /// step is gone.
    fn acquire_step(&self) -> Option<BoxedStep> {
        if self.core.reset_pending.take() {
            *self.core.step.borrow_mut() = None;
        }
        let taken = self.core.step.borrow_mut().take();
        match taken {
            Some(step) => Some(step),
            None => self.core.factory.as_ref().map(|make| make(self)),
        }
    }

    /// Put a step back after a drive, unless a reentrant `restart`
    /// invalidated it in the meantime.
    fn release_step(&self, step: BoxedStep) {
        if !self.core.reset_pending.get() {
            *self.core.step.borrow_mut() = Some(step);
        }
    }

    /// Drive the step once. Returns whether the task is still `Running`
    /// afterwards.
    pub(crate) fn drive(&self, sched: &SchedulerCore) -> bool {
        self.core.continued.set(false);
        let Some(mut step) = self.acquire_step() else {
            // A fixed instance can only vanish when a host abort cut a
            // previous drive short; without a factory the task cannot
            // resume.
            sched.report(&Fault::StepLost {
                id: self.id(),
                name: self.core.name.clone(),
            });
            self.finish();
            return false;
        };
        let outcome = step.advance(self);
        self.release_step(step);
        match outcome {
            Ok(StepStatus::Complete) => self.finish(),
            Ok(StepStatus::Yielded) => {}
            Err(source) => sched.report(&Fault::StepFailed {
                id: self.id(),
                name: self.core.name.clone(),
                source,
            }),
        }
        self.is_running()
    }

    /// Deliver the resume-after-abort notice to the step.
    pub(crate) fn notify_interrupted(&self) {
        let Some(mut step) = self.acquire_step() else {
            return;
        };
        step.interrupted();
        self.release_step(step);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("state", &self.core.state.get())
            .field("generation", &self.core.generation.get())
            .finish()
    }
}

enum RestartAt {
    Now,
    After(u64),
    Parked,
}
