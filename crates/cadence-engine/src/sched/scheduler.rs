//! Tick-driven scheduler over generation-stamped queues
//!
//! One `tick` call drives every task that is due in the current execution
//! window. The host may cut a tick short at any instruction; the persisted
//! cursor plus the generation stamps on every queue entry let the next
//! `tick` invocation pick up exactly where the aborted one stopped.

use crate::diag::{DiagnosticSink, Fault, StderrSink};
use crate::sched::step::StepSource;
use crate::sched::task::{Task, TaskId, TaskState};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Default per-task limit on drives within a single tick.
pub const DEFAULT_STEP_BUDGET: u32 = 64;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Step budget assigned to newly spawned tasks. Individual tasks can
    /// override it with [`Task::set_step_budget`].
    pub default_step_budget: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_step_budget: DEFAULT_STEP_BUDGET,
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total tasks spawned.
    pub tasks_spawned: u64,

    /// Total tasks finished, including force-finished ones.
    pub tasks_finished: u64,

    /// Total drives delivered to steps across all ticks.
    pub steps_driven: u64,

    /// Total faults reported to the diagnostic sink.
    pub faults_reported: u64,

    /// Registered tasks currently Created or Running.
    pub active_tasks: usize,
}

/// Entry in the active queue: the task plus its generation at enqueue
/// time. A mismatch at consumption marks the entry as a ghost.
struct ActiveEntry {
    task: Task,
    generation: u64,
}

/// Entry in the suspended queue, keyed by absolute resume tick.
struct SleepEntry {
    resume_at: u64,
    task: Task,
    generation: u64,
}

pub(crate) struct SchedulerCore {
    /// Tasks runnable this tick or the next, FIFO.
    active: RefCell<Vec<ActiveEntry>>,

    /// Tasks waiting for a future tick, sorted ascending by `resume_at`,
    /// stable on ties.
    suspended: RefCell<Vec<SleepEntry>>,

    /// Host-provided tick counter, set at the top of every `tick`.
    time: Cell<u64>,

    /// Cached earliest pending resume time; `None` when nothing is
    /// scheduled.
    next_resume: Cell<Option<u64>>,

    /// How far into the active queue the current pass has progressed.
    /// Survives a host abort; non-zero at the top of a tick means the
    /// previous tick was cut short mid-pass.
    cursor: Cell<usize>,

    /// Registry of live tasks by id.
    tasks: RefCell<FxHashMap<TaskId, Task>>,

    sink: Rc<dyn DiagnosticSink>,
    config: SchedulerConfig,

    tasks_spawned: Cell<u64>,
    tasks_finished: Cell<u64>,
    steps_driven: Cell<u64>,
    faults_reported: Cell<u64>,
}

impl SchedulerCore {
    /// Append a live entry for the task, stamped with its current
    /// generation.
    pub(crate) fn enqueue(&self, task: &Task) {
        self.active.borrow_mut().push(ActiveEntry {
            task: task.clone(),
            generation: task.generation(),
        });
    }

    /// Insert a suspended entry keyed by `resume_at`, keeping the queue
    /// sorted and stable. A resume time that is not in the future is
    /// silently dropped.
    pub(crate) fn schedule(&self, resume_at: u64, task: &Task) {
        if self.time.get() >= resume_at {
            return;
        }
        let mut queue = self.suspended.borrow_mut();
        let index = queue
            .iter()
            .position(|entry| entry.resume_at > resume_at)
            .unwrap_or(queue.len());
        queue.insert(
            index,
            SleepEntry {
                resume_at,
                task: task.clone(),
                generation: task.generation(),
            },
        );
        if index == 0 {
            self.next_resume.set(Some(resume_at));
        }
    }

    pub(crate) fn time(&self) -> u64 {
        self.time.get()
    }

    pub(crate) fn report(&self, fault: &Fault) {
        self.faults_reported.set(self.faults_reported.get() + 1);
        self.sink.report(fault);
    }

    pub(crate) fn register(&self, task: &Task) {
        self.tasks.borrow_mut().insert(task.id(), task.clone());
    }

    pub(crate) fn unregister(&self, id: TaskId) {
        self.tasks.borrow_mut().remove(&id);
    }

    pub(crate) fn note_finished(&self) {
        self.tasks_finished.set(self.tasks_finished.get() + 1);
    }

    /// Scan the suspended queue from the front: drop ghosts, resume every
    /// live entry that is due, stop at the first live entry still in the
    /// future and cache its time.
    ///
    /// The scanned prefix is drained only after the scan, so an abort in
    /// the middle self-heals: already-resumed tasks bumped their
    /// generation, and the next scan drops their old entries as ghosts.
    fn resume_due(&self) {
        let now = self.time.get();
        let mut next = None;
        let mut scanned = 0;
        loop {
            let entry = {
                let queue = self.suspended.borrow();
                match queue.get(scanned) {
                    Some(entry) => (entry.resume_at, entry.task.clone(), entry.generation),
                    None => break,
                }
            };
            let (resume_at, task, generation) = entry;
            if task.generation() == generation {
                if resume_at > now {
                    next = Some(resume_at);
                    break;
                }
                task.resume();
            }
            scanned += 1;
        }
        self.suspended.borrow_mut().drain(..scanned);
        self.next_resume.set(next);
    }
}

/// Cooperative tick scheduler.
///
/// Handles are cheap to clone and all refer to the same scheduler.
/// Execution is strictly single-threaded: `tick` drives tasks one at a
/// time, and a task only gives up control by returning from its step or by
/// suspending itself.
#[derive(Clone)]
pub struct Scheduler {
    core: Rc<SchedulerCore>,
}

impl Scheduler {
    /// Create a scheduler with default configuration, reporting faults to
    /// stderr.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with the given configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_config_and_sink(config, Rc::new(StderrSink))
    }

    /// Create a scheduler with the given configuration and diagnostic
    /// sink.
    pub fn with_config_and_sink(config: SchedulerConfig, sink: Rc<dyn DiagnosticSink>) -> Self {
        Scheduler {
            core: Rc::new(SchedulerCore {
                active: RefCell::new(Vec::new()),
                suspended: RefCell::new(Vec::new()),
                time: Cell::new(0),
                next_resume: Cell::new(None),
                cursor: Cell::new(0),
                tasks: RefCell::new(FxHashMap::default()),
                sink,
                config,
                tasks_spawned: Cell::new(0),
                tasks_finished: Cell::new(0),
                steps_driven: Cell::new(0),
                faults_reported: Cell::new(0),
            }),
        }
    }

    /// Create a new task in the `Created` state. It enters the active
    /// queue once [`Task::start`] is called.
    pub fn spawn(&self, source: StepSource) -> Task {
        self.spawn_inner(None, source)
    }

    /// Create a new task with a diagnostic label.
    pub fn spawn_named(&self, name: impl Into<String>, source: StepSource) -> Task {
        self.spawn_inner(Some(name.into()), source)
    }

    fn spawn_inner(&self, name: Option<String>, source: StepSource) -> Task {
        let task = Task::new(
            Rc::downgrade(&self.core),
            name,
            source,
            self.core.config.default_step_budget,
        );
        self.core.register(&task);
        self.core
            .tasks_spawned
            .set(self.core.tasks_spawned.get() + 1);
        task
    }

    /// Run one execution window.
    ///
    /// `now` is the host's tick counter; it must be monotonically
    /// non-decreasing, and a repeated value is legal (a re-invocation
    /// after an abort may observe the same tick). Never returns an error:
    /// every per-task failure is contained and reported through the sink.
    pub fn tick(&self, now: u64) {
        let core = &*self.core;
        core.time.set(now);

        if core.next_resume.get().is_some_and(|at| now >= at) {
            core.resume_due();
        }

        // Entries appended from here on (resumed-by-hand, re-enqueues, new
        // starts from inside a drive) land beyond the snapshot and wait
        // for the next tick.
        let snapshot = core.active.borrow().len();

        let mut start = core.cursor.get();
        if start > 0 && start >= snapshot {
            // The aborted pass had already visited every snapshotted entry
            // and was cut before truncating. Finish the truncation and run
            // a fresh pass over whatever it enqueued.
            core.active.borrow_mut().drain(..start.min(snapshot));
            core.cursor.set(0);
            start = 0;
        }
        let snapshot = core.active.borrow().len();

        if start > 0 {
            // The previous tick was cut short while this entry was being
            // driven. Tell the step, and hand the task its next-tick entry
            // ourselves since its aborted drive never got to re-enqueue.
            let (task, generation) = {
                let active = core.active.borrow();
                (active[start].task.clone(), active[start].generation)
            };
            if task.generation() == generation {
                task.notify_interrupted();
                if task.is_running() && task.generation() == generation {
                    core.enqueue(&task);
                }
            }
            start += 1;
        }

        let mut index = start;
        while index < snapshot {
            core.cursor.set(index);
            let (task, generation) = {
                let active = core.active.borrow();
                (active[index].task.clone(), active[index].generation)
            };
            if task.generation() == generation {
                self.drive_entry(&task, generation);
            }
            index += 1;
            core.cursor.set(index);
        }

        core.active.borrow_mut().drain(..snapshot);
        core.cursor.set(0);
    }

    /// Drive one live active entry: a bounded self-continuation burst,
    /// then a re-enqueue for the next tick if the task is still running
    /// under the same generation.
    fn drive_entry(&self, task: &Task, generation: u64) {
        let core = &*self.core;
        let budget = task.step_budget();
        let mut drives: u32 = 0;
        loop {
            drives += 1;
            if drives > budget {
                // Contained to this tick: the task keeps its state and is
                // reconsidered next tick.
                core.report(&Fault::RunawayExecution {
                    id: task.id(),
                    name: task.name().to_string(),
                    budget,
                });
                break;
            }
            core.steps_driven.set(core.steps_driven.get() + 1);
            let running = task.drive(core);
            if !(running && task.continuation_requested()) {
                break;
            }
        }
        if task.is_running() && task.generation() == generation {
            core.enqueue(task);
        }
    }

    /// The scheduler's current notion of time.
    pub fn time(&self) -> u64 {
        self.core.time.get()
    }

    /// Look up a registered task by id.
    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.core.tasks.borrow().get(&id).cloned()
    }

    /// Drop a task from the registry. Outstanding queue entries for it
    /// keep working; this only removes the id lookup.
    pub fn remove_task(&self, id: TaskId) -> Option<Task> {
        self.core.tasks.borrow_mut().remove(&id)
    }

    /// Number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.core.tasks.borrow().len()
    }

    /// Number of entries in the active queue, ghosts included.
    pub fn active_len(&self) -> usize {
        self.core.active.borrow().len()
    }

    /// Number of entries in the suspended queue, ghosts included.
    pub fn suspended_len(&self) -> usize {
        self.core.suspended.borrow().len()
    }

    /// Cached earliest pending resume time.
    pub fn next_resume_at(&self) -> Option<u64> {
        self.core.next_resume.get()
    }

    /// Get scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        let active_tasks = self
            .core
            .tasks
            .borrow()
            .values()
            .filter(|task| matches!(task.state(), TaskState::Created | TaskState::Running))
            .count();
        SchedulerStats {
            tasks_spawned: self.core.tasks_spawned.get(),
            tasks_finished: self.core.tasks_finished.get(),
            steps_driven: self.core.steps_driven.get(),
            faults_reported: self.core.faults_reported.get(),
            active_tasks,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
