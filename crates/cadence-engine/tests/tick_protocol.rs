//! End-to-end tick protocol tests, including recovery from a host abort
//! that cuts a tick short mid-pass.

use cadence_engine::{
    DiagnosticSink, Fault, FaultKind, Scheduler, SchedulerConfig, Step, StepError, StepSource,
    StepStatus, Task,
};
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

#[derive(Default)]
struct CollectingSink {
    kinds: RefCell<Vec<FaultKind>>,
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, fault: &Fault) {
        self.kinds.borrow_mut().push(fault.kind());
    }
}

fn scheduler_with_sink() -> (Scheduler, Rc<CollectingSink>) {
    let sink = Rc::new(CollectingSink::default());
    let sched = Scheduler::with_config_and_sink(SchedulerConfig::default(), sink.clone());
    (sched, sink)
}

/// Observable per-task counters, shared between the test body and every
/// step instance the factory builds.
#[derive(Default)]
struct Probe {
    drives: Cell<u64>,
    interruptions: Cell<u64>,
    /// Panic on the n-th drive, simulating the host killing the window
    /// mid-execution. One-shot.
    panic_on_drive: Cell<Option<u64>>,
}

struct ProbeStep {
    probe: Rc<Probe>,
}

impl Step for ProbeStep {
    fn advance(&mut self, _task: &Task) -> Result<StepStatus, StepError> {
        let n = self.probe.drives.get() + 1;
        self.probe.drives.set(n);
        if self.probe.panic_on_drive.get() == Some(n) {
            self.probe.panic_on_drive.set(None);
            panic!("execution budget exceeded");
        }
        Ok(StepStatus::Yielded)
    }

    fn interrupted(&mut self) {
        self.probe.interruptions.set(self.probe.interruptions.get() + 1);
    }
}

fn spawn_probe(sched: &Scheduler, label: String) -> (Task, Rc<Probe>) {
    let probe = Rc::new(Probe::default());
    let probe_for_factory = probe.clone();
    let task = sched.spawn_named(
        label,
        StepSource::factory(move |_task| {
            Box::new(ProbeStep {
                probe: probe_for_factory.clone(),
            })
        }),
    );
    (task, probe)
}

#[test]
fn aborted_tick_resumes_at_next_unvisited_entry() {
    let (sched, _sink) = scheduler_with_sink();

    let mut tasks = Vec::new();
    let mut probes = Vec::new();
    for i in 0..10 {
        let (task, probe) = spawn_probe(&sched, format!("probe-{i}"));
        task.start();
        tasks.push(task);
        probes.push(probe);
    }
    // The host cuts the window while entry 3 is mid-drive.
    probes[3].panic_on_drive.set(Some(1));

    let aborted = catch_unwind(AssertUnwindSafe(|| sched.tick(1)));
    assert!(aborted.is_err());

    // Entries 0..=3 were reached; 4..=9 were not.
    for probe in &probes[..4] {
        assert_eq!(probe.drives.get(), 1);
    }
    for probe in &probes[4..] {
        assert_eq!(probe.drives.get(), 0);
    }

    // The next invocation notifies the cut-short task, then continues with
    // the entries the aborted pass never visited. Entries 0..=2 re-enqueued
    // themselves before the abort, so they also run: they are next-tick
    // work that this resumed window has inherited.
    sched.tick(2);
    assert_eq!(probes[3].interruptions.get(), 1);
    assert_eq!(probes[3].drives.get(), 1, "not re-driven in the resumed pass");
    for probe in &probes[4..] {
        assert_eq!(probe.drives.get(), 1);
        assert_eq!(probe.interruptions.get(), 0);
    }
    for probe in &probes[..3] {
        assert_eq!(probe.drives.get(), 2);
        assert_eq!(probe.interruptions.get(), 0);
    }

    // The notified task rejoins the rotation on the following tick.
    sched.tick(3);
    assert_eq!(probes[3].drives.get(), 2);
    for task in &tasks {
        assert!(task.is_running());
    }
}

#[test]
fn fixed_step_lost_to_abort_is_reported_and_finished() {
    let (sched, sink) = scheduler_with_sink();

    let (steady, steady_probe) = spawn_probe(&sched, "steady".to_string());
    steady.start();

    // Single-use step, no factory to rebuild it from.
    let drives = Rc::new(Cell::new(0u64));
    let drives_in = drives.clone();
    let fragile = sched.spawn_named(
        "fragile",
        StepSource::from_fn(move |_task| {
            drives_in.set(drives_in.get() + 1);
            panic!("execution budget exceeded");
        }),
    );
    fragile.start();

    let aborted = catch_unwind(AssertUnwindSafe(|| sched.tick(1)));
    assert!(aborted.is_err());
    assert_eq!(drives.get(), 1);

    // No step to notify; the task is carried forward anyway.
    sched.tick(2);
    assert!(fragile.is_running());

    // Its next drive finds no step instance and no way to rebuild one.
    sched.tick(3);
    assert!(fragile.is_finished());
    assert!(sink.kinds.borrow().contains(&FaultKind::StepLost));

    assert!(steady.is_running());
    assert_eq!(steady_probe.drives.get(), 3);
}

#[test]
fn sleep_driven_worker_completes_over_many_ticks() {
    let (sched, sink) = scheduler_with_sink();

    let units = Rc::new(Cell::new(0u32));
    let units_in = units.clone();
    let worker = sched.spawn_named(
        "worker",
        StepSource::from_fn(move |task| {
            units_in.set(units_in.get() + 1);
            if units_in.get() < 3 {
                task.sleep_for(2);
                Ok(StepStatus::Yielded)
            } else {
                Ok(StepStatus::Complete)
            }
        }),
    );
    worker.start();

    for now in 10..=14 {
        sched.tick(now);
    }

    // Units at ticks 10, 12, 14.
    assert_eq!(units.get(), 3);
    assert!(worker.is_finished());
    assert_eq!(sched.task_count(), 0);
    assert!(sink.kinds.borrow().is_empty());

    let stats = sched.stats();
    assert_eq!(stats.tasks_spawned, 1);
    assert_eq!(stats.tasks_finished, 1);
    assert_eq!(stats.steps_driven, 3);
}

#[test]
fn host_restart_revives_finished_task_after_delay() {
    let (sched, _sink) = scheduler_with_sink();

    let (task, probe) = spawn_probe(&sched, "phoenix".to_string());
    task.start();
    sched.tick(1);
    assert_eq!(probe.drives.get(), 1);

    task.finish();
    sched.tick(2);
    assert_eq!(probe.drives.get(), 1);
    assert_eq!(sched.task_count(), 0);

    task.restart_after(5);
    assert!(task.is_suspended());
    assert_eq!(sched.next_resume_at(), Some(7));

    for now in 3..7 {
        sched.tick(now);
        assert_eq!(probe.drives.get(), 1);
    }
    sched.tick(7);
    assert_eq!(probe.drives.get(), 2);
    assert!(task.is_running());
}

#[test]
fn force_finish_from_suspended_orphans_pending_resume() {
    let (sched, _sink) = scheduler_with_sink();

    let units = Rc::new(Cell::new(0u32));
    let units_in = units.clone();
    let task = sched.spawn(StepSource::from_fn(move |task| {
        units_in.set(units_in.get() + 1);
        task.sleep_for(3);
        Ok(StepStatus::Yielded)
    }));
    task.start();

    sched.tick(1);
    assert!(task.is_suspended());
    assert_eq!(sched.next_resume_at(), Some(4));

    // A suspended task can be force-finished; the queued resume becomes a
    // ghost and never fires.
    task.finish();
    sched.tick(4);
    assert_eq!(units.get(), 1);
    assert!(task.is_finished());
    assert_eq!(sched.suspended_len(), 0);
}
