//! Minimal host loop: a heartbeat task that sleeps between beats and a
//! worker that finishes after a few units of work.

use cadence_engine::{Scheduler, StepSource, StepStatus};
use std::cell::Cell;
use std::rc::Rc;

fn main() {
    let sched = Scheduler::new();

    let heartbeat = sched.spawn_named(
        "heartbeat",
        StepSource::from_fn(|task| {
            println!("[beat] generation {}", task.generation());
            task.sleep_for(5);
            Ok(StepStatus::Yielded)
        }),
    );
    heartbeat.start();

    let units = Rc::new(Cell::new(0u32));
    let units_in = units.clone();
    let worker = sched.spawn_named(
        "worker",
        StepSource::from_fn(move |task| {
            units_in.set(units_in.get() + 1);
            println!("[work] unit {}", units_in.get());
            if units_in.get() < 3 {
                // Spread the work over consecutive ticks.
                task.request_continue();
                Ok(StepStatus::Yielded)
            } else {
                Ok(StepStatus::Complete)
            }
        }),
    );
    worker.set_step_budget(4);
    worker.start();

    // The host drives the tick counter.
    for now in 0..20 {
        sched.tick(now);
    }

    println!("{:#?}", sched.stats());
}
