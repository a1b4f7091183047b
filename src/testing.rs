//! A fake-clock [`Scheduler`] for driving heartbeat logic deterministically
//! in tests, by advancing a virtual clock instead of sleeping on a real one.
//! Available to this crate's own tests unconditionally, and to
//! embedders' tests behind the `testing` Cargo feature.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::heartbeat::{CancelHandle, Scheduler};

struct Timer {
    interval: Duration,
    elapsed: Duration,
    callback: Box<dyn FnMut()>,
    cancelled: Rc<Cell<bool>>,
}

/// A [`Scheduler`] with no real timers: registrations are stored in a list,
/// and [`ManualScheduler::advance`] walks a fake clock forward, firing every
/// timer whose accumulated elapsed time crosses its interval (possibly more
/// than once per `advance` call, matching what a real periodic timer would
/// do over the same span).
#[derive(Default)]
pub struct ManualScheduler {
    timers: Vec<Timer>,
}

struct ManualCancelHandle {
    cancelled: Rc<Cell<bool>>,
}

impl CancelHandle for ManualCancelHandle {
    fn cancel(&mut self) {
        self.cancelled.set(true);
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        ManualScheduler::default()
    }

    /// Advances the fake clock by `duration`, firing each still-active
    /// timer once for every full `interval` crossed.
    pub fn advance(&mut self, duration: Duration) {
        for timer in &mut self.timers {
            if timer.cancelled.get() {
                continue;
            }
            timer.elapsed += duration;
            while timer.elapsed >= timer.interval && !timer.cancelled.get() {
                timer.elapsed -= timer.interval;
                (timer.callback)();
            }
        }
    }

    /// Number of timers still registered and not cancelled — useful for
    /// asserting both heartbeat timers were cancelled after a failure.
    pub fn active_timer_count(&self) -> usize {
        self.timers.iter().filter(|t| !t.cancelled.get()).count()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_periodic(&mut self, interval: Duration, callback: Box<dyn FnMut()>) -> Box<dyn CancelHandle> {
        let cancelled = Rc::new(Cell::new(false));
        self.timers.push(Timer {
            interval,
            elapsed: Duration::ZERO,
            callback,
            cancelled: cancelled.clone(),
        });
        Box::new(ManualCancelHandle { cancelled })
    }
}
