//! The two primitives the scheduler borrows from its host.
//!
//! A host is whatever owns the event loop: a UI toolkit's main loop, a game loop, or
//! the `EventLoop` below. The scheduler only ever asks it to run a callback on the
//! next turn, or to keep turning until some condition holds.

use std::cell::Cell;

use crossbeam_deque::Worker as WorkerQueue;
use crossbeam_utils::Backoff;

/// A callback queued for a later turn of the host's event loop.
pub type Deferred = Box<dyn FnOnce()>;

pub trait Host {
    /// Run `job` once, after the current synchronous execution unwinds and the host
    /// had a chance to process its pending events.
    fn defer(&self, job: Deferred);

    /// Keep the host turning until `predicate` returns true.
    ///
    /// Returns false if the host gave up because it could not make any more progress.
    fn block_until(&self, predicate: &mut dyn FnMut() -> bool) -> bool;
}

/// A minimal single-threaded event loop.
///
/// Deferred jobs are queued in FIFO order. A turn only runs the jobs that were queued
/// when it started, so a job that defers itself again always waits for the next turn.
pub struct EventLoop {
    queue: WorkerQueue<Deferred>,
    stats: Cell<HostStats>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Number of turns that executed at least one job.
    pub turns: u64,
    /// Number of deferred jobs executed.
    pub jobs_executed: u64,
}

impl EventLoop {
    pub fn new() -> Self {
        EventLoop {
            queue: WorkerQueue::new_fifo(),
            stats: Cell::new(HostStats::default()),
        }
    }

    pub fn stats(&self) -> HostStats { self.stats.get() }

    /// Number of jobs waiting for a turn.
    pub fn pending(&self) -> usize { self.queue.len() }

    pub fn is_idle(&self) -> bool { self.queue.is_empty() }

    /// Run one turn and return the number of jobs executed.
    pub fn run_turn(&self) -> usize {
        profiling::scope!("host turn");

        let queued = self.queue.len();
        let mut executed = 0;
        while executed < queued {
            // A job that blocks on another one may have drained the queue under us.
            let Some(job) = self.queue.pop() else { break };
            job();
            executed += 1;
        }

        if executed > 0 {
            let mut stats = self.stats.get();
            stats.turns += 1;
            stats.jobs_executed += executed as u64;
            self.stats.set(stats);
        }

        executed
    }

    /// Run turns until no job is left and return the number of turns.
    pub fn run_until_idle(&self) -> u64 {
        let mut turns = 0;
        while self.run_turn() > 0 {
            turns += 1;
        }

        turns
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for EventLoop {
    fn defer(&self, job: Deferred) {
        self.queue.push(job);
    }

    fn block_until(&self, predicate: &mut dyn FnMut() -> bool) -> bool {
        profiling::scope!("block_until");

        let backoff = Backoff::new();
        loop {
            if predicate() {
                return true;
            }

            if self.run_turn() > 0 {
                backoff.reset();
                continue;
            }

            // Nothing left to run. Only something outside of this loop can still
            // satisfy the predicate, give it a little while before giving up.
            if backoff.is_completed() {
                log::debug!("block_until: event loop is idle and the condition still doesn't hold");
                return false;
            }

            backoff.snooze();
        }
    }
}

#[cfg(test)]
use std::rc::Rc;
#[cfg(test)]
use std::cell::RefCell;

#[test]
fn turns_run_in_fifo_order() {
    let host = Rc::new(EventLoop::new());
    let log = Rc::new(RefCell::new(Vec::new()));

    for i in 0..3 {
        let log = log.clone();
        host.defer(Box::new(move || log.borrow_mut().push(i)));
    }

    assert_eq!(host.pending(), 3);
    assert_eq!(host.run_turn(), 3);
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
    assert!(host.is_idle());
    assert_eq!(host.stats(), HostStats { turns: 1, jobs_executed: 3 });
}

#[test]
fn jobs_deferred_during_a_turn_wait_for_the_next_one() {
    let host = Rc::new(EventLoop::new());
    let log = Rc::new(RefCell::new(Vec::new()));

    let h = host.clone();
    let l = log.clone();
    host.defer(Box::new(move || {
        l.borrow_mut().push("first");
        let l = l.clone();
        h.defer(Box::new(move || l.borrow_mut().push("second")));
    }));

    assert_eq!(host.run_turn(), 1);
    assert_eq!(*log.borrow(), vec!["first"]);
    assert_eq!(host.run_turn(), 1);
    assert_eq!(*log.borrow(), vec!["first", "second"]);
    assert_eq!(host.run_turn(), 0);
}

#[test]
fn block_until_runs_turns() {
    let host = Rc::new(EventLoop::new());
    let counter = Rc::new(Cell::new(0));

    fn tick(host: Rc<EventLoop>, counter: Rc<Cell<u32>>) {
        counter.set(counter.get() + 1);
        if counter.get() < 5 {
            let h = host.clone();
            host.defer(Box::new(move || tick(h, counter)));
        }
    }

    let h = host.clone();
    let c = counter.clone();
    host.defer(Box::new(move || tick(h, c)));

    assert!(host.block_until(&mut || counter.get() == 5));
    assert_eq!(host.run_until_idle(), 0);
}

#[test]
fn block_until_gives_up_when_idle() {
    let host = EventLoop::new();
    assert!(!host.block_until(&mut || false));
}
