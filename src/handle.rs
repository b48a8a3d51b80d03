//! Handles are references to ongoing work.
//!
//! A `CompletionHandle` is returned synchronously when a job is submitted. It shares
//! the job's completion event with the scheduler loop and owns the job's result once
//! the loop is done. Waiting on a handle keeps the host turning, so the job can make
//! progress while we wait for it.

use std::rc::Rc;

use crate::core::event::{Event, Signal};
use crate::core::host::Host;
use crate::error::Error;

/// How a job was sliced into turns.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of turns the job ran in.
    pub turns: u64,
    /// Number of elements processed.
    pub elements: u64,
    /// Number of times the job yielded to the host.
    pub suspensions: u64,
    /// The largest number of elements processed in a single turn.
    pub max_burst: u64,
}

/// A successfully completed job.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion<T> {
    /// The accumulated result.
    pub value: T,
    /// The callback asked to stop before the input was exhausted.
    pub stopped_early: bool,
    pub stats: Stats,
}

impl<T> Completion<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completion<U> {
        Completion {
            value: f(self.value),
            stopped_early: self.stopped_early,
            stats: self.stats,
        }
    }
}

pub type Outcome<T> = Result<Completion<T>, Error>;

/// A non-clonable handle which owns the result.
pub struct CompletionHandle<T> {
    event: Rc<Event<Outcome<T>>>,
    host: Rc<dyn Host>,
}

impl<T: 'static> CompletionHandle<T> {
    pub(crate) fn new(event: Rc<Event<Outcome<T>>>, host: Rc<dyn Host>) -> Self {
        CompletionHandle { event, host }
    }

    /// A handle that is already resolved with `outcome`.
    pub(crate) fn ready(outcome: Outcome<T>, host: Rc<dyn Host>) -> Self {
        let event = Rc::new(Event::new());
        event.signal(outcome);
        CompletionHandle { event, host }
    }

    /// Returns true if the job has completed.
    pub fn poll(&self) -> bool {
        self.event.is_signaled()
    }

    /// Keep the host turning until the job completes.
    pub fn wait(&self) -> Result<(), Error> {
        wait_for(&*self.event, &*self.host)
    }

    /// Wait for the job and take its result.
    pub fn resolve(self) -> Outcome<T> {
        self.wait()?;
        self.take()
    }

    pub fn resolve_assuming_ready(self) -> Outcome<T> {
        assert!(self.poll(), "Handle is not ready.");
        self.take()
    }

    /// Run `callback` with the result once the job completes.
    ///
    /// The callback runs right away if the job is already done. The returned handle
    /// is signaled after the callback ran.
    pub fn then<F>(self, callback: F) -> Handle
    where
        F: FnOnce(Outcome<T>) + 'static,
    {
        let done: Rc<Event<()>> = Rc::new(Event::new());
        let handle = Handle { event: done.clone(), host: self.host.clone() };

        let event = self.event.clone();
        self.event.on_signal(Box::new(move || {
            if let Some(outcome) = event.take() {
                callback(outcome);
            }
            done.signal(());
        }));

        handle
    }

    /// Run `callback` once the job completes, whether it succeeded or not.
    pub fn finally<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.event.on_signal(Box::new(callback));
    }

    /// A clonable handle that can wait for the job but doesn't see its result.
    pub fn handle(&self) -> Handle {
        Handle {
            event: self.event.clone(),
            host: self.host.clone(),
        }
    }

    fn take(self) -> Outcome<T> {
        // `then` is the only other place that takes the output, and it consumes the handle.
        self.event.take().unwrap_or(Err(Error::Stalled))
    }
}

/// A handle that doesn't know about the output of the job, but can be used to wait.
#[derive(Clone)]
pub struct Handle {
    event: Rc<dyn Signal>,
    host: Rc<dyn Host>,
}

impl Handle {
    pub fn poll(&self) -> bool {
        self.event.is_signaled()
    }

    pub fn wait(&self) -> Result<(), Error> {
        wait_for(&*self.event, &*self.host)
    }
}

fn wait_for(event: &dyn Signal, host: &dyn Host) -> Result<(), Error> {
    if event.is_signaled() {
        return Ok(());
    }

    profiling::scope!("wait");
    if host.block_until(&mut || event.is_signaled()) {
        Ok(())
    } else {
        Err(Error::Stalled)
    }
}

#[cfg(test)]
use crate::core::host::EventLoop;
#[cfg(test)]
use std::cell::Cell;

#[cfg(test)]
fn completion<T>(value: T) -> Outcome<T> {
    Ok(Completion { value, stopped_early: false, stats: Stats::default() })
}

#[test]
fn ready_handle() {
    let host = Rc::new(EventLoop::new());
    let handle = CompletionHandle::ready(completion(5), host.clone());
    assert!(handle.poll());
    assert!(handle.handle().poll());
    assert_eq!(handle.resolve_assuming_ready().unwrap().value, 5);
}

#[test]
fn wait_runs_the_host() {
    let host = Rc::new(EventLoop::new());
    let event: Rc<Event<Outcome<&str>>> = Rc::new(Event::new());
    let handle = CompletionHandle::new(event.clone(), host.clone());

    let e = event.clone();
    host.defer(Box::new(move || e.signal(completion("done"))));

    assert!(!handle.poll());
    let waiter = handle.handle();
    assert!(!waiter.poll());

    assert_eq!(handle.resolve().unwrap().value, "done");
    assert!(waiter.poll());
    assert!(waiter.wait().is_ok());
}

#[test]
fn wait_reports_stalls() {
    let host = Rc::new(EventLoop::new());
    let event: Rc<Event<Outcome<()>>> = Rc::new(Event::new());
    let handle = CompletionHandle::new(event, host);

    assert!(matches!(handle.wait(), Err(Error::Stalled)));
    assert!(matches!(handle.resolve(), Err(Error::Stalled)));
}

#[test]
fn then_and_finally() {
    let host = Rc::new(EventLoop::new());
    let event: Rc<Event<Outcome<u32>>> = Rc::new(Event::new());
    let handle = CompletionHandle::new(event.clone(), host.clone());

    let settled = Rc::new(Cell::new(false));
    let s = settled.clone();
    handle.finally(move || s.set(true));

    let seen = Rc::new(Cell::new(0));
    let s = seen.clone();
    let chained = handle.then(move |outcome| s.set(outcome.map(|c| c.value).unwrap_or(0)));
    assert!(!chained.poll());

    event.signal(completion(9));
    assert!(settled.get());
    assert_eq!(seen.get(), 9);
    assert!(chained.poll());
}

#[test]
fn then_on_failure() {
    let host = Rc::new(EventLoop::new());
    let handle: CompletionHandle<()> = CompletionHandle::ready(Err(Error::Cancelled), host);

    let failed = Rc::new(Cell::new(false));
    let f = failed.clone();
    let chained = handle.then(move |outcome| f.set(matches!(outcome, Err(Error::Cancelled))));
    assert!(failed.get());
    assert!(chained.wait().is_ok());
}
