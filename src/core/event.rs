use std::cell::{Cell, RefCell};
use std::fmt;

/// A single-threaded completion slot.
///
/// The event is signaled exactly once, with the output of the job it tracks. Code that
/// wants to run when the job is done registers a waiter with `Event::on_signal`.
/// Waiters run in registration order, synchronously from `signal`.
pub struct Event<Output> {
    output: RefCell<Option<Output>>,
    signaled: Cell<bool>,
    waiting: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// The part of an event that doesn't depend on its output type.
pub trait Signal {
    fn is_signaled(&self) -> bool;
}

impl<Output> Event<Output> {
    pub fn new() -> Self {
        Event {
            output: RefCell::new(None),
            signaled: Cell::new(false),
            waiting: RefCell::new(Vec::new()),
        }
    }

    /// Store the output and run the waiters.
    pub fn signal(&self, output: Output) {
        debug_assert!(!self.is_signaled(), "already signaled");

        *self.output.borrow_mut() = Some(output);
        self.signaled.set(true);

        // Waiters may register more waiters, so don't hold the borrow while running them.
        loop {
            let waiting = std::mem::take(&mut *self.waiting.borrow_mut());
            if waiting.is_empty() {
                break;
            }
            for waiter in waiting {
                waiter();
            }
        }
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled.get()
    }

    /// Run `waiter` once the event is signaled, or right away if it already is.
    pub fn on_signal(&self, waiter: Box<dyn FnOnce()>) {
        if self.is_signaled() {
            waiter();
            return;
        }

        self.waiting.borrow_mut().push(waiter);
    }

    /// Move the output out of the event.
    ///
    /// Returns None if the event isn't signaled yet or the output was already taken.
    pub fn take(&self) -> Option<Output> {
        self.output.borrow_mut().take()
    }
}

impl<Output> Default for Event<Output> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Output> Signal for Event<Output> {
    fn is_signaled(&self) -> bool {
        Event::is_signaled(self)
    }
}

impl<Output> fmt::Debug for Event<Output> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Event")
            .field("signaled", &self.is_signaled())
            .field("waiting", &self.waiting.borrow().len())
            .finish()
    }
}

#[cfg(test)]
use std::rc::Rc;

#[test]
fn waiters_run_in_order() {
    let event: Rc<Event<u32>> = Rc::new(Event::new());
    let log = Rc::new(RefCell::new(Vec::new()));

    for i in 0..3 {
        let log = log.clone();
        event.on_signal(Box::new(move || log.borrow_mut().push(i)));
    }
    assert!(log.borrow().is_empty());
    assert!(event.take().is_none());

    event.signal(42);
    assert_eq!(*log.borrow(), vec![0, 1, 2]);

    // Late waiters run immediately.
    let l = log.clone();
    event.on_signal(Box::new(move || l.borrow_mut().push(3)));
    assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);

    assert_eq!(event.take(), Some(42));
    assert_eq!(event.take(), None);
    assert!(event.is_signaled());
}

#[test]
fn waiter_can_read_the_output() {
    let event: Rc<Event<&'static str>> = Rc::new(Event::new());
    let seen = Rc::new(Cell::new(""));

    let e = event.clone();
    let s = seen.clone();
    event.on_signal(Box::new(move || s.set(e.take().unwrap_or("none"))));

    event.signal("done");
    assert_eq!(seen.get(), "done");
}
