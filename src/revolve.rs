//! The scheduler loop.
//!
//! A job runs as a chain of host turns. Each turn advances the job's strategy one
//! element at a time until its time budget is spent, then defers the rest of the
//! work to the next turn. The job ends when the strategy runs out of elements, when
//! the callback asks to stop, or when an error is returned.
//!
//! ```text
//!             +-----------+   budget spent    +-----------+
//!  launch --> |  Running  | ----------------> | Suspended |
//!             |           | <---------------- |           |
//!             +-----------+     next turn     +-----------+
//!                   |
//!                   | exhausted / stopped / failed
//!                   v
//!             +-----------+
//!             | Completed |
//!             +-----------+
//! ```
//!
//! Continuous budgets (`Speed::Ninja`) don't suspend when a turn is over budget.
//! They run until the job completes, except that they still yield once per window
//! so that the host gets a chance to process its events.

use std::rc::Rc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::core::clock::Clock;
use crate::core::event::Event;
use crate::core::host::Host;
use crate::core::job::{Budget, JobDescriptor};
use crate::error::Error;
use crate::handle::{Completion, CompletionHandle, Outcome, Stats};
use crate::strategy::{Progress, Strategy};

/// The mutable state of a running job.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IterationState {
    /// True while waiting for the host to run the next turn.
    pub suspended: bool,
    /// When the current turn started.
    pub last_tick_start: Duration,
    /// When the current continuous window started.
    pub window_start: Duration,
    pub stats: Stats,
}

enum Verdict {
    Suspend,
    Done { stopped_early: bool },
    Failed(Error),
}

pub(crate) struct Revolve<S: Strategy> {
    job: JobDescriptor,
    strategy: S,
    state: IterationState,
    event: Rc<Event<Outcome<S::Output>>>,
    host: Rc<dyn Host>,
    clock: Rc<dyn Clock>,
    cancel: Option<CancelToken>,
}

/// Submit a job and return a handle to its result.
///
/// Nothing runs before the host's next turn. Empty inputs complete right away
/// without scheduling anything.
pub(crate) fn launch<S>(
    job: JobDescriptor,
    strategy: S,
    host: Rc<dyn Host>,
    clock: Rc<dyn Clock>,
    cancel: Option<CancelToken>,
) -> CompletionHandle<S::Output>
where
    S: Strategy + 'static,
    S::Output: 'static,
{
    if strategy.is_empty() {
        log::debug!("{}: empty {} input, nothing to schedule", job.id, job.kind);
        let completion = Completion {
            value: strategy.into_output(),
            stopped_early: false,
            stats: Stats::default(),
        };
        return CompletionHandle::ready(Ok(completion), host);
    }

    let event = Rc::new(Event::new());
    let handle = CompletionHandle::new(event.clone(), host.clone());

    let now = clock.now();
    let revolve = Box::new(Revolve {
        job,
        strategy,
        state: IterationState {
            suspended: false,
            last_tick_start: now,
            window_start: now,
            stats: Stats::default(),
        },
        event,
        host: host.clone(),
        clock,
        cancel,
    });

    log::debug!("{}: scheduling {} loop at {} speed ({:?})", job.id, job.kind, job.speed, job.budget);
    host.defer(Box::new(move || revolve.turn()));

    handle
}

impl<S> Revolve<S>
where
    S: Strategy + 'static,
    S::Output: 'static,
{
    fn turn(mut self: Box<Self>) {
        profiling::scope!("revolve turn");

        // The window restarts whenever the job (re)enters the running state, so time
        // spent waiting for the host isn't counted against it.
        let now = self.clock.now();
        if self.state.suspended || self.state.stats.turns == 0 {
            self.state.suspended = false;
            if let Budget::Continuous { .. } = self.job.budget {
                self.state.window_start = now;
            }
        }
        self.state.last_tick_start = now;
        self.state.stats.turns += 1;

        match self.run_slice() {
            Verdict::Suspend => self.suspend(),
            Verdict::Done { stopped_early } => self.complete(stopped_early),
            Verdict::Failed(err) => self.fail(err),
        }
    }

    // Advance the strategy until the budget is spent or the job is over.
    fn run_slice(&mut self) -> Verdict {
        let mut burst = 0;
        let verdict = loop {
            if self.is_cancelled() {
                break Verdict::Failed(Error::Cancelled);
            }

            match self.strategy.advance() {
                Ok(Progress::Advanced) => burst += 1,
                Ok(Progress::Stopped) => {
                    burst += 1;
                    break Verdict::Done { stopped_early: true };
                }
                Ok(Progress::Exhausted) => break Verdict::Done { stopped_early: false },
                Err(err) => break Verdict::Failed(err),
            }

            if self.strategy.is_exhausted() {
                break Verdict::Done { stopped_early: false };
            }

            if self.budget_spent() {
                break Verdict::Suspend;
            }
        };

        let stats = &mut self.state.stats;
        stats.elements += burst;
        stats.max_burst = stats.max_burst.max(burst);

        verdict
    }

    fn budget_spent(&self) -> bool {
        let now = self.clock.now();
        match self.job.budget {
            Budget::Timed(budget) => now.saturating_sub(self.state.last_tick_start) >= budget,
            Budget::Continuous { window } => now.saturating_sub(self.state.window_start) >= window,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancelToken::is_cancelled)
    }

    fn suspend(mut self: Box<Self>) {
        self.state.suspended = true;
        self.state.stats.suspensions += 1;
        log::trace!(
            "{}: suspending after {} elements in turn {}",
            self.job.id, self.state.stats.elements, self.state.stats.turns,
        );

        let host = self.host.clone();
        host.defer(Box::new(move || self.turn()));
    }

    fn complete(self: Box<Self>, stopped_early: bool) {
        let Revolve { job, strategy, state, event, .. } = *self;
        log::debug!(
            "{}: completed{} after {} elements in {} turns",
            job.id,
            if stopped_early { " early" } else { "" },
            state.stats.elements,
            state.stats.turns,
        );

        event.signal(Ok(Completion {
            value: strategy.into_output(),
            stopped_early,
            stats: state.stats,
        }));
    }

    fn fail(self: Box<Self>, err: Error) {
        log::debug!("{}: failed after {} elements: {}", self.job.id, self.state.stats.elements, err);
        self.event.signal(Err(err));
    }
}

#[cfg(test)]
use crate::core::clock::ManualClock;
#[cfg(test)]
use crate::core::host::EventLoop;
#[cfg(test)]
use crate::core::job::JobId;
#[cfg(test)]
use crate::speed::Speed;
#[cfg(test)]
use crate::strategy::{IndexedLoop, Step, StrategyKind, UnboundedLoop};
#[cfg(test)]
use std::cell::RefCell;

#[cfg(test)]
fn job(kind: StrategyKind, speed: Speed) -> JobDescriptor {
    JobDescriptor { id: JobId(0), kind, speed, budget: Budget::for_speed(speed) }
}

#[cfg(test)]
fn slow_items(clock: &Rc<ManualClock>, len: usize) -> IndexedLoop<u32, impl FnMut(crate::strategy::Item<u32>) -> crate::strategy::StepResult> {
    let clock = clock.clone();
    IndexedLoop::new(vec![0; len], move |mut item| {
        clock.advance_ms(1);
        let index = item.index as u32;
        *item = index;
        Ok(Step::CONTINUE)
    })
}

#[test]
fn budget_monotonicity() {
    let mut bursts = Vec::new();
    for speed in Speed::ALL {
        let host = Rc::new(EventLoop::new());
        let clock = Rc::new(ManualClock::new());
        let handle = launch(job(StrategyKind::Indexed, speed), slow_items(&clock, 300), host.clone(), clock.clone(), None);

        let completion = handle.resolve().unwrap();
        assert!(!completion.stopped_early);
        assert_eq!(completion.stats.elements, 300);
        assert_eq!(completion.value, (0..300).collect::<Vec<u32>>());
        bursts.push(completion.stats.max_burst);
    }

    assert_eq!(bursts, vec![1, 6, 12, 36, 60, 100]);
    for pair in bursts.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
}

#[test]
fn suspends_between_turns() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let handle = launch(job(StrategyKind::Indexed, Speed::Slow), slow_items(&clock, 20), host.clone(), clock.clone(), None);

    // Nothing runs until the host turns.
    assert!(!handle.poll());
    assert_eq!(host.pending(), 1);

    for _ in 0..3 {
        assert_eq!(host.run_turn(), 1);
        assert!(!handle.poll());
    }
    assert_eq!(host.run_turn(), 1);
    assert!(handle.poll());
    assert!(host.is_idle());

    let stats = handle.resolve_assuming_ready().unwrap().stats;
    assert_eq!(stats, Stats { turns: 4, elements: 20, suspensions: 3, max_burst: 6 });
}

#[test]
fn ninja_yields_once_per_window() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let handle = launch(job(StrategyKind::Indexed, Speed::Ninja), slow_items(&clock, 250), host.clone(), clock.clone(), None);

    assert_eq!(host.run_turn(), 1);
    assert!(!handle.poll());
    // The host may take a while before the next turn, the window starts over anyway.
    clock.advance_ms(500);
    assert_eq!(host.run_until_idle(), 2);

    let stats = handle.resolve().unwrap().stats;
    assert_eq!(stats, Stats { turns: 3, elements: 250, suspensions: 2, max_burst: 100 });
}

#[test]
fn ninja_window_starts_with_the_first_turn() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let handle = launch(job(StrategyKind::Indexed, Speed::Ninja), slow_items(&clock, 50), host.clone(), clock.clone(), None);

    // The host is late running the first turn.
    clock.advance_ms(150);
    assert_eq!(host.run_turn(), 1);
    assert!(handle.poll());

    let stats = handle.resolve_assuming_ready().unwrap().stats;
    assert_eq!(stats, Stats { turns: 1, elements: 50, suspensions: 0, max_burst: 50 });
}

#[test]
fn ninja_runs_short_jobs_in_one_turn() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let handle = launch(job(StrategyKind::Indexed, Speed::Ninja), slow_items(&clock, 50), host.clone(), clock.clone(), None);

    assert_eq!(host.run_turn(), 1);
    let stats = handle.resolve_assuming_ready().unwrap().stats;
    assert_eq!(stats.turns, 1);
    assert_eq!(stats.suspensions, 0);
}

#[test]
fn stop_ends_the_loop() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let visited = Rc::new(RefCell::new(Vec::new()));

    let v = visited.clone();
    let c = clock.clone();
    let strategy = IndexedLoop::new((0..20).collect::<Vec<u32>>(), move |item| {
        c.advance_ms(1);
        v.borrow_mut().push(*item);
        if *item == 7 { Ok(Step::Stop) } else { Ok(Step::CONTINUE) }
    });

    let completion = launch(job(StrategyKind::Indexed, Speed::Slow), strategy, host.clone(), clock.clone(), None)
        .resolve()
        .unwrap();

    assert!(completion.stopped_early);
    assert_eq!(completion.stats.elements, 8);
    assert_eq!(completion.value.len(), 20);
    assert_eq!(*visited.borrow(), (0..=7).collect::<Vec<u32>>());
    assert!(host.is_idle());
}

#[test]
fn errors_end_the_loop() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let visited = Rc::new(RefCell::new(Vec::new()));

    let v = visited.clone();
    let c = clock.clone();
    let strategy = IndexedLoop::new((0..20).collect::<Vec<u32>>(), move |item| {
        c.advance_ms(1);
        v.borrow_mut().push(*item);
        if *item == 9 { Err("nine".into()) } else { Ok(Step::CONTINUE) }
    });

    let outcome = launch(job(StrategyKind::Indexed, Speed::Slow), strategy, host.clone(), clock.clone(), None).resolve();

    match outcome {
        Err(Error::Callback { key, source }) => {
            assert_eq!(key, "9");
            assert_eq!(source.to_string(), "nine");
        }
        other => panic!("unexpected outcome {:?}", other.map(|c| c.stats)),
    }
    assert_eq!(*visited.borrow(), (0..=9).collect::<Vec<u32>>());
    assert!(host.is_idle());
}

#[test]
fn cancellation() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let token = CancelToken::new();
    let visited = Rc::new(RefCell::new(Vec::new()));

    let v = visited.clone();
    let t = token.clone();
    let strategy = UnboundedLoop::new(move |counter| {
        v.borrow_mut().push(counter);
        if counter == 3 {
            t.cancel();
        }
        Ok(Step::CONTINUE)
    });

    let outcome = launch(job(StrategyKind::Unbounded, Speed::Fast), strategy, host.clone(), clock.clone(), Some(token)).resolve();
    assert!(matches!(outcome, Err(Error::Cancelled)));
    assert_eq!(*visited.borrow(), vec![0, 1, 2, 3]);
}

#[test]
fn cancelled_before_the_first_turn() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let token = CancelToken::new();
    let handle = launch(job(StrategyKind::Indexed, Speed::Normal), slow_items(&clock, 5), host.clone(), clock.clone(), Some(token.clone()));

    token.cancel();
    assert!(matches!(handle.resolve(), Err(Error::Cancelled)));
    assert_eq!(clock.now(), Duration::ZERO);
}

#[test]
fn concurrent_jobs_interleave() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let log = Rc::new(RefCell::new(Vec::new()));

    let mut handles = Vec::new();
    for name in ["a", "b"] {
        let l = log.clone();
        let c = clock.clone();
        let strategy = IndexedLoop::new(vec![0, 1, 2], move |item| {
            c.advance_ms(1);
            l.borrow_mut().push(format!("{}{}", name, item.index));
            Ok(Step::CONTINUE)
        });
        handles.push(launch(job(StrategyKind::Indexed, Speed::Doze), strategy, host.clone(), clock.clone(), None));
    }

    host.run_until_idle();
    assert!(handles.iter().all(|h| h.poll()));
    assert_eq!(*log.borrow(), vec!["a0", "b0", "a1", "b1", "a2", "b2"]);
}

#[test]
fn empty_input_short_circuits() {
    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let handle = launch(job(StrategyKind::Indexed, Speed::Normal), slow_items(&clock, 0), host.clone(), clock.clone(), None);

    assert!(handle.poll());
    assert!(host.is_idle());
    let completion = handle.resolve_assuming_ready().unwrap();
    assert!(completion.value.is_empty());
    assert_eq!(completion.stats, Stats::default());
}
