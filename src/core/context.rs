use std::cell::Cell;
use std::rc::Rc;

use crate::config::Options;
use crate::error::Error;
use crate::helpers::*;
use crate::speed::Speed;
use crate::strategy::{Keyed, Span};

use super::clock::{Clock, SystemClock};
use super::host::Host;
use super::job::{Budget, JobId};

/// The main entry point for submitting work.
///
/// A context ties jobs to the host that runs them and to the clock that measures
/// their budgets. It is cheap to clone, clones share the same host.
#[derive(Clone)]
pub struct Context {
    host: Rc<dyn Host>,
    clock: Rc<dyn Clock>,
    strict: bool,
    next_job_id: Rc<Cell<u64>>,
}

impl Context {
    pub fn new(host: Rc<dyn Host>) -> Self {
        Context::builder(host).build()
    }

    pub fn builder(host: Rc<dyn Host>) -> ContextBuilder {
        ContextBuilder {
            host,
            clock: None,
            strict: false,
        }
    }

    pub fn host(&self) -> &Rc<dyn Host> { &self.host }

    pub fn clock(&self) -> &Rc<dyn Clock> { &self.clock }

    /// Whether configuration anomalies are rejected rather than replaced with defaults.
    pub fn is_strict(&self) -> bool { self.strict }

    #[inline]
    pub fn with_speed(&self, speed: Speed) -> Parameters {
        Parameters::new(self, speed)
    }

    #[inline]
    pub fn doze(&self) -> Parameters { self.with_speed(Speed::Doze) }

    #[inline]
    pub fn slow(&self) -> Parameters { self.with_speed(Speed::Slow) }

    #[inline]
    pub fn normal(&self) -> Parameters { self.with_speed(Speed::Normal) }

    #[inline]
    pub fn fast(&self) -> Parameters { self.with_speed(Speed::Fast) }

    #[inline]
    pub fn rapid(&self) -> Parameters { self.with_speed(Speed::Rapid) }

    #[inline]
    pub fn ninja(&self) -> Parameters { self.with_speed(Speed::Ninja) }

    /// Parameters from loosely typed options.
    ///
    /// Only fails in strict mode, either the context's or the options'.
    pub fn with_options(&self, options: &Options) -> Result<Parameters, Error> {
        let strict = self.strict || options.strict;
        let resolved = options.resolve_with(strict)?;

        let mut params = Parameters::new(self, resolved.speed);
        params.strict = strict;
        params.kind = resolved.kind;
        if let Budget::Timed(interval) = resolved.budget {
            params = params.with_interval(interval);
        }

        Ok(params)
    }

    /// Shorthand for `ctx.normal().for_each(items)`.
    #[inline]
    pub fn for_each<T>(&self, items: Vec<T>) -> ForEachBuilder<T> {
        self.normal().for_each(items)
    }

    /// Shorthand for `ctx.normal().for_each_keyed(map)`.
    #[inline]
    pub fn for_each_keyed<M: Keyed>(&self, map: M) -> KeyedBuilder<M> {
        self.normal().for_each_keyed(map)
    }

    /// Shorthand for `ctx.normal().repeat(span)`.
    #[inline]
    pub fn repeat(&self, span: impl Into<Span>) -> RepeatBuilder {
        self.normal().repeat(span)
    }

    /// Shorthand for `ctx.normal().forever()`.
    #[inline]
    pub fn forever(&self) -> ForeverBuilder {
        self.normal().forever()
    }

    pub(crate) fn next_job_id(&self) -> JobId {
        let id = self.next_job_id.get();
        self.next_job_id.set(id + 1);
        JobId(id)
    }
}

pub struct ContextBuilder {
    host: Rc<dyn Host>,
    clock: Option<Rc<dyn Clock>>,
    strict: bool,
}

impl ContextBuilder {
    /// Measure budgets with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Reject malformed options instead of falling back to defaults.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> Context {
        Context {
            host: self.host,
            clock: self.clock.unwrap_or_else(|| Rc::new(SystemClock::new()) as Rc<dyn Clock>),
            strict: self.strict,
            next_job_id: Rc::new(Cell::new(0)),
        }
    }
}

#[cfg(test)]
use crate::core::clock::ManualClock;
#[cfg(test)]
use crate::core::host::EventLoop;
#[cfg(test)]
use crate::strategy::{CountedLoop, Step, StepResult, StopIteration, StrategyKind};
#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
fn test_context() -> (Rc<EventLoop>, Rc<ManualClock>, Context) {
    let _ = env_logger::builder().is_test(true).try_init();

    let host = Rc::new(EventLoop::new());
    let clock = Rc::new(ManualClock::new());
    let ctx = Context::builder(host.clone()).with_clock(clock.clone()).build();

    (host, clock, ctx)
}

#[test]
fn for_each_visits_everything_in_order() {
    let (host, _, ctx) = test_context();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let s = seen.clone();
    let handle = ctx.for_each(vec!["a", "b", "c"]).run(move |item| {
        s.borrow_mut().push((item.index, *item, item.collection().len()));
        Ok(Step::CONTINUE)
    });
    assert!(!handle.poll());

    host.run_until_idle();
    let completion = handle.resolve_assuming_ready().unwrap();
    assert_eq!(completion.value, vec!["a", "b", "c"]);
    assert!(!completion.stopped_early);
    assert_eq!(*seen.borrow(), vec![(0, "a", 3), (1, "b", 3), (2, "c", 3)]);
}

#[test]
fn for_each_processes_in_place() {
    let (_, _, ctx) = test_context();
    let doubled = ctx
        .fast()
        .for_each((1..=5).collect::<Vec<u32>>())
        .run(|mut item| {
            *item *= 2;
            Ok(Step::CONTINUE)
        })
        .resolve()
        .unwrap()
        .value;

    assert_eq!(doubled, vec![2, 4, 6, 8, 10]);
}

#[test]
fn keyed_entry_points() {
    let (_, _, ctx) = test_context();

    let map: BTreeMap<String, u32> = [("x", 1), ("y", 2)].iter().map(|(k, v)| (k.to_string(), *v)).collect();
    let map = ctx
        .for_each_keyed(map)
        .run(|mut entry| {
            let len = entry.key.len() as u32;
            *entry += len;
            Ok(Step::CONTINUE)
        })
        .resolve()
        .unwrap()
        .value;
    assert_eq!(map["x"], 2);
    assert_eq!(map["y"], 3);

    let map: HashMap<u32, u32> = (0..100).map(|i| (i, 0)).collect();
    let visits = Rc::new(Cell::new(0));
    let v = visits.clone();
    let completion = ctx
        .slow()
        .for_each_keyed(map)
        .run(move |mut entry| {
            v.set(v.get() + 1);
            *entry.value = *entry.key;
            Ok(Step::CONTINUE)
        })
        .resolve()
        .unwrap();
    assert_eq!(visits.get(), 100);
    assert!(completion.value.iter().all(|(k, v)| k == v));
}

#[test]
fn counted_loop_boundary() {
    let (_, _, ctx) = test_context();
    let rounds = Rc::new(RefCell::new(Vec::new()));

    let r = rounds.clone();
    let completion = ctx
        .repeat(Span::new(0, 5, 1))
        .run(move |round| {
            r.borrow_mut().push((round.index, round.is_last));
            Ok(Step::Continue(round.prev.copied().unwrap_or(0i64) + round.index))
        })
        .resolve()
        .unwrap();

    assert_eq!(*rounds.borrow(), vec![(0, false), (1, false), (2, false), (3, false), (4, true)]);
    assert_eq!(completion.value, vec![0, 1, 3, 6, 10]);
}

#[test]
fn counted_bare_number() {
    let (_, _, ctx) = test_context();
    let indices = ctx
        .rapid()
        .repeat(3u32)
        .run(|round| Ok(Step::Continue(round.index)))
        .resolve()
        .unwrap()
        .value;

    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn unbounded_loop_stops_on_request() {
    let (_, _, ctx) = test_context();
    let completion = ctx
        .forever()
        .run(|counter| -> StepResult<u64> {
            if counter == 9 {
                return Err(StopIteration.into());
            }
            Ok(Step::Continue(counter))
        })
        .resolve()
        .unwrap();

    assert!(completion.stopped_early);
    assert_eq!(completion.stats.elements, 10);
    assert_eq!(completion.value, (0..9).collect::<Vec<u64>>());
}

#[test]
fn empty_input() {
    let (host, _, ctx) = test_context();
    let calls = Rc::new(Cell::new(0));

    let c = calls.clone();
    let handle = ctx.for_each(Vec::<u32>::new()).run(move |_| {
        c.set(c.get() + 1);
        Ok(Step::CONTINUE)
    });

    assert!(handle.poll());
    assert!(host.is_idle());
    let completion = handle.resolve().unwrap();
    assert!(completion.value.is_empty());
    assert!(!completion.stopped_early);
    assert_eq!(calls.get(), 0);

    let empty = ctx.repeat(0u32).run(|_| Ok(Step::CONTINUE)).resolve().unwrap();
    assert!(empty.value.is_empty());
}

#[test]
fn non_positive_steps_count_by_one() {
    let (_, _, ctx) = test_context();
    for step in [0, -2] {
        let completion = ctx
            .normal()
            .run_strategy(CountedLoop::new(Span::new(0, 3, step), |round| Ok(Step::Continue(round.index))))
            .resolve()
            .unwrap();
        assert_eq!(completion.value, vec![0, 1, 2]);
        assert!(!completion.stopped_early);
    }
}

#[test]
fn forever_with_unit_results() {
    let (_, _, ctx) = test_context();
    let completion = ctx
        .doze()
        .forever()
        .run(|counter| if counter == 10_000 { Ok(Step::Stop) } else { Ok(Step::Continue(())) })
        .resolve()
        .unwrap();

    assert!(completion.stopped_early);
    assert_eq!(completion.value.len(), 10_000);
    assert_eq!(std::mem::size_of_val(completion.value.as_slice()), 0);
    assert_eq!(completion.stats.turns, 10_001);
    assert_eq!(completion.stats.suspensions, 10_000);
}

#[test]
fn profiles_set_budgets() {
    let (_, _, ctx) = test_context();
    for speed in Speed::ALL {
        assert_eq!(ctx.with_speed(speed).speed(), speed);
        assert_eq!(ctx.with_speed(speed).budget(), Budget::for_speed(speed));
    }
    assert_eq!(ctx.doze().speed(), Speed::Doze);
    assert_eq!(ctx.ninja().budget(), Budget::Continuous { window: Duration::from_millis(100) });
    assert_eq!(
        ctx.ninja().with_interval(Duration::from_millis(3)).budget(),
        Budget::Timed(Duration::from_millis(3)),
    );
}

#[test]
fn options_entry_point() {
    let (host, clock, ctx) = test_context();

    let params = ctx.with_options(&Options::new().with_speed("slow").with_interval(2.0)).unwrap();
    assert_eq!(params.speed(), Speed::Slow);
    assert_eq!(params.budget(), Budget::Timed(Duration::from_millis(2)));

    let c = clock.clone();
    let handle = params.for_each(vec![0u8; 10]).run(move |_| {
        c.advance_ms(1);
        Ok(Step::CONTINUE)
    });
    host.run_until_idle();
    assert_eq!(handle.resolve_assuming_ready().unwrap().stats.max_burst, 2);

    // Permissive: a mismatched kind is ignored.
    let params = ctx.with_options(&Options::new().with_kind("counted")).unwrap();
    assert!(params.for_each(vec![1]).run(|_| Ok(Step::CONTINUE)).resolve().is_ok());
}

#[test]
fn strict_options() {
    let host = Rc::new(EventLoop::new());
    let ctx = Context::builder(host.clone()).strict(true).build();
    assert!(ctx.is_strict());

    assert!(matches!(
        ctx.with_options(&Options::new().with_speed("warp")),
        Err(Error::Configuration(_)),
    ));

    let params = ctx.with_options(&Options::new().with_kind("counted")).unwrap();
    let handle = params.for_each(vec![1, 2, 3]).run(|_| Ok(Step::CONTINUE));
    assert!(handle.poll());
    assert!(host.is_idle());
    assert!(matches!(handle.resolve(), Err(Error::Configuration(_))));

    let handle = ctx.repeat(Span::new(0, 10, 0)).run(|_| Ok(Step::CONTINUE));
    assert!(matches!(handle.resolve(), Err(Error::Configuration(_))));

    // Permissive contexts repair the step instead.
    let (_, _, lenient) = test_context();
    let rounds = lenient.repeat(Span::new(0, 3, 0)).run(|round| Ok(Step::Continue(round.index)));
    assert_eq!(rounds.resolve().unwrap().value, vec![0, 1, 2]);
}

#[test]
fn callback_errors_fail_the_job() {
    let (_, _, ctx) = test_context();
    let visited = Rc::new(Cell::new(0));

    let v = visited.clone();
    let outcome = ctx.doze().for_each(vec![1, 2, 3, 4]).run(move |item| {
        v.set(v.get() + 1);
        if *item == 2 {
            return Err("no twos".into());
        }
        Ok(Step::CONTINUE)
    }).resolve();

    let err = outcome.unwrap_err();
    assert_eq!(err.callback_error().map(|e| e.to_string()), Some("no twos".to_string()));
    assert_eq!(visited.get(), 2);
}

#[test]
fn cancel_token_entry_point() {
    let (host, _, ctx) = test_context();
    let token = crate::CancelToken::new();

    let handle = ctx.doze().with_cancel_token(token.clone()).forever().run(|_| Ok(Step::CONTINUE));
    for _ in 0..5 {
        host.run_turn();
    }
    assert!(!handle.poll());

    token.cancel();
    host.run_turn();
    assert!(handle.poll());
    assert!(handle.resolve().unwrap_err().is_cancelled());
}

#[test]
fn chaining() {
    let (host, _, ctx) = test_context();
    let total = Rc::new(Cell::new(0));
    let settled = Rc::new(Cell::new(false));

    let first = ctx.for_each(vec![1u32, 2, 3]).run(|_| Ok(Step::CONTINUE));
    let s = settled.clone();
    first.finally(move || s.set(true));

    let inner = ctx.clone();
    let t = total.clone();
    let done = first.then(move |outcome| {
        let items = outcome.map(|c| c.value).unwrap_or_default();
        let t = t.clone();
        // Chain a second job onto the result of the first one.
        inner.for_each(items).run(move |item| {
            t.set(t.get() + *item);
            Ok(Step::CONTINUE)
        });
    });

    assert!(done.wait().is_ok());
    assert!(settled.get());
    host.run_until_idle();
    assert_eq!(total.get(), 6);
}

#[test]
fn job_ids_are_unique() {
    let (_, _, ctx) = test_context();
    let other = ctx.clone();
    assert_eq!(ctx.next_job_id(), JobId(0));
    assert_eq!(other.next_job_id(), JobId(1));
    assert_eq!(ctx.next_job_id(), JobId(2));
}

#[test]
fn system_clock_by_default() {
    let host = Rc::new(EventLoop::new());
    let ctx = Context::new(host);
    let squares = ctx
        .normal()
        .for_each((0..1000u64).collect())
        .run(|mut item| {
            let value = *item;
            *item = value * value;
            Ok(Step::CONTINUE)
        })
        .resolve()
        .unwrap();
    assert_eq!(squares.value[999], 998_001);
    assert_eq!(squares.stats.elements, 1000);
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn visits_each_element_once(items in proptest::collection::vec(any::<u16>(), 1..200), speed in 0usize..6) {
            let (_, clock, ctx) = test_context();
            let seen = Rc::new(RefCell::new(Vec::new()));

            let s = seen.clone();
            let c = clock.clone();
            let completion = ctx.with_speed(Speed::ALL[speed]).for_each(items.clone()).run(move |item| {
                c.advance(Duration::from_micros(700));
                s.borrow_mut().push(*item);
                Ok(Step::CONTINUE)
            }).resolve().unwrap();

            prop_assert_eq!(&*seen.borrow(), &items);
            prop_assert_eq!(&completion.value, &items);
            prop_assert_eq!(completion.stats.elements, items.len() as u64);
        }

        #[test]
        fn keys_are_visited_once(keys in proptest::collection::hash_set(any::<u32>(), 0..100)) {
            let (_, _, ctx) = test_context();
            let map: HashMap<u32, ()> = keys.iter().map(|k| (*k, ())).collect();
            let seen = Rc::new(RefCell::new(Vec::new()));

            let s = seen.clone();
            ctx.for_each_keyed(map).run(move |entry| {
                s.borrow_mut().push(*entry.key);
                Ok(Step::CONTINUE)
            }).resolve().unwrap();

            let mut seen = seen.borrow().clone();
            seen.sort();
            let mut expected: Vec<u32> = keys.into_iter().collect();
            expected.sort();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn nothing_after_stop(len in 1usize..100, stop_at in 0usize..100, throw in any::<bool>()) {
            let stop_at = stop_at % len;
            let (_, clock, ctx) = test_context();
            let seen = Rc::new(RefCell::new(Vec::new()));

            let s = seen.clone();
            let c = clock.clone();
            let completion = ctx.slow().for_each((0..len).collect::<Vec<usize>>()).run(move |item| {
                c.advance_ms(1);
                s.borrow_mut().push(item.index);
                if item.index == stop_at {
                    return if throw { Err(StopIteration.into()) } else { Ok(Step::Stop) };
                }
                Ok(Step::CONTINUE)
            }).resolve().unwrap();

            prop_assert!(completion.stopped_early);
            prop_assert_eq!(&*seen.borrow(), &(0..=stop_at).collect::<Vec<usize>>());
        }

        #[test]
        fn nothing_after_error(len in 1usize..100, fail_at in 0usize..100) {
            let fail_at = fail_at % len;
            let (_, _, ctx) = test_context();
            let seen = Rc::new(Cell::new(0));

            let s = seen.clone();
            let outcome = ctx.doze().for_each(vec![(); len]).run(move |item| {
                s.set(s.get() + 1);
                if item.index == fail_at {
                    return Err(format!("failed at {}", item.index).into());
                }
                Ok(Step::CONTINUE)
            }).resolve();

            let is_callback_error = matches!(outcome, Err(Error::Callback { .. }));
            prop_assert!(is_callback_error);
            prop_assert_eq!(seen.get(), fail_at + 1);
        }

        #[test]
        fn same_inputs_same_results(items in proptest::collection::vec(any::<i32>(), 0..50)) {
            let run = |items: Vec<i32>| {
                let (_, clock, ctx) = test_context();
                let order = Rc::new(RefCell::new(Vec::new()));
                let o = order.clone();
                let value = ctx.slow().for_each(items).run(move |mut item| {
                    clock.advance_ms(2);
                    o.borrow_mut().push(item.index);
                    let tripled = item.wrapping_mul(3);
                    *item = tripled;
                    Ok(Step::CONTINUE)
                }).resolve().unwrap().value;
                let order = order.borrow().clone();
                (order, value)
            };

            prop_assert_eq!(run(items.clone()), run(items));
        }
    }
}

#[test]
fn kinds_match_builders() {
    let (_, _, ctx) = test_context();
    let params = ctx.with_options(&Options::new().with_kind("unbounded").strict(true)).unwrap();
    assert_eq!(params.kind, Some(StrategyKind::Unbounded));
    let handle = params.forever().run(|_| Ok(Step::<()>::Stop));
    assert!(handle.resolve().unwrap().stopped_early);
}
