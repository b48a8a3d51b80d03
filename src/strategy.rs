//! Step procedures.
//!
//! A strategy owns its input and its callback and knows how to advance exactly one
//! element. The scheduler loop calls `advance` repeatedly and checks the clock in
//! between, so the strategies themselves never deal with time.
//!
//! Each strategy is an explicit state machine (index, key cursor or counter) that
//! can be inspected between steps.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::{Deref, DerefMut};

use crate::error::{BoxError, Error};

/// What a callback wants the loop to do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Step<T = ()> {
    /// Keep going. The value is kept by the strategies that accumulate results.
    Continue(T),
    /// End the loop now. This is a successful termination, not an error.
    Stop,
}

impl Step<()> {
    pub const CONTINUE: Step<()> = Step::Continue(());
}

impl<T> Step<T> {
    pub fn is_stop(&self) -> bool {
        matches!(self, Step::Stop)
    }
}

impl<T> From<T> for Step<T> {
    fn from(value: T) -> Self {
        Step::Continue(value)
    }
}

/// The return type of every callback.
pub type StepResult<T = ()> = Result<Step<T>, BoxError>;

/// Returning `Err(StopIteration.into())` from a callback ends the loop the same
/// way `Ok(Step::Stop)` does.
///
/// This lets callbacks bail out with `?` from helpers that signal the end of the
/// work through an error.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StopIteration;

impl fmt::Display for StopIteration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("stop iteration")
    }
}

impl std::error::Error for StopIteration {}

/// Which step procedure a job runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Indexed,
    Keyed,
    Counted,
    Unbounded,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Indexed => "indexed",
            StrategyKind::Keyed => "keyed",
            StrategyKind::Counted => "counted",
            StrategyKind::Unbounded => "unbounded",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        [StrategyKind::Indexed, StrategyKind::Keyed, StrategyKind::Counted, StrategyKind::Unbounded]
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The result of advancing a strategy by one element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// One element was processed.
    Advanced,
    /// The callback asked to stop.
    Stopped,
    /// There was nothing left to process.
    Exhausted,
}

/// A suspendable step procedure.
pub trait Strategy {
    /// What the job produces once the loop completes.
    type Output;

    fn kind(&self) -> StrategyKind;

    /// True if there is nothing to iterate over at all.
    fn is_empty(&self) -> bool;

    /// True once every element has been visited.
    fn is_exhausted(&self) -> bool;

    /// Process exactly one element.
    fn advance(&mut self) -> Result<Progress, Error>;

    fn into_output(self) -> Self::Output;
}

// Interprets a callback's return value. `Some` means keep going.
fn settle<T>(key: &dyn fmt::Debug, result: StepResult<T>) -> Result<Option<T>, Error> {
    match result {
        Ok(Step::Continue(value)) => Ok(Some(value)),
        Ok(Step::Stop) => Ok(None),
        Err(err) if err.is::<StopIteration>() => Ok(None),
        Err(source) => Err(Error::Callback { key: format!("{:?}", key), source }),
    }
}

/// The argument of indexed callbacks.
///
/// Dereferences to the current element.
pub struct Item<'l, T> {
    pub index: usize,
    items: &'l mut [T],
}

impl<'l, T> Item<'l, T> {
    /// The whole sequence being iterated.
    pub fn collection(&self) -> &[T] { self.items }
}

impl<'l, T> Deref for Item<'l, T> {
    type Target = T;
    fn deref(&self) -> &T { &self.items[self.index] }
}

impl<'l, T> DerefMut for Item<'l, T> {
    fn deref_mut(&mut self) -> &mut T { &mut self.items[self.index] }
}

/// Visits every element of a sequence in index order.
pub struct IndexedLoop<T, F> {
    items: Vec<T>,
    cursor: usize,
    callback: F,
}

impl<T, F> IndexedLoop<T, F>
where
    F: FnMut(Item<T>) -> StepResult,
{
    pub fn new(items: Vec<T>, callback: F) -> Self {
        IndexedLoop { items, cursor: 0, callback }
    }

    /// Index of the next element to visit.
    pub fn cursor(&self) -> usize { self.cursor }
}

impl<T, F> Strategy for IndexedLoop<T, F>
where
    F: FnMut(Item<T>) -> StepResult,
{
    type Output = Vec<T>;

    fn kind(&self) -> StrategyKind { StrategyKind::Indexed }

    fn is_empty(&self) -> bool { self.items.is_empty() }

    fn is_exhausted(&self) -> bool { self.cursor >= self.items.len() }

    fn advance(&mut self) -> Result<Progress, Error> {
        if self.is_exhausted() {
            return Ok(Progress::Exhausted);
        }

        let index = self.cursor;
        self.cursor += 1;
        let result = (self.callback)(Item { index, items: &mut self.items });

        Ok(match settle(&index, result)? {
            Some(()) => Progress::Advanced,
            None => Progress::Stopped,
        })
    }

    fn into_output(self) -> Vec<T> { self.items }
}

/// A mapping that `KeyedLoop` can walk.
pub trait Keyed {
    type Key: Clone + fmt::Debug;
    type Value;

    /// The keys present right now, in the order they will be visited.
    fn key_list(&self) -> Vec<Self::Key>;

    fn value_mut(&mut self, key: &Self::Key) -> Option<&mut Self::Value>;
}

impl<K, V> Keyed for BTreeMap<K, V>
where
    K: Ord + Clone + fmt::Debug,
{
    type Key = K;
    type Value = V;

    fn key_list(&self) -> Vec<K> { self.keys().cloned().collect() }

    fn value_mut(&mut self, key: &K) -> Option<&mut V> { self.get_mut(key) }
}

impl<K, V, S> Keyed for HashMap<K, V, S>
where
    K: Hash + Eq + Clone + fmt::Debug,
    S: BuildHasher,
{
    type Key = K;
    type Value = V;

    fn key_list(&self) -> Vec<K> { self.keys().cloned().collect() }

    fn value_mut(&mut self, key: &K) -> Option<&mut V> { self.get_mut(key) }
}

/// The argument of keyed callbacks.
///
/// Dereferences to the value.
pub struct Entry<'l, K, V> {
    pub key: &'l K,
    pub value: &'l mut V,
}

impl<'l, K, V> Deref for Entry<'l, K, V> {
    type Target = V;
    fn deref(&self) -> &V { self.value }
}

impl<'l, K, V> DerefMut for Entry<'l, K, V> {
    fn deref_mut(&mut self) -> &mut V { self.value }
}

/// Visits every key of a mapping once.
///
/// The keys are collected when the loop is created, each of them is visited exactly
/// once in the mapping's own iteration order.
pub struct KeyedLoop<M: Keyed, F> {
    map: M,
    keys: Vec<M::Key>,
    cursor: usize,
    callback: F,
}

impl<M, F> KeyedLoop<M, F>
where
    M: Keyed,
    F: FnMut(Entry<M::Key, M::Value>) -> StepResult,
{
    pub fn new(map: M, callback: F) -> Self {
        let keys = map.key_list();
        KeyedLoop { map, keys, cursor: 0, callback }
    }

    /// The keys that haven't been visited yet.
    pub fn remaining_keys(&self) -> &[M::Key] { &self.keys[self.cursor..] }
}

impl<M, F> Strategy for KeyedLoop<M, F>
where
    M: Keyed,
    F: FnMut(Entry<M::Key, M::Value>) -> StepResult,
{
    type Output = M;

    fn kind(&self) -> StrategyKind { StrategyKind::Keyed }

    fn is_empty(&self) -> bool { self.keys.is_empty() }

    fn is_exhausted(&self) -> bool { self.cursor >= self.keys.len() }

    fn advance(&mut self) -> Result<Progress, Error> {
        if self.is_exhausted() {
            return Ok(Progress::Exhausted);
        }

        let key = &self.keys[self.cursor];
        self.cursor += 1;

        let Some(value) = self.map.value_mut(key) else {
            // Callbacks can't remove entries, but a custom `Keyed` may not list
            // exactly what it can look up.
            return Ok(Progress::Advanced);
        };

        let result = (self.callback)(Entry { key, value });

        Ok(match settle(key, result)? {
            Some(()) => Progress::Advanced,
            None => Progress::Stopped,
        })
    }

    fn into_output(self) -> M { self.map }
}

/// The bounds of a counted loop: `begin`, `begin + step`, ... while below `end`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    pub begin: i64,
    pub end: i64,
    pub step: i64,
}

impl Span {
    pub fn new(begin: i64, end: i64, step: i64) -> Self {
        Span { begin, end, step }
    }

    /// Visits `0..=count - 1`.
    pub fn count(count: u32) -> Self {
        Span { begin: 0, end: count as i64, step: 1 }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Whether `index` is the last value of the span.
    #[inline]
    pub fn is_last(&self, index: i64) -> bool {
        index >= self.end.saturating_sub(self.step)
    }
}

impl From<u32> for Span {
    fn from(count: u32) -> Self {
        Span::count(count)
    }
}

impl From<std::ops::Range<i64>> for Span {
    fn from(range: std::ops::Range<i64>) -> Self {
        Span::new(range.start, range.end, 1)
    }
}

fn repair_span(span: Span) -> Span {
    if span.step > 0 {
        return span;
    }

    log::warn!("loop step must be positive, got {}, counting with a step of 1", span.step);
    Span { step: 1, ..span }
}

/// The argument of counted callbacks.
pub struct Round<'l, R> {
    pub index: i64,
    pub is_last: bool,
    pub span: Span,
    /// The value returned by the previous round.
    pub prev: Option<&'l R>,
}

/// Counts through a `Span`, collecting what the callback returns.
pub struct CountedLoop<R, F> {
    span: Span,
    next: Option<i64>,
    results: Vec<R>,
    callback: F,
}

impl<R, F> CountedLoop<R, F>
where
    F: FnMut(Round<R>) -> StepResult<R>,
{
    /// A span with a step below one is counted with a step of one.
    pub fn new(span: Span, callback: F) -> Self {
        let span = repair_span(span);
        let next = if span.is_empty() { None } else { Some(span.begin) };
        CountedLoop { span, next, results: Vec::new(), callback }
    }

    /// The value the next round will see.
    pub fn next_index(&self) -> Option<i64> { self.next }
}

impl<R, F> Strategy for CountedLoop<R, F>
where
    F: FnMut(Round<R>) -> StepResult<R>,
{
    type Output = Vec<R>;

    fn kind(&self) -> StrategyKind { StrategyKind::Counted }

    fn is_empty(&self) -> bool { self.span.is_empty() }

    fn is_exhausted(&self) -> bool { self.next.is_none() }

    fn advance(&mut self) -> Result<Progress, Error> {
        let Some(index) = self.next else {
            return Ok(Progress::Exhausted);
        };

        self.next = index
            .checked_add(self.span.step)
            .filter(|next| *next < self.span.end);

        let result = (self.callback)(Round {
            index,
            is_last: self.span.is_last(index),
            span: self.span,
            prev: self.results.last(),
        });

        match settle(&index, result)? {
            Some(value) => {
                self.results.push(value);
                Ok(Progress::Advanced)
            }
            None => Ok(Progress::Stopped),
        }
    }

    fn into_output(self) -> Vec<R> { self.results }
}

/// Calls the callback with an ever increasing counter until it asks to stop.
///
/// The counter wraps around to zero instead of overflowing. Every value the callback
/// continues with is kept until the job completes, so long running loops should
/// continue with `()` or another zero-sized value unless they need the history.
pub struct UnboundedLoop<R, F> {
    counter: u64,
    results: Vec<R>,
    callback: F,
}

impl<R, F> UnboundedLoop<R, F>
where
    F: FnMut(u64) -> StepResult<R>,
{
    pub fn new(callback: F) -> Self {
        UnboundedLoop { counter: 0, results: Vec::new(), callback }
    }

    /// Start counting from `counter` instead of zero.
    pub fn starting_at(mut self, counter: u64) -> Self {
        self.counter = counter;
        self
    }

    pub fn counter(&self) -> u64 { self.counter }
}

impl<R, F> Strategy for UnboundedLoop<R, F>
where
    F: FnMut(u64) -> StepResult<R>,
{
    type Output = Vec<R>;

    fn kind(&self) -> StrategyKind { StrategyKind::Unbounded }

    fn is_empty(&self) -> bool { false }

    fn is_exhausted(&self) -> bool { false }

    fn advance(&mut self) -> Result<Progress, Error> {
        let counter = self.counter;
        let result = (self.callback)(counter);

        match settle(&counter, result)? {
            Some(value) => {
                self.results.push(value);
                self.counter = counter.checked_add(1).unwrap_or(0);
                Ok(Progress::Advanced)
            }
            None => Ok(Progress::Stopped),
        }
    }

    fn into_output(self) -> Vec<R> { self.results }
}

#[cfg(test)]
fn run_to_end<S: Strategy>(mut strategy: S) -> (Result<Progress, Error>, S) {
    loop {
        match strategy.advance() {
            Ok(Progress::Advanced) if !strategy.is_exhausted() => {}
            other => return (other, strategy),
        }
    }
}

#[test]
fn indexed_visits_in_order() {
    let mut seen = Vec::new();
    let strategy = IndexedLoop::new(vec![10, 20, 30], |mut item| {
        seen.push((item.index, *item, item.collection().len()));
        *item += 1;
        Ok(Step::CONTINUE)
    });
    assert_eq!(strategy.cursor(), 0);

    let (last, strategy) = run_to_end(strategy);
    assert_eq!(last.unwrap(), Progress::Advanced);
    assert!(strategy.is_exhausted());
    assert_eq!(strategy.into_output(), vec![11, 21, 31]);
    assert_eq!(seen, vec![(0, 10, 3), (1, 20, 3), (2, 30, 3)]);
}

#[test]
fn indexed_stop_and_error() {
    let mut visits = 0;
    let mut strategy = IndexedLoop::new(vec![1, 2, 3, 4], |item| {
        visits += 1;
        if *item == 2 { Ok(Step::Stop) } else { Ok(Step::CONTINUE) }
    });
    assert_eq!(strategy.advance().unwrap(), Progress::Advanced);
    assert_eq!(strategy.advance().unwrap(), Progress::Stopped);
    drop(strategy);
    assert_eq!(visits, 2);

    let mut strategy = IndexedLoop::new(vec![1, 2, 3], |item| {
        if *item == 2 { Err(StopIteration.into()) } else { Ok(Step::CONTINUE) }
    });
    assert_eq!(strategy.advance().unwrap(), Progress::Advanced);
    assert_eq!(strategy.advance().unwrap(), Progress::Stopped);

    let mut strategy = IndexedLoop::new(vec![1, 2, 3], |item| {
        if *item == 2 { Err("two".into()) } else { Ok(Step::CONTINUE) }
    });
    assert_eq!(strategy.advance().unwrap(), Progress::Advanced);
    match strategy.advance() {
        Err(Error::Callback { key, source }) => {
            assert_eq!(key, "1");
            assert_eq!(source.to_string(), "two");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn keyed_visits_every_key_once() {
    let mut map = BTreeMap::new();
    map.insert("a", 1);
    map.insert("b", 2);
    map.insert("c", 3);

    let mut keys = Vec::new();
    let strategy = KeyedLoop::new(map, |mut entry| {
        keys.push(*entry.key);
        *entry *= 10;
        Ok(Step::CONTINUE)
    });
    assert_eq!(strategy.remaining_keys(), &["a", "b", "c"]);

    let (_, strategy) = run_to_end(strategy);
    let map = strategy.into_output();
    assert_eq!(keys, vec!["a", "b", "c"]);
    assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![10, 20, 30]);
}

#[test]
fn keyed_over_hash_map() {
    let map: HashMap<u32, String> = (0..50).map(|i| (i, i.to_string())).collect();
    let mut keys = Vec::new();
    let (_, strategy) = run_to_end(KeyedLoop::new(map, |entry| {
        assert_eq!(*entry.value, entry.key.to_string());
        keys.push(*entry.key);
        Ok(Step::CONTINUE)
    }));
    drop(strategy);

    keys.sort();
    assert_eq!(keys, (0..50).collect::<Vec<_>>());
}

#[test]
fn counted_boundaries() {
    let mut rounds = Vec::new();
    let (_, strategy) = run_to_end(CountedLoop::new(Span::new(0, 5, 1), |round| {
        rounds.push((round.index, round.is_last, round.prev.copied()));
        Ok(Step::Continue(round.index * 2))
    }));

    assert_eq!(strategy.into_output(), vec![0, 2, 4, 6, 8]);
    assert_eq!(rounds, vec![
        (0, false, None),
        (1, false, Some(0)),
        (2, false, Some(2)),
        (3, false, Some(4)),
        (4, true, Some(6)),
    ]);
}

#[test]
fn counted_with_step() {
    let mut seen = Vec::new();
    let (_, strategy) = run_to_end(CountedLoop::new(Span::new(3, 12, 4), |round| {
        seen.push((round.index, round.is_last));
        Ok(Step::CONTINUE)
    }));
    assert_eq!(strategy.next_index(), None);
    assert_eq!(seen, vec![(3, false), (7, false), (11, true)]);

    let span = Span::count(3);
    assert_eq!(span, Span::new(0, 3, 1));
    assert!(span.is_last(2));
    assert!(Span::count(0).is_empty());
    assert!(Span::from(5..5).is_empty());
}

#[test]
fn counted_repairs_steps() {
    let strategy = CountedLoop::new(Span::new(5, 8, 0), |round| Ok(Step::Continue(round.index)));
    assert_eq!(strategy.next_index(), Some(5));

    let (last, strategy) = run_to_end(CountedLoop::new(Span::new(5, 8, -1), |round| Ok(Step::Continue(round.index))));
    assert_eq!(last.unwrap(), Progress::Advanced);
    assert_eq!(strategy.into_output(), vec![5, 6, 7]);
}

#[test]
fn counted_near_overflow() {
    let mut seen = Vec::new();
    let (_, strategy) = run_to_end(CountedLoop::new(Span::new(i64::MAX - 2, i64::MAX, 1), |round| {
        seen.push(round.index);
        Ok(Step::CONTINUE)
    }));
    assert!(strategy.is_exhausted());
    assert_eq!(seen, vec![i64::MAX - 2, i64::MAX - 1]);
}

#[test]
fn unbounded_wraps_around() {
    let mut seen = Vec::new();
    let (last, strategy) = run_to_end(UnboundedLoop::new(|counter| {
        seen.push(counter);
        if seen.len() == 3 { Ok(Step::Stop) } else { Ok(Step::Continue(counter)) }
    }).starting_at(u64::MAX - 1));

    assert_eq!(last.unwrap(), Progress::Stopped);
    assert_eq!(strategy.counter(), 0);
    assert_eq!(strategy.into_output(), vec![u64::MAX - 1, u64::MAX]);
    assert_eq!(seen, vec![u64::MAX - 1, u64::MAX, 0]);
}

#[test]
fn strategy_kind_names() {
    assert_eq!(StrategyKind::from_name("Counted"), Some(StrategyKind::Counted));
    assert_eq!(StrategyKind::from_name("forever"), None);
    assert_eq!(StrategyKind::Keyed.to_string(), "keyed");
    assert!(Step::<u8>::Stop.is_stop());
    assert_eq!(Step::from(3), Step::Continue(3));
}
