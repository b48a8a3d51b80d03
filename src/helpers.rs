//! Builders for the entry points hanging off `Context`.
//!
//! `Parameters` holds what every job needs (speed, budget, cancellation). The
//! per-input builders pair it with the input and end with `run`, which submits
//! the job and returns a `CompletionHandle`.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{anomaly, normalize_span};
use crate::core::job::{Budget, JobDescriptor};
use crate::error::Error;
use crate::handle::CompletionHandle;
use crate::revolve::launch;
use crate::speed::Speed;
use crate::strategy::*;
use crate::Context;

/// A builder for common execution parameters such as the speed and the budget.
pub struct Parameters<'c> {
    pub(crate) ctx: &'c Context,
    pub(crate) speed: Speed,
    pub(crate) budget: Budget,
    pub(crate) kind: Option<StrategyKind>,
    pub(crate) strict: bool,
    pub(crate) cancel: Option<CancelToken>,
}

impl<'c> Parameters<'c> {
    pub(crate) fn new(ctx: &'c Context, speed: Speed) -> Self {
        Parameters {
            ctx,
            speed,
            budget: Budget::for_speed(speed),
            kind: None,
            strict: ctx.is_strict(),
            cancel: None,
        }
    }

    /// Override the speed's budget.
    ///
    /// An explicit interval is always a timed budget, even for `Speed::Ninja`.
    #[inline]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.budget = Budget::Timed(interval);

        self
    }

    /// Allow the job to be cancelled from outside of its callback.
    #[inline]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);

        self
    }

    #[inline]
    pub fn speed(&self) -> Speed { self.speed }

    #[inline]
    pub fn budget(&self) -> Budget { self.budget }

    #[inline]
    pub fn context(&self) -> &Context { self.ctx }

    /// Visit the elements of `items` in order.
    #[inline]
    pub fn for_each<T>(self, items: Vec<T>) -> ForEachBuilder<'c, T> {
        ForEachBuilder { params: self, items }
    }

    /// Visit every key of `map` once.
    #[inline]
    pub fn for_each_keyed<M: Keyed>(self, map: M) -> KeyedBuilder<'c, M> {
        KeyedBuilder { params: self, map }
    }

    /// Count through `span`.
    #[inline]
    pub fn repeat(self, span: impl Into<Span>) -> RepeatBuilder<'c> {
        RepeatBuilder { params: self, span: span.into() }
    }

    /// Call the callback until it asks to stop.
    #[inline]
    pub fn forever(self) -> ForeverBuilder<'c> {
        ForeverBuilder { params: self }
    }

    /// Run any strategy with these parameters.
    pub fn run_strategy<S>(self, strategy: S) -> CompletionHandle<S::Output>
    where
        S: Strategy + 'static,
        S::Output: 'static,
    {
        if let Err(err) = self.check_kind(strategy.kind()) {
            return CompletionHandle::ready(Err(err), self.ctx.host().clone());
        }

        let job = JobDescriptor {
            id: self.ctx.next_job_id(),
            kind: strategy.kind(),
            speed: self.speed,
            budget: self.budget,
        };

        launch(job, strategy, self.ctx.host().clone(), self.ctx.clock().clone(), self.cancel)
    }

    fn check_kind(&self, kind: StrategyKind) -> Result<(), Error> {
        match self.kind {
            Some(requested) if requested != kind => anomaly(
                self.strict,
                format!("requested a {} loop over {} input", requested, kind),
            ),
            _ => Ok(()),
        }
    }

    fn fail<T: 'static>(self, err: Error) -> CompletionHandle<T> {
        CompletionHandle::ready(Err(err), self.ctx.host().clone())
    }
}

pub struct ForEachBuilder<'c, T> {
    params: Parameters<'c>,
    items: Vec<T>,
}

impl<'c, T: 'static> ForEachBuilder<'c, T> {
    /// Submit the job. The handle resolves with `items` once every element was visited.
    pub fn run<F>(self, callback: F) -> CompletionHandle<Vec<T>>
    where
        F: FnMut(Item<T>) -> StepResult + 'static,
    {
        self.params.run_strategy(IndexedLoop::new(self.items, callback))
    }
}

pub struct KeyedBuilder<'c, M> {
    params: Parameters<'c>,
    map: M,
}

impl<'c, M> KeyedBuilder<'c, M>
where
    M: Keyed + 'static,
{
    /// Submit the job. The handle resolves with the map once every key was visited.
    pub fn run<F>(self, callback: F) -> CompletionHandle<M>
    where
        F: FnMut(Entry<M::Key, M::Value>) -> StepResult + 'static,
    {
        self.params.run_strategy(KeyedLoop::new(self.map, callback))
    }
}

pub struct RepeatBuilder<'c> {
    params: Parameters<'c>,
    span: Span,
}

impl<'c> RepeatBuilder<'c> {
    /// Submit the job. The handle resolves with the values the callback continued with.
    pub fn run<R, F>(self, callback: F) -> CompletionHandle<Vec<R>>
    where
        R: 'static,
        F: FnMut(Round<R>) -> StepResult<R> + 'static,
    {
        match normalize_span(self.span, self.params.strict) {
            Ok(span) => self.params.run_strategy(CountedLoop::new(span, callback)),
            Err(err) => self.params.fail(err),
        }
    }
}

pub struct ForeverBuilder<'c> {
    params: Parameters<'c>,
}

impl<'c> ForeverBuilder<'c> {
    /// Submit the job. The callback must eventually return `Step::Stop` or an error.
    ///
    /// The result holds every value the callback continued with. Continue with `()`
    /// when the values aren't needed, a `Vec<()>` doesn't allocate.
    pub fn run<R, F>(self, callback: F) -> CompletionHandle<Vec<R>>
    where
        R: 'static,
        F: FnMut(u64) -> StepResult<R> + 'static,
    {
        self.params.run_strategy(UnboundedLoop::new(callback))
    }
}
