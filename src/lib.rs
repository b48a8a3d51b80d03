//! A cooperative, time-sliced iteration scheduler.
//!
//! Long synchronous loops freeze whatever event loop they run on. This crate breaks
//! them into slices that fit a time budget and yields back to the host between
//! slices, while callers still write an ordinary loop body and get a handle they can
//! wait on or chain more work onto.
//!
//! What we want:
//! - Plain loop semantics: every element is visited once, in order, unless the
//!   callback stops early or fails.
//! - No threads. Everything runs on the host's event loop, the host only has to be
//!   able to run a callback on its next turn.
//! - No global state. Speeds and budgets travel with each job.
//! - Named speeds trading responsiveness for throughput, from `doze` to `ninja`.
//!
//! ```
//! use std::rc::Rc;
//! use revolve::{Context, EventLoop, Step};
//!
//! let host = Rc::new(EventLoop::new());
//! let ctx = Context::new(host.clone());
//!
//! let handle = ctx.fast().for_each(vec![1, 2, 3]).run(|mut item| {
//!     *item *= 10;
//!     Ok(Step::CONTINUE)
//! });
//!
//! // Nothing happens until the host turns.
//! host.run_until_idle();
//!
//! let completion = handle.resolve().unwrap();
//! assert_eq!(completion.value, vec![10, 20, 30]);
//! ```

mod core;
mod helpers;
mod revolve;
pub mod cancel;
pub mod config;
pub mod error;
pub mod handle;
pub mod speed;
pub mod strategy;

pub use crate::cancel::CancelToken;
pub use crate::config::{Options, Resolved};
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::context::{Context, ContextBuilder};
pub use crate::core::event::{Event, Signal};
pub use crate::core::host::{Deferred, EventLoop, Host, HostStats};
pub use crate::core::job::{Budget, JobDescriptor, JobId};
pub use crate::error::{BoxError, Error};
pub use crate::handle::{Completion, CompletionHandle, Handle, Outcome, Stats};
pub use crate::helpers::*;
pub use crate::revolve::IterationState;
pub use crate::speed::{Speed, NINJA_WINDOW};
pub use crate::strategy::{
    CountedLoop, Entry, IndexedLoop, Item, Keyed, KeyedLoop, Progress, Round, Span, Step,
    StepResult, StopIteration, Strategy, StrategyKind, UnboundedLoop,
};
