//! Cancellation from outside of the callback.
//!
//! Without a token, the only way to end a job early is from inside its callback.
//! A `CancelToken` can be flipped from anywhere, including another thread, and the
//! scheduler loop checks it between elements.

use crate::core::sync::{Arc, AtomicBool, Ordering};

#[derive(Clone, Debug)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel every job holding a clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Make the token usable again. Jobs that already observed the cancellation
    /// stay cancelled.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(loom))]
#[test]
fn cancel_token() {
    let token = CancelToken::new();
    let other = token.clone();
    assert!(!other.is_cancelled());

    token.cancel();
    assert!(other.is_cancelled());
    token.cancel();
    assert!(other.is_cancelled());

    other.reset();
    assert!(!token.is_cancelled());
}

#[cfg(not(loom))]
#[test]
fn cancel_from_another_thread() {
    let token = CancelToken::new();
    let remote = token.clone();
    std::thread::spawn(move || remote.cancel()).join().unwrap();
    assert!(token.is_cancelled());
}

#[cfg(loom)]
#[test]
fn loom_cancel() {
    loom::model(|| {
        let token = CancelToken::new();
        let remote = token.clone();
        let th = loom::thread::spawn(move || remote.cancel());
        th.join().unwrap();
        assert!(token.is_cancelled());
    });
}
