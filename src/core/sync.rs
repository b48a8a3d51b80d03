pub use std::sync::atomic::Ordering;

// Only the cancellation flag crosses threads. Everything else in this crate is
// driven by a single host thread and uses `Rc`/`Cell`.

#[cfg(not(loom))] pub use std::sync::{
    Arc,
    atomic::AtomicBool,
};

#[cfg(loom)] pub use loom::sync::{
    Arc,
    atomic::AtomicBool,
};
