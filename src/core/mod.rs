pub mod job;
pub mod context;
pub mod event;
pub mod host;
pub mod clock;
/// basic std::sync types reexported here so that we can hook loom into them for
/// testing.
pub mod sync;
