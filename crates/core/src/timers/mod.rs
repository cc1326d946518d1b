//! Timed background work.
//!
//! Two layers share the reactor's time driver:
//!
//! - [`TimerRegistry`] — the fixed set of built-in repeating timers that
//!   reclaim core-held resources (stale descriptors, expired shared
//!   buffers). The set is decided at core construction and initialised
//!   lazily by the first `run_event_loop()`.
//! - [`Timers`] — the user-facing `set_timeout` / `set_interval` /
//!   `set_immediate` surface with `u64` ids unique for the core's lifetime.

mod registry;
mod user;

pub(crate) use registry::{BuiltinTimer, TimerControl};
pub use registry::TimerRegistry;
pub use user::{IntervalCancel, TimerId, Timers};
