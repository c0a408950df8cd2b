//! Strictly ordered execution on a single looper task.
//!
//! A [`SerialQueue`] owns an [`OrderedQueue`] of items keyed by wake time and
//! a perpetual looper task popping and running them one at a time. Items can
//! be supervised by a watchdog armed on the runtime timer before dispatch.

// Public API
mod serial;
pub use serial::{SerialHandle, SerialQueue, SerialQueueBuilder};

// Exports
mod item;
pub(crate) use item::SerialItem;

mod looper;

mod ordered;
pub(crate) use ordered::OrderedQueue;
