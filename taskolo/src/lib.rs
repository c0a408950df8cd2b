//! A dependency driven task runtime.
//!
//! Tasks are plain closures. They declare the [`Token`]s they consume and
//! produce, and become runnable once every producer of their inputs submitted
//! before them has completed.
//! Runnable tasks are served by a pool of worker threads per priority class
//! ([`Qos`]), which grows with the backlog and shrinks when idle.
//!
//! On top of the task runtime:
//! - [`SerialQueue`] runs closures one at a time in wake time order, with an
//!   optional per-item watchdog.
//! - [`Interval`] turns deadlines and observed load into utilization hints
//!   for the OS scheduling service.
//!
//! ```no_run
//! use taskolo::{TaskAttr, Token};
//!
//! #[taskolo::main]
//! fn main() -> anyhow::Result<()> {
//!     let parsed = Token::new();
//!     taskolo::submit_with(|| println!("parse"), &[], &[parsed], TaskAttr::new())?;
//!     taskolo::submit_with(|| println!("render"), &[parsed], &[], TaskAttr::new())?;
//!     taskolo::wait_all()?;
//!     Ok(())
//! }
//! ```

#[doc(inline)]
pub use taskolo_macros::main;

#[doc(inline)]
pub use taskolo_macros::test;

mod context;

mod deps;
pub use deps::Token;

mod error;
pub use error::{Error, Result};

mod qos;
pub use qos::{Qos, QosMask};

pub mod queue;
pub use queue::{SerialHandle, SerialQueue, SerialQueueBuilder};

pub mod runtime;
pub use runtime::{Builder, EnterGuard, Handle, Runtime};
pub use runtime::{skip, submit, submit_with, wait, wait_all};

pub mod sched;
pub use sched::{Interval, TaskSwitchState};

pub mod sys;
pub use sys::{GroupId, NoopQosService, QosService, Tid};

pub mod task;
pub use task::{Id, State, TaskAttr, TaskHandle};

mod utils;

#[cfg(test)]
mod test_utils;
