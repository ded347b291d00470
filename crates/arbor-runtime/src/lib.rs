#![forbid(unsafe_code)]

//! Event loop for arbor applications.
//!
//! An [`EventLoop`] owns a wait backend and drives prologue, epilogue,
//! spinner, terminator and descriptor sinks plus timers. Other threads
//! interact with it through a cloneable [`LoopHandle`]: they can add timers,
//! schedule event posts, and ask the loop to terminate.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use arbor_runtime::{EventLoop, EventLoopConfig};
//!
//! let mut ev = EventLoop::new(EventLoopConfig::from_env())?;
//! let mut left = 3;
//! ev.handle().add_timer(None, Duration::from_millis(100), "", &[], move |h, _| {
//!     left -= 1;
//!     if left == 0 {
//!         h.terminate(0);
//!         return 0;
//!     }
//!     100
//! })?;
//! let _code = ev.run()?;
//! # Ok::<(), arbor_runtime::LoopError>(())
//! ```

mod backend;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod sink;
pub mod timer;

pub use config::{Backend, EventLoopConfig, SpinnerPolicy};
pub use error::{LoopError, Result};
pub use event_loop::{EventLoop, IterationStats, LoopHandle, LoopState};
pub use sink::{SinkControl, SinkId, SinkKind};
pub use timer::TimerId;

#[cfg(unix)]
pub use sink::SinkFd;
