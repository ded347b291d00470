//! Wait backends.
//!
//! A backend blocks the loop until a watched descriptor is ready, the
//! timeout elapses, or another thread wakes it.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::Backend;
use crate::error::Result;

#[cfg(unix)]
mod poll;
mod timed;

#[cfg(unix)]
pub(crate) use poll::PollBackend;
pub(crate) use timed::TimedWait;

/// Interrupts a blocking [`WaitBackend::wait`] from any thread.
pub(crate) trait Waker: Send + Sync {
    fn wake(&self);
}

/// One descriptor to watch.
#[cfg(unix)]
pub(crate) struct Watch<'a> {
    pub fd: std::os::fd::BorrowedFd<'a>,
    pub write: bool,
}

#[cfg(not(unix))]
pub(crate) struct Watch<'a> {
    _fd: std::marker::PhantomData<&'a ()>,
}

pub(crate) trait WaitBackend: Send {
    fn name(&self) -> &'static str;

    /// Whether read/write sinks can be watched.
    fn supports_fds(&self) -> bool;

    fn waker(&self) -> Arc<dyn Waker>;

    /// Block for at most `timeout`. Returns the indices into `watch` that
    /// became ready.
    fn wait(&mut self, timeout: Duration, watch: &[Watch<'_>]) -> Result<Vec<usize>>;
}

/// Instantiate the backend `choice` asks for.
pub(crate) fn select(choice: Backend) -> Result<Box<dyn WaitBackend>> {
    let backend: Box<dyn WaitBackend> = match choice {
        #[cfg(unix)]
        Backend::Auto | Backend::Poll => Box::new(PollBackend::new()?),
        #[cfg(not(unix))]
        Backend::Poll => {
            tracing::warn!("poll backend unavailable on this platform; using timed wait");
            Box::new(TimedWait::new())
        }
        #[cfg(not(unix))]
        Backend::Auto => Box::new(TimedWait::new()),
        Backend::TimedWait => Box::new(TimedWait::new()),
    };
    debug!(backend = backend.name(), "wait backend selected");
    Ok(backend)
}
