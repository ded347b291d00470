//! Portable backend: a condition variable with a timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{WaitBackend, Waker, Watch};
use crate::error::{LoopError, Result};
use crate::sink::SinkKind;

#[derive(Default)]
struct Signal {
    woken: Mutex<bool>,
    cv: Condvar,
}

impl Waker for Signal {
    fn wake(&self) {
        *self.woken.lock() = true;
        self.cv.notify_one();
    }
}

pub(crate) struct TimedWait {
    signal: Arc<Signal>,
}

impl TimedWait {
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal::default()),
        }
    }
}

impl WaitBackend for TimedWait {
    fn name(&self) -> &'static str {
        "timed-wait"
    }

    fn supports_fds(&self) -> bool {
        false
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::clone(&self.signal) as Arc<dyn Waker>
    }

    fn wait(&mut self, timeout: Duration, watch: &[Watch<'_>]) -> Result<Vec<usize>> {
        if !watch.is_empty() {
            return Err(LoopError::Unsupported {
                kind: SinkKind::Read,
                backend: self.name(),
            });
        }
        let mut woken = self.signal.woken.lock();
        if !*woken && !timeout.is_zero() {
            self.signal.cv.wait_for(&mut woken, timeout);
        }
        *woken = false;
        Ok(Vec::new())
    }
}
