//! `poll(2)` backend with a socketpair for cross-thread wakeups.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::warn;

use super::{WaitBackend, Waker, Watch};
use crate::error::{LoopError, Result};

struct PipeWaker {
    tx: UnixStream,
}

impl Waker for PipeWaker {
    fn wake(&self) {
        match (&self.tx).write(&[1]) {
            Ok(_) => {}
            // A full pipe already holds a pending wakeup.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "event loop wakeup failed"),
        }
    }
}

pub(crate) struct PollBackend {
    rx: UnixStream,
    waker: Arc<PipeWaker>,
}

impl PollBackend {
    pub fn new() -> io::Result<Self> {
        let (rx, tx) = UnixStream::pair()?;
        rx.set_nonblocking(true)?;
        tx.set_nonblocking(true)?;
        Ok(Self {
            rx,
            waker: Arc::new(PipeWaker { tx }),
        })
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    let ms = timeout.as_nanos().div_ceil(1_000_000);
    PollTimeout::from(u16::try_from(ms).unwrap_or(u16::MAX))
}

impl WaitBackend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn supports_fds(&self) -> bool {
        true
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::clone(&self.waker) as Arc<dyn Waker>
    }

    fn wait(&mut self, timeout: Duration, watch: &[Watch<'_>]) -> Result<Vec<usize>> {
        let (woken, ready) = {
            let mut fds = Vec::with_capacity(watch.len() + 1);
            fds.push(PollFd::new(self.rx.as_fd(), PollFlags::POLLIN));
            for w in watch {
                let events = if w.write {
                    PollFlags::POLLOUT
                } else {
                    PollFlags::POLLIN
                };
                fds.push(PollFd::new(w.fd, events));
            }

            match poll(&mut fds, poll_timeout(timeout)) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(Vec::new()),
                Err(e) => return Err(LoopError::Poll(e)),
            }

            let hit = PollFlags::POLLIN | PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR;
            let is_ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|r| r.intersects(hit));
            let woken = is_ready(&fds[0]);
            let ready: Vec<usize> = fds[1..]
                .iter()
                .enumerate()
                .filter(|(_, fd)| is_ready(*fd))
                .map(|(i, _)| i)
                .collect();
            (woken, ready)
        };
        if woken {
            self.drain();
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use web_time::Instant;

    #[test]
    fn readable_descriptor_is_reported() {
        let mut b = PollBackend::new().unwrap();
        let (a, peer) = UnixStream::pair().unwrap();
        (&peer).write_all(b"x").unwrap();
        let watch = [Watch {
            fd: a.as_fd(),
            write: false,
        }];
        assert_eq!(b.wait(Duration::from_secs(5), &watch).unwrap(), vec![0]);
    }

    #[test]
    fn idle_descriptor_times_out() {
        let mut b = PollBackend::new().unwrap();
        let (a, _peer) = UnixStream::pair().unwrap();
        let watch = [Watch {
            fd: a.as_fd(),
            write: false,
        }];
        let start = Instant::now();
        assert!(b.wait(Duration::from_millis(20), &watch).unwrap().is_empty());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn waker_interrupts_wait() {
        let mut b = PollBackend::new().unwrap();
        let w = b.waker();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            w.wake();
        });
        let start = Instant::now();
        assert!(b.wait(Duration::from_secs(10), &[]).unwrap().is_empty());
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();

        // The wakeup was consumed.
        let start = Instant::now();
        b.wait(Duration::from_millis(20), &[]).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
