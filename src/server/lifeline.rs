//! Parent-death detection for the monitor process.
//!
//! The dispatcher keeps the write end of a pipe and never writes to it. When
//! the dispatcher exits, or drops its [`Lifeline`] on shutdown, the kernel
//! closes the write end and the monitor's read end reports hang-up.

use std::os::fd::{AsFd, OwnedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};

use crate::server::poll_timeout;

/// Write end, held by the dispatcher.
#[derive(Debug)]
pub struct Lifeline {
    _fd: OwnedFd,
}

/// Read end, held by the monitor.
#[derive(Debug)]
pub struct LifelineWatch {
    fd: OwnedFd,
}

pub fn lifeline() -> nix::Result<(Lifeline, LifelineWatch)> {
    let (read, write) = nix::unistd::pipe()?;
    Ok((Lifeline { _fd: write }, LifelineWatch { fd: read }))
}

impl LifelineWatch {
    /// Waits up to `timeout` and reports whether the write end is gone.
    pub fn is_severed(&self, timeout: Duration) -> nix::Result<bool> {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(fds[0].revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLHUP | PollFlags::POLLIN | PollFlags::POLLERR)
            })),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
