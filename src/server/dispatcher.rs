//! The accepting side of the server.
//!
//! A single thread polls the listener, the worker channel and every pending
//! client. Each turn of the loop:
//!
//! 1. accepts at most one connection (answering 503 when the table is full),
//! 2. reads at most one completion and frees the slot it names,
//! 3. closes pending clients that hung up and hands the readable ones to
//!    the workers,
//! 4. gives up on hand-offs nobody reported back within the hand-off timeout.
//!
//! Parked slots are left out of the poll set. Their descriptors stay open,
//! which keeps the kernel from reusing the number while a worker still
//! holds the connection. A hand-off that timed out loses its slot but keeps
//! its descriptor until the late completion shows up or the client hangs
//! up. Only hang-ups are polled for on those.

use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::http::response::Response;
use crate::http::writer::serialize_response;
use crate::ipc::{CorrelationId, DispatchChannel, IpcError};
use crate::server::poll_timeout;
use crate::server::slots::{Slot, SlotTable};

/// How long a rejected client gets to take the 503 before it is dropped.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

const CLOSED: PollFlags = PollFlags::POLLHUP
    .union(PollFlags::POLLERR)
    .union(PollFlags::POLLNVAL);

pub struct Dispatcher {
    listener: TcpListener,
    channel: DispatchChannel,
    slots: SlotTable<TcpStream>,
    rejection: Vec<u8>,
    handoff_timeout: Duration,
    tick: Duration,
}

#[derive(Debug)]
struct Readiness {
    listener: PollFlags,
    channel: PollFlags,
    clients: Vec<(usize, PollFlags)>,
    hung_up: Vec<CorrelationId>,
}

impl Dispatcher {
    pub fn new(listener: TcpListener, channel: DispatchChannel, cfg: &Config) -> Self {
        Self {
            listener,
            channel,
            slots: SlotTable::new(cfg.server.max_clients),
            rejection: serialize_response(&Response::rejection(&cfg.http.server_name)),
            handoff_timeout: cfg.server.handoff_timeout(),
            tick: cfg.server.tick(),
        }
    }

    pub fn slots(&self) -> &SlotTable<TcpStream> {
        &self.slots
    }

    /// Turns the loop until `shutdown` is cancelled. Checks the token at
    /// least once per tick.
    pub fn run(mut self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        info!(max_clients = self.slots.capacity(), "dispatcher running");

        while !shutdown.is_cancelled() {
            self.turn()?;
        }

        info!(open = self.slots.occupied(), "dispatcher stopped");
        Ok(())
    }

    /// Waits for activity (at most one tick) and handles it.
    pub fn turn(&mut self) -> anyhow::Result<()> {
        let ready = self.wait()?;

        if ready.listener.contains(PollFlags::POLLIN) {
            self.accept();
        }

        if ready.channel.contains(PollFlags::POLLIN) {
            self.complete()?;
        } else if ready.channel.intersects(CLOSED) {
            bail!("worker channel closed");
        }

        for (index, events) in ready.clients {
            if events.intersects(CLOSED) {
                debug!(slot = index, "client hung up before sending");
                self.slots.close(index);
            } else if events.contains(PollFlags::POLLIN) {
                self.hand_off(index);
            }
        }

        for id in ready.hung_up {
            if self.slots.forget(id) {
                debug!(correlation = %id, "reclaimed client hung up");
            }
        }

        for id in self
            .slots
            .reclaim_expired(Instant::now(), self.handoff_timeout)
        {
            warn!(correlation = %id, "no completion within hand-off timeout, reclaiming slot");
        }

        Ok(())
    }

    fn wait(&self) -> anyhow::Result<Readiness> {
        let pending: Vec<(usize, BorrowedFd<'_>)> = self.slots.pending().collect();
        let lingering: Vec<(CorrelationId, BorrowedFd<'_>)> = self.slots.lingering().collect();

        let mut fds = Vec::with_capacity(pending.len() + lingering.len() + 2);
        fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        fds.push(PollFd::new(self.channel.as_fd(), PollFlags::POLLIN));
        fds.extend(
            pending
                .iter()
                .map(|(_, fd)| PollFd::new(*fd, PollFlags::POLLIN)),
        );
        // no interest bits: poll still reports HUP and ERR
        fds.extend(
            lingering
                .iter()
                .map(|(_, fd)| PollFd::new(*fd, PollFlags::empty())),
        );

        match poll(&mut fds, poll_timeout(self.tick)) {
            Ok(_) => {}
            Err(Errno::EINTR) => {
                return Ok(Readiness {
                    listener: PollFlags::empty(),
                    channel: PollFlags::empty(),
                    clients: Vec::new(),
                    hung_up: Vec::new(),
                });
            }
            Err(e) => return Err(e).context("poll failed"),
        }

        let events = |fd: &PollFd<'_>| fd.revents().unwrap_or(PollFlags::empty());
        let (client_fds, lingering_fds) = fds[2..].split_at(pending.len());
        Ok(Readiness {
            listener: events(&fds[0]),
            channel: events(&fds[1]),
            clients: pending
                .iter()
                .zip(client_fds)
                .map(|((index, _), fd)| (*index, events(fd)))
                .collect(),
            hung_up: lingering
                .iter()
                .zip(lingering_fds)
                .filter(|(_, fd)| events(*fd).intersects(CLOSED))
                .map(|((id, _), _)| *id)
                .collect(),
        })
    }

    fn accept(&mut self) {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        };

        match self.slots.insert(stream) {
            Ok(index) => debug!(slot = index, %peer, "accepted connection"),
            Err(stream) => {
                warn!(%peer, "too many clients, rejecting connection");
                self.reject(stream);
            }
        }
    }

    fn reject(&self, mut stream: TcpStream) {
        let written = stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_write_timeout(Some(REJECT_WRITE_TIMEOUT)))
            .and_then(|()| stream.write_all(&self.rejection));

        if let Err(e) = written {
            debug!(error = %e, "failed to send rejection");
        }
    }

    fn complete(&mut self) -> anyhow::Result<()> {
        match self.channel.recv_completion() {
            Ok(id) => match self.slots.release(id) {
                Some(index) => debug!(slot = index, correlation = %id, "connection done"),
                None if self.slots.forget(id) => {
                    debug!(correlation = %id, "late completion for reclaimed connection")
                }
                None => debug!(correlation = %id, "completion for unknown connection"),
            },
            Err(IpcError::Closed) => bail!("worker channel closed"),
            Err(e) if e.is_would_block() => {}
            Err(e) => warn!(error = %e, "failed to read completion"),
        }
        Ok(())
    }

    fn hand_off(&mut self, index: usize) {
        let sent = match self.slots.get(index) {
            Some(Slot::Pending(stream)) => {
                let id = CorrelationId::of(stream.as_fd());
                self.channel.hand_off(stream.as_fd(), id).map(|()| id)
            }
            _ => return,
        };

        match sent {
            Ok(id) => {
                self.slots.park(index, Instant::now());
                debug!(slot = index, correlation = %id, "handed off");
            }
            Err(e) if e.is_would_block() => {
                trace!(slot = index, "worker channel full, retrying");
            }
            Err(e) => {
                warn!(slot = index, error = %e, "hand-off failed, closing client");
                self.slots.close(index);
            }
        }
    }
}
