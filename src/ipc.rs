//! Descriptor passing between the dispatcher and the worker pool.
//!
//! Both directions share one `SOCK_SEQPACKET` socket pair created before the
//! first fork, so every message is delivered whole to exactly one reader.
//!
//! ```text
//!  dispatcher                           workers (all share one end)
//!  DispatchChannel ── fd + number ──▶  WorkerEndpoint / WorkerChannel
//!                  ◀── number ──────
//! ```
//!
//! The number is the dispatcher-side descriptor value. Descriptor values are
//! process-local, so the worker never reports its own copy's number.

use std::fmt;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{
    self, AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType,
};
use tokio::io::unix::AsyncFd;

const NUMBER_LEN: usize = std::mem::size_of::<RawFd>();

/// Identifies a client connection across the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(RawFd);

impl CorrelationId {
    /// The correlation id of a descriptor owned by the dispatcher.
    pub fn of(fd: BorrowedFd<'_>) -> Self {
        Self(fd.as_raw_fd())
    }

    pub const fn from_raw(raw: RawFd) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> RawFd {
        self.0
    }

    fn to_bytes(self) -> [u8; NUMBER_LEN] {
        self.0.to_ne_bytes()
    }

    fn from_bytes(bytes: [u8; NUMBER_LEN]) -> Self {
        Self(RawFd::from_ne_bytes(bytes))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("ipc channel closed by peer")]
    Closed,
    #[error("short ipc message ({0} bytes)")]
    Truncated(usize),
    #[error("hand-off {0} arrived without a descriptor")]
    MissingDescriptor(CorrelationId),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Errno> for IpcError {
    fn from(errno: Errno) -> Self {
        IpcError::Io(io::Error::from(errno))
    }
}

impl IpcError {
    pub fn is_would_block(&self) -> bool {
        matches!(self, IpcError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

/// Creates the channel. Both ends are non-blocking.
pub fn channel() -> Result<(DispatchChannel, WorkerEndpoint), IpcError> {
    let (dispatch, worker) = socket::socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
    )?;

    Ok((DispatchChannel { fd: dispatch }, WorkerEndpoint { fd: worker }))
}

/// Sends `fd` together with its correlation number as one message.
pub fn send_fd(
    channel: BorrowedFd<'_>,
    fd: BorrowedFd<'_>,
    id: CorrelationId,
) -> Result<(), IpcError> {
    let payload = id.to_bytes();
    let iov = [IoSlice::new(&payload)];
    let fds = [fd.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];

    let sent = socket::sendmsg::<()>(channel.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)?;
    if sent != NUMBER_LEN {
        return Err(IpcError::Truncated(sent));
    }
    Ok(())
}

/// Receives one descriptor hand-off.
///
/// A message that carries a number but no descriptor is reported as
/// [`IpcError::MissingDescriptor`] so the caller can still answer it.
pub fn recv_fd(channel: BorrowedFd<'_>) -> Result<(OwnedFd, CorrelationId), IpcError> {
    let mut payload = [0u8; NUMBER_LEN];
    let mut space = nix::cmsg_space!([RawFd; 1]);

    let (bytes, received) = {
        let mut iov = [IoSliceMut::new(&mut payload)];
        let msg = socket::recvmsg::<()>(
            channel.as_raw_fd(),
            &mut iov,
            Some(&mut space),
            MsgFlags::empty(),
        )?;

        let mut received: Option<OwnedFd> = None;
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                for raw in fds {
                    // SAFETY: SCM_RIGHTS installed a fresh descriptor in this
                    // process and nothing else refers to it yet.
                    let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                    // extra descriptors are closed right here
                    received.get_or_insert(owned);
                }
            }
        }
        (msg.bytes, received)
    };

    match bytes {
        0 => Err(IpcError::Closed),
        NUMBER_LEN => {
            let id = CorrelationId::from_bytes(payload);
            received
                .map(|fd| (fd, id))
                .ok_or(IpcError::MissingDescriptor(id))
        }
        n => Err(IpcError::Truncated(n)),
    }
}

/// Sends a bare correlation number.
pub fn send_number(channel: BorrowedFd<'_>, id: CorrelationId) -> Result<(), IpcError> {
    let sent = socket::send(channel.as_raw_fd(), &id.to_bytes(), MsgFlags::empty())?;
    if sent != NUMBER_LEN {
        return Err(IpcError::Truncated(sent));
    }
    Ok(())
}

/// Receives a bare correlation number.
pub fn recv_number(channel: BorrowedFd<'_>) -> Result<CorrelationId, IpcError> {
    let mut payload = [0u8; NUMBER_LEN];
    match socket::recv(channel.as_raw_fd(), &mut payload, MsgFlags::empty())? {
        0 => Err(IpcError::Closed),
        NUMBER_LEN => Ok(CorrelationId::from_bytes(payload)),
        n => Err(IpcError::Truncated(n)),
    }
}

/// Dispatcher end of the channel.
#[derive(Debug)]
pub struct DispatchChannel {
    fd: OwnedFd,
}

impl DispatchChannel {
    /// Passes a client descriptor to whichever worker receives next.
    pub fn hand_off(&self, client: BorrowedFd<'_>, id: CorrelationId) -> Result<(), IpcError> {
        send_fd(self.fd.as_fd(), client, id)
    }

    /// Reads one completion notification. Call after poll reported input.
    pub fn recv_completion(&self) -> Result<CorrelationId, IpcError> {
        recv_number(self.fd.as_fd())
    }
}

impl AsFd for DispatchChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Worker end of the channel as inherited across `fork`.
#[derive(Debug)]
pub struct WorkerEndpoint {
    fd: OwnedFd,
}

impl WorkerEndpoint {
    /// Duplicates the endpoint. The copy shares the same socket.
    pub fn try_clone(&self) -> io::Result<WorkerEndpoint> {
        Ok(WorkerEndpoint {
            fd: self.fd.try_clone()?,
        })
    }

    /// Registers the endpoint with the current tokio runtime.
    pub fn into_async(self) -> io::Result<WorkerChannel> {
        Ok(WorkerChannel {
            inner: AsyncFd::new(self.fd)?,
        })
    }
}

impl AsFd for WorkerEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Async worker side of the channel.
///
/// Every worker waits on the same socket; the one whose `recvmsg` wins gets
/// the hand-off and the others go back to waiting.
#[derive(Debug)]
pub struct WorkerChannel {
    inner: AsyncFd<OwnedFd>,
}

impl WorkerChannel {
    pub async fn recv_connection(&self) -> Result<(OwnedFd, CorrelationId), IpcError> {
        loop {
            let mut guard = self.inner.readable().await?;
            match recv_fd(self.inner.get_ref().as_fd()) {
                Err(e) if e.is_would_block() => guard.clear_ready(),
                other => return other,
            }
        }
    }

    pub async fn notify_done(&self, id: CorrelationId) -> Result<(), IpcError> {
        loop {
            let mut guard = self.inner.writable().await?;
            match send_number(self.inner.get_ref().as_fd(), id) {
                Err(e) if e.is_would_block() => guard.clear_ready(),
                other => return other,
            }
        }
    }
}
