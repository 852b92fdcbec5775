use std::future::Future;
use std::io;
use std::os::fd::OwnedFd;

use anyhow::Context;
use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, HttpConfig};
use crate::fsm::IllegalTransition;
use crate::http::connection::{Connection, ConnectionState, RAW_SIZE};
use crate::http::response::StatusCode;
use crate::ipc::{IpcError, WorkerChannel, WorkerEndpoint};
use crate::server::supervisor::WorkerId;

/// Body of a worker process.
///
/// Serves hand-offs one at a time until SIGTERM arrives or the dispatcher
/// goes away. A connection that is already being served when SIGTERM lands
/// is finished first.
pub fn run(id: WorkerId, endpoint: &WorkerEndpoint, config: &Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build worker runtime")?;
    let endpoint = endpoint
        .try_clone()
        .context("failed to duplicate worker endpoint")?;

    runtime.block_on(async {
        let channel = endpoint
            .into_async()
            .context("failed to register worker endpoint")?;

        let shutdown = CancellationToken::new();
        let mut sigterm = signal(SignalKind::terminate()).context("failed to watch SIGTERM")?;
        let token = shutdown.clone();
        tokio::spawn(async move {
            sigterm.recv().await;
            token.cancel();
        });

        let mut pipeline = HttpPipeline::new(&config.http);
        serve(id, &channel, &mut pipeline, &shutdown).await
    })
}

/// Answers one handed-off connection.
pub trait Pipeline {
    fn handle(
        &mut self,
        stream: TcpStream,
    ) -> impl Future<Output = Result<StatusCode, IllegalTransition<ConnectionState>>>;
}

/// The static-file pipeline, with one request buffer reused across
/// connections.
pub struct HttpPipeline<'a> {
    config: &'a HttpConfig,
    buffer: BytesMut,
}

impl<'a> HttpPipeline<'a> {
    pub fn new(config: &'a HttpConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::with_capacity(RAW_SIZE),
        }
    }
}

impl Pipeline for HttpPipeline<'_> {
    async fn handle(
        &mut self,
        stream: TcpStream,
    ) -> Result<StatusCode, IllegalTransition<ConnectionState>> {
        Connection::new(stream, self.config, &mut self.buffer).run().await
    }
}

/// The worker loop: receive, answer, report, repeat.
///
/// An illegal pipeline transition ends the loop with an error after the
/// completion has been reported, so the slot is freed and the monitor
/// starts a fresh process.
pub async fn serve<P: Pipeline>(
    id: WorkerId,
    channel: &WorkerChannel,
    pipeline: &mut P,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    info!(worker = %id, pid = std::process::id(), "worker ready");

    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = channel.recv_connection() => received,
        };

        let (fd, correlation) = match received {
            Ok(pair) => pair,
            Err(IpcError::MissingDescriptor(correlation)) => {
                warn!(worker = %id, %correlation, "hand-off without a descriptor");
                channel.notify_done(correlation).await?;
                continue;
            }
            Err(IpcError::Closed) => {
                info!(worker = %id, "dispatcher channel closed");
                break;
            }
            Err(e) => {
                warn!(worker = %id, error = %e, "failed to receive hand-off");
                continue;
            }
        };

        debug!(worker = %id, %correlation, "serving connection");
        let outcome = match into_stream(fd) {
            Ok(stream) => pipeline.handle(stream).await.map(Some),
            Err(e) => {
                warn!(worker = %id, %correlation, error = %e, "unusable client descriptor");
                Ok(None)
            }
        };

        channel
            .notify_done(correlation)
            .await
            .context("failed to report completion")?;

        if let Some(status) = outcome.with_context(|| format!("worker {id} pipeline failed"))? {
            debug!(worker = %id, %correlation, status = status.as_u16(), "connection done");
        }
    }

    info!(worker = %id, "worker stopped");
    Ok(())
}

fn into_stream(fd: OwnedFd) -> io::Result<TcpStream> {
    let stream = std::net::TcpStream::from(fd);
    stream.set_nonblocking(true)?;
    TcpStream::from_std(stream)
}
