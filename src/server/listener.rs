use std::net::TcpListener;

use anyhow::Context;
use tracing::info;

use crate::config::Config;

/// Binds the listening socket the dispatcher accepts on.
///
/// The socket is non-blocking so that `accept` never stalls the poll loop,
/// even if another process raced us to the pending connection.
pub fn bind(cfg: &Config) -> anyhow::Result<TcpListener> {
    let addr = cfg.listen_addr();
    let listener = TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make the listener non-blocking")?;

    info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}
