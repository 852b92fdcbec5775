use std::net::TcpListener;

use anyhow::Context;
use nix::unistd::{ForkResult, fork};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use prefork::config::Config;
use prefork::ipc::{self, DispatchChannel};
use prefork::server::dispatcher::Dispatcher;
use prefork::server::{lifeline, listener, supervisor};

fn main() -> anyhow::Result<()> {
    let cfg = Config::load().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.max_level())
        .init();

    let listener = listener::bind(&cfg)?;
    let (dispatch, endpoint) = ipc::channel().context("failed to create worker channel")?;
    let (line, watch) = lifeline::lifeline().context("failed to create lifeline pipe")?;

    // SAFETY: no runtime or other thread exists yet.
    let monitor = match unsafe { fork() }.context("failed to fork monitor")? {
        ForkResult::Child => {
            drop(listener);
            drop(dispatch);
            drop(line);

            let code = match supervisor::run_monitor(watch, endpoint, &cfg) {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!(error = ?e, "monitor failed");
                    1
                }
            };
            std::process::exit(code);
        }
        ForkResult::Parent { child } => child,
    };
    drop(watch);
    drop(endpoint);
    tracing::info!(pid = %monitor, "monitor started");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    let result = runtime.block_on(serve(listener, dispatch, &cfg));
    drop(runtime);

    drop(line);
    supervisor::wait_for(monitor);
    tracing::info!("shutdown complete");

    result
}

async fn serve(
    listener: TcpListener,
    dispatch: DispatchChannel,
    cfg: &Config,
) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(listener, dispatch, cfg);
    let shutdown = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt()).context("failed to watch SIGINT")?;
    let mut sigterm = signal(SignalKind::terminate()).context("failed to watch SIGTERM")?;

    let token = shutdown.clone();
    let mut dispatching = tokio::task::spawn_blocking(move || dispatcher.run(&token));

    tokio::select! {
        res = &mut dispatching => {
            return res.context("dispatcher panicked")?;
        }

        _ = sigint.recv() => {
            tracing::info!("Shutdown signal received");
        }

        _ = sigterm.recv() => {
            tracing::info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    dispatching.await.context("dispatcher panicked")?
}
