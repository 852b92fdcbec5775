//! Worker pool supervision.
//!
//! The monitor process forks the workers, then loops: wait on the lifeline
//! for one reap interval, collect exited children, fork a replacement for
//! each one under the same [`WorkerId`]. Once the lifeline is severed it
//! stops the pool and returns.

use std::fmt;

use anyhow::Context;
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::ipc::WorkerEndpoint;
use crate::server::lifeline::LifelineWatch;
use crate::server::worker;

/// Stable index of a worker in the pool. Survives respawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Starts one worker process.
pub trait Spawn {
    fn spawn(&mut self, id: WorkerId) -> anyhow::Result<Pid>;
}

/// Tracks which process currently runs each worker id.
pub struct Supervisor<S> {
    spawner: S,
    pids: Vec<Option<Pid>>,
}

impl<S: Spawn> Supervisor<S> {
    pub fn new(spawner: S, workers: usize) -> Self {
        Self {
            spawner,
            pids: vec![None; workers],
        }
    }

    /// Spawns the whole pool. Any failure is fatal.
    pub fn start(&mut self) -> anyhow::Result<()> {
        for index in 0..self.pids.len() {
            let id = WorkerId(index);
            let pid = self
                .spawner
                .spawn(id)
                .with_context(|| format!("failed to start worker {id}"))?;
            self.pids[index] = Some(pid);
            info!(worker = %id, %pid, "worker started");
        }
        Ok(())
    }

    /// Records that `pid` is gone. Returns the worker it was running, if any.
    pub fn on_exit(&mut self, pid: Pid) -> Option<WorkerId> {
        let index = self.pids.iter().position(|p| *p == Some(pid))?;
        self.pids[index] = None;
        Some(WorkerId(index))
    }

    /// Spawns a replacement for every worker without a process. A failed
    /// spawn is retried on the next call.
    pub fn respawn_missing(&mut self) -> Vec<WorkerId> {
        let mut respawned = Vec::new();
        for index in 0..self.pids.len() {
            if self.pids[index].is_some() {
                continue;
            }

            let id = WorkerId(index);
            match self.spawner.spawn(id) {
                Ok(pid) => {
                    self.pids[index] = Some(pid);
                    info!(worker = %id, %pid, "worker respawned");
                    respawned.push(id);
                }
                Err(e) => warn!(worker = %id, error = ?e, "respawn failed"),
            }
        }
        respawned
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.pids.iter().flatten().copied()
    }

    pub fn pid_of(&self, id: WorkerId) -> Option<Pid> {
        self.pids.get(id.0).copied().flatten()
    }
}

/// Forks real worker processes bound to the shared endpoint.
pub struct ForkSpawner<'a> {
    endpoint: &'a WorkerEndpoint,
    config: &'a Config,
}

impl<'a> ForkSpawner<'a> {
    pub fn new(endpoint: &'a WorkerEndpoint, config: &'a Config) -> Self {
        Self { endpoint, config }
    }
}

impl Spawn for ForkSpawner<'_> {
    fn spawn(&mut self, id: WorkerId) -> anyhow::Result<Pid> {
        // SAFETY: the monitor never starts threads, so the child gets a
        // consistent copy of the only thread there is.
        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => {
                let code = match worker::run(id, self.endpoint, self.config) {
                    Ok(()) => 0,
                    Err(e) => {
                        error!(worker = %id, error = ?e, "worker failed");
                        1
                    }
                };
                std::process::exit(code)
            }
        }
    }
}

/// Body of the monitor process. Returns once the pool has been stopped.
pub fn run_monitor(
    watch: LifelineWatch,
    endpoint: WorkerEndpoint,
    config: &Config,
) -> anyhow::Result<()> {
    // Ctrl-C in a terminal reaches the whole process group. The dispatcher
    // drives shutdown; the monitor and its workers wait to be told.
    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal::signal(Signal::SIGINT, SigHandler::SigIgn) }
        .context("failed to ignore SIGINT")?;

    let spawner = ForkSpawner::new(&endpoint, config);
    let mut supervisor = Supervisor::new(spawner, config.server.workers);
    supervisor.start()?;
    info!(workers = config.server.workers, "monitor running");

    let interval = config.server.reap_interval();
    while !watch.is_severed(interval).context("lifeline poll failed")? {
        for (pid, status) in reap_exited() {
            if let Some(id) = supervisor.on_exit(pid) {
                warn!(worker = %id, %pid, ?status, "worker exited");
            }
        }
        supervisor.respawn_missing();
    }

    info!("dispatcher gone, stopping workers");
    let pids: Vec<Pid> = supervisor.pids().collect();
    for pid in &pids {
        match signal::kill(*pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(%pid, error = %e, "failed to signal worker"),
        }
    }
    for pid in pids {
        wait_for(pid);
    }

    info!("monitor stopped");
    Ok(())
}

/// Collects every child that has exited, without blocking.
pub fn reap_exited() -> Vec<(Pid, WaitStatus)> {
    let mut exited = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    exited.push((pid, status));
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    exited
}

/// Blocks until `pid` has exited.
pub fn wait_for(pid: Pid) -> Option<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => return Some(status),
            Err(Errno::EINTR) => continue,
            Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSpawner {
        next: i32,
        spawned: Vec<WorkerId>,
        fail: bool,
    }

    impl Spawn for FakeSpawner {
        fn spawn(&mut self, id: WorkerId) -> anyhow::Result<Pid> {
            if self.fail {
                anyhow::bail!("no more processes");
            }
            self.next += 1;
            self.spawned.push(id);
            Ok(Pid::from_raw(1000 + self.next))
        }
    }

    fn started(workers: usize) -> Supervisor<FakeSpawner> {
        let mut supervisor = Supervisor::new(FakeSpawner::default(), workers);
        supervisor.start().unwrap();
        supervisor
    }

    #[test]
    fn start_spawns_every_worker() {
        let supervisor = started(3);

        assert_eq!(
            supervisor.spawner.spawned,
            vec![WorkerId(0), WorkerId(1), WorkerId(2)]
        );
        assert_eq!(supervisor.pids().count(), 3);
        assert_eq!(supervisor.pid_of(WorkerId(1)), Some(Pid::from_raw(1002)));
    }

    #[test]
    fn exited_worker_is_respawned_with_same_id() {
        let mut supervisor = started(3);
        let pid = supervisor.pid_of(WorkerId(1)).unwrap();

        assert_eq!(supervisor.on_exit(pid), Some(WorkerId(1)));
        assert_eq!(supervisor.pid_of(WorkerId(1)), None);

        assert_eq!(supervisor.respawn_missing(), vec![WorkerId(1)]);
        let new_pid = supervisor.pid_of(WorkerId(1)).unwrap();
        assert_ne!(new_pid, pid);
        assert_eq!(supervisor.on_exit(pid), None);
    }

    #[test]
    fn unknown_pid_is_ignored() {
        let mut supervisor = started(2);

        assert_eq!(supervisor.on_exit(Pid::from_raw(42)), None);
        assert!(supervisor.respawn_missing().is_empty());
    }

    #[test]
    fn failed_respawn_is_retried() {
        let mut supervisor = started(2);
        let pid = supervisor.pid_of(WorkerId(0)).unwrap();
        supervisor.on_exit(pid);

        supervisor.spawner.fail = true;
        assert!(supervisor.respawn_missing().is_empty());
        assert_eq!(supervisor.pids().count(), 1);

        supervisor.spawner.fail = false;
        assert_eq!(supervisor.respawn_missing(), vec![WorkerId(0)]);
        assert_eq!(supervisor.pids().count(), 2);
    }

    #[test]
    fn start_fails_when_spawn_fails() {
        let mut supervisor = Supervisor::new(
            FakeSpawner {
                fail: true,
                ..FakeSpawner::default()
            },
            2,
        );

        assert!(supervisor.start().is_err());
    }
}
