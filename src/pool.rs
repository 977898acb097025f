//! Worker pool bookkeeping and the parent side of a worker process.
//!
//! [`WorkerPool`] tracks the live-worker count against the concurrency cap,
//! the idle list, and the FIFO of requests admitted while the pool was
//! saturated. It is owned and mutated by a single manager task (see
//! [`crate::resolver`]), so it needs no locking; its two invariants are:
//!
//! - live workers never exceed `max_workers`;
//! - the pending queue is non-empty only while the pool is saturated (a
//!   request never queues while spawn capacity remains).
//!
//! [`WorkerHandle`] is the parent's view of one child process: the spawned
//! [`tokio::process::Child`] plus its pipe pair. A handle is either idle (in
//! `WorkerPool::idle`) or busy (owned by exactly one in-flight response
//! future together with the request it serves), never both.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::error::DnsError;
use crate::resolver::QueryJob;
use crate::wire::{self, RequestMsg};

/// Default cap on concurrent worker processes (and therefore on concurrent
/// blocking resolutions).
pub const MAX_WORKERS: usize = 4;

const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// How a worker process is launched.
///
/// The default re-executes the current binary with
/// [`crate::worker::WORKER_MODE_ARG`], which requires the embedding
/// application to call [`crate::worker::run_if_requested`] first thing in
/// `main`. Alternatively, point this at the shipped `dnspool-worker` binary
/// (tests do, via `CARGO_BIN_EXE_dnspool-worker`).
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), envs: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.envs.iter().cloned());
        command
    }
}

impl Default for WorkerCommand {
    fn default() -> Self {
        let program =
            std::env::current_exe().unwrap_or_else(|_| PathBuf::from("dnspool-worker"));
        Self {
            program,
            args: vec![OsString::from(crate::worker::WORKER_MODE_ARG)],
            envs: Vec::new(),
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrency cap. Clamped to at least 1.
    pub max_workers: usize,
    /// Bounded wait for a worker's one-byte ack after writing a request.
    pub ack_timeout: Duration,
    /// Optional deadline on an in-flight resolution. `None` (the default)
    /// lets a wedged worker hold its request forever; setting it routes the
    /// request through the transport-failure path instead.
    pub response_timeout: Option<Duration>,
    /// How to launch worker processes.
    pub worker: WorkerCommand,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: MAX_WORKERS,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            response_timeout: None,
            worker: WorkerCommand::default(),
        }
    }
}

/// Pool counters, as observed by [`crate::Resolver::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live worker processes (idle and busy).
    pub workers: usize,
    /// Workers currently idle.
    pub idle: usize,
    /// Requests queued behind a saturated pool.
    pub pending: usize,
}

/// Why a dispatch to a worker failed.
pub(crate) enum DispatchFailure {
    /// The liveness probe found the process already gone; the worker is
    /// simply discarded and the caller tries elsewhere.
    Dead,
    /// The worker looked alive but the write or the ack failed; it has been
    /// deemed unusable and should be torn down. Consumes the request's
    /// single re-dispatch budget.
    Failed(String),
}

/// Parent-side handle to one worker process.
pub(crate) struct WorkerHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    pid: u32,
}

impl WorkerHandle {
    /// Spawns a new worker with piped stdin/stdout. Process or pipe creation
    /// failure is surfaced immediately as [`DnsError::SpawnFailed`].
    fn spawn(command: &WorkerCommand) -> Result<Self, DnsError> {
        let mut child = command
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker spawned without stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker spawned without stdout pipe"))?;
        let pid = child.id().unwrap_or(0);
        Ok(Self { child, stdin, stdout, pid })
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking liveness probe: has the process already exited without
    /// us noticing?
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Writes a request and waits (bounded) for the one-byte ack.
    pub(crate) async fn dispatch(
        &mut self,
        msg: &RequestMsg,
        ack_timeout: Duration,
    ) -> Result<(), DispatchFailure> {
        if !self.is_alive() {
            return Err(DispatchFailure::Dead);
        }

        let frame = msg.encode();
        if let Err(err) = self.stdin.write_all(&frame).await {
            return Err(DispatchFailure::Failed(format!(
                "failed to write request to worker {}: {err}",
                self.pid
            )));
        }
        if let Err(err) = self.stdin.flush().await {
            return Err(DispatchFailure::Failed(format!(
                "failed to flush request to worker {}: {err}",
                self.pid
            )));
        }

        let mut ack = [0u8; 1];
        match tokio::time::timeout(ack_timeout, self.stdout.read_exact(&mut ack)).await {
            Err(_) => Err(DispatchFailure::Failed(format!(
                "worker {} did not ack within {ack_timeout:?}",
                self.pid
            ))),
            Ok(Err(err)) => Err(DispatchFailure::Failed(format!(
                "failed to read ack from worker {}: {err}",
                self.pid
            ))),
            Ok(Ok(_)) if ack[0] == wire::ACK => Ok(()),
            Ok(Ok(_)) => Err(DispatchFailure::Failed(format!(
                "worker {} sent a bad ack byte ({:#04x})",
                self.pid, ack[0]
            ))),
        }
    }

    pub(crate) fn response_stream(&mut self) -> &mut ChildStdout {
        &mut self.stdout
    }

    /// Kills and reaps the process. Closing our pipe ends alone would also
    /// make a healthy worker exit, but a wedged one needs the signal.
    pub(crate) async fn kill(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Pool state: idle workers, live count, and the pending-request FIFO.
pub(crate) struct WorkerPool {
    config: PoolConfig,
    idle: Vec<WorkerHandle>,
    workers: usize,
    pending: VecDeque<QueryJob>,
}

/// Result of an admission attempt.
pub(crate) enum Acquired {
    Worker(WorkerHandle),
    /// At the cap with nothing idle; the request must queue.
    Saturated,
}

impl WorkerPool {
    pub(crate) fn new(mut config: PoolConfig) -> Self {
        config.max_workers = config.max_workers.max(1);
        Self { config, idle: Vec::new(), workers: 0, pending: VecDeque::new() }
    }

    /// Returns an idle worker if one exists, spawns a fresh one if under the
    /// cap, or reports saturation.
    pub(crate) fn acquire_or_create(&mut self) -> Result<Acquired, DnsError> {
        if let Some(worker) = self.idle.pop() {
            return Ok(Acquired::Worker(worker));
        }
        if self.workers < self.config.max_workers {
            let worker = WorkerHandle::spawn(&self.config.worker)?;
            self.workers += 1;
            debug!(
                pid = worker.pid(),
                workers = self.workers,
                "created new resolver worker"
            );
            return Ok(Acquired::Worker(worker));
        }
        Ok(Acquired::Saturated)
    }

    pub(crate) fn push_idle(&mut self, worker: WorkerHandle) {
        self.idle.push(worker);
    }

    /// Whether an admission attempt could succeed right now (an idle worker
    /// exists, or spawn capacity remains).
    pub(crate) fn has_capacity(&self) -> bool {
        !self.idle.is_empty() || self.workers < self.config.max_workers
    }

    /// Records the teardown of a worker that is no longer tracked here.
    pub(crate) fn note_teardown(&mut self) {
        self.workers = self.workers.saturating_sub(1);
    }

    pub(crate) fn push_pending(&mut self, job: QueryJob) {
        // Requests queue only once spawn capacity is exhausted.
        debug_assert_eq!(self.workers, self.config.max_workers);
        self.pending.push_back(job);
    }

    pub(crate) fn pop_pending(&mut self) -> Option<QueryJob> {
        self.pending.pop_front()
    }

    /// Removes a queued job by query id (cancellation).
    pub(crate) fn cancel_pending(&mut self, id: u64) -> Option<QueryJob> {
        let index = self.pending.iter().position(|job| job.id == id)?;
        self.pending.remove(index)
    }

    pub(crate) fn drain_pending(&mut self) -> impl Iterator<Item = QueryJob> + '_ {
        self.pending.drain(..)
    }

    pub(crate) fn drain_idle(&mut self) -> Vec<WorkerHandle> {
        std::mem::take(&mut self.idle)
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            idle: self.idle.len(),
            pending: self.pending.len(),
        }
    }
}
