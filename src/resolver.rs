//! Public resolution API and the pool manager task.
//!
//! [`Resolver`] is a cheap-to-clone handle; all pool state lives in a single
//! manager task that owns the [`WorkerPool`] outright, so every mutation of
//! `idle` / live-count / `pending` happens on one execution context with no
//! locking. The manager never blocks: dispatching waits only for the bounded
//! ack, and responses are awaited through a `FuturesUnordered` of in-flight
//! reads driven by the same task.
//!
//! Admission control: literal IP addresses complete synchronously with no
//! worker involved; otherwise a request goes to an idle worker, to a freshly
//! spawned one while the pool is under its cap, or onto the pending FIFO.
//! Concurrent *blocking* resolutions are therefore capped at
//! `PoolConfig::max_workers` while outstanding *logical* requests are not:
//! the queue is the subsystem's backpressure.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::dispatch::{self, Completion, Response};
use crate::error::DnsError;
use crate::pool::{Acquired, DispatchFailure, PoolConfig, PoolStats, WorkerHandle, WorkerPool};
use crate::wire::RequestMsg;

type QueryResult = Result<Vec<SocketAddr>, DnsError>;

/// One submitted resolution, from admission until its completion fires.
/// Completed exactly once, with addresses, an error, or a shutdown notice;
/// never silently dropped (dropping the `done` sender wakes the caller with
/// [`DnsError::ShutDown`]).
pub(crate) struct QueryJob {
    pub(crate) id: u64,
    pub(crate) msg: RequestMsg,
    pub(crate) done: oneshot::Sender<QueryResult>,
    /// Whether the single transparent re-dispatch after a dispatch-phase
    /// transport failure has been spent.
    redispatched: bool,
}

enum Command {
    Resolve(QueryJob),
    Cancel(u64),
    Stats(oneshot::Sender<PoolStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the resolution subsystem.
///
/// Created with [`Resolver::new`] inside a tokio runtime. Clones share the
/// same worker pool. Dropping the last clone shuts the pool down.
#[derive(Clone)]
pub struct Resolver {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl Resolver {
    /// Starts the manager task for a new worker pool.
    ///
    /// Must be called within a tokio runtime. Workers themselves are spawned
    /// lazily, on the first query that needs one.
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Manager::new(config, rx).run());
        Self { tx, next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Submits a resolution of `host` (with `port` carried through to the
    /// resolved addresses) and returns the [`Query`] future for its result.
    ///
    /// Literal IP addresses ("127.0.0.1", "::1") complete synchronously
    /// without touching the pool. Hostnames longer than 511 bytes are
    /// truncated. Dropping the returned `Query` cancels the request
    /// (best-effort, see [`Resolver::cancel`]).
    pub fn resolve(&self, host: &str, port: u16) -> Query {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = oneshot::channel();

        let trimmed = host.trim();
        if trimmed.is_empty() {
            let _ = done.send(Err(DnsError::InvalidHostname));
        } else if let Ok(ip) = trimmed.parse::<IpAddr>() {
            // Fast path: no worker, no queueing.
            debug!(host = %trimmed, "resolved literal address in-process");
            let _ = done.send(Ok(vec![SocketAddr::new(ip, port)]));
        } else {
            let job = QueryJob {
                id,
                msg: RequestMsg::new(trimmed, port),
                done,
                redispatched: false,
            };
            // If the manager is gone the job is dropped here, which wakes
            // the query with `ShutDown`.
            let _ = self.tx.send(Command::Resolve(job));
        }

        Query { id, rx, tx: self.tx.clone(), completed: false }
    }

    /// Cancels a query: removed from the pending queue if still waiting for
    /// admission; if already dispatched, the worker's response is still
    /// drained (to keep the pipe framed) and the result discarded.
    pub fn cancel(&self, query: &Query) {
        let _ = self.tx.send(Command::Cancel(query.id));
    }

    /// Current pool counters. Mostly useful for tests and introspection.
    pub async fn stats(&self) -> PoolStats {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Stats(tx)).is_err() {
            return PoolStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Shuts the pool down: idle workers are killed, queued requests fail
    /// with [`DnsError::ShutDown`], in-flight workers are reaped.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Future for one submitted resolution.
///
/// Resolves to the ordered address list on success. Dropping it before
/// completion cancels the query (best-effort).
pub struct Query {
    id: u64,
    rx: oneshot::Receiver<QueryResult>,
    tx: mpsc::UnboundedSender<Command>,
    completed: bool,
}

impl Query {
    /// Identifier for this query, unique per [`Resolver`].
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for Query {
    type Output = QueryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.completed = true;
                Poll::Ready(result.unwrap_or_else(|_| Err(DnsError::ShutDown)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self.tx.send(Command::Cancel(self.id));
        }
    }
}

type InflightFuture = Pin<Box<dyn Future<Output = Completion> + Send>>;

/// The single task that owns all pool state.
struct Manager {
    pool: WorkerPool,
    rx: mpsc::UnboundedReceiver<Command>,
    inflight: FuturesUnordered<InflightFuture>,
    ack_timeout: Duration,
    response_timeout: Option<Duration>,
}

impl Manager {
    fn new(config: PoolConfig, rx: mpsc::UnboundedReceiver<Command>) -> Self {
        let ack_timeout = config.ack_timeout;
        let response_timeout = config.response_timeout;
        Self {
            pool: WorkerPool::new(config),
            rx,
            inflight: FuturesUnordered::new(),
            ack_timeout,
            response_timeout,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Resolve(job)) => self.dispatch_job(job, None).await,
                    Some(Command::Cancel(id)) => self.cancel(id),
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.pool.stats());
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown_all().await;
                        let _ = reply.send(());
                        return;
                    }
                    // All resolver handles dropped.
                    None => {
                        self.shutdown_all().await;
                        return;
                    }
                },
                Some(completion) = self.inflight.next() => {
                    self.complete(completion).await;
                }
            }
        }
    }

    /// Admission: idle worker, fresh spawn, or the pending queue. Dead idle
    /// workers found on the way are discarded; a dispatch failure on a
    /// live-looking worker spends the job's single re-dispatch before the
    /// failure is surfaced.
    async fn dispatch_job(&mut self, mut job: QueryJob, mut worker: Option<WorkerHandle>) {
        loop {
            let mut current = match worker.take() {
                Some(current) => current,
                None => match self.pool.acquire_or_create() {
                    Ok(Acquired::Worker(current)) => current,
                    Ok(Acquired::Saturated) => {
                        debug!(host = %job.msg.hostname, id = job.id, "query queued: pool saturated");
                        self.pool.push_pending(job);
                        return;
                    }
                    Err(err) => {
                        warn!(host = %job.msg.hostname, %err, "cannot create resolver worker");
                        let _ = job.done.send(Err(err));
                        return;
                    }
                },
            };

            match current.dispatch(&job.msg, self.ack_timeout).await {
                Ok(()) => {
                    debug!(
                        host = %job.msg.hostname,
                        id = job.id,
                        pid = current.pid(),
                        "request dispatched to worker"
                    );
                    self.inflight.push(Box::pin(dispatch::await_job(
                        current,
                        job,
                        self.response_timeout,
                    )));
                    return;
                }
                Err(DispatchFailure::Dead) => {
                    debug!(pid = current.pid(), "worker no longer exists, discarding");
                    current.kill().await;
                    self.pool.note_teardown();
                }
                Err(DispatchFailure::Failed(reason)) => {
                    warn!(pid = current.pid(), %reason, "worker failed dispatch, killing it");
                    current.kill().await;
                    self.pool.note_teardown();
                    if job.redispatched {
                        let _ = job.done.send(Err(DnsError::WorkerTransport(reason)));
                        return;
                    }
                    job.redispatched = true;
                }
            }
        }
    }

    /// Completion: deliver the result, then recycle or tear down the worker.
    async fn complete(&mut self, completion: Completion) {
        let Completion { worker, job, response } = completion;
        match response {
            Response::Addresses(addrs) => {
                debug!(
                    host = %job.msg.hostname,
                    id = job.id,
                    count = addrs.len(),
                    "query resolved"
                );
                let _ = job.done.send(Ok(addrs));
                self.release(worker).await;
            }
            Response::Failure(code) => {
                let err = DnsError::resolution(&job.msg.hostname, code);
                debug!(host = %job.msg.hostname, id = job.id, code, "resolver reported failure");
                let _ = job.done.send(Err(err));
                self.release(worker).await;
            }
            Response::Transport(reason) => {
                warn!(pid = worker.pid(), %reason, "response stream broke, tearing worker down");
                let _ = job.done.send(Err(DnsError::WorkerTransport(reason)));
                worker.kill().await;
                self.pool.note_teardown();
                // The teardown freed a slot; queued requests may now admit
                // (spawning replacements lazily).
                self.pump_pending().await;
            }
        }
    }

    /// Re-admits queued requests while spawn capacity remains. Run after
    /// anything that frees a slot, so a queued request can fail terminally
    /// (spent re-dispatch budget, spawn failure) without stranding the
    /// requests behind it: the queue stays non-empty only while the pool is
    /// saturated.
    async fn pump_pending(&mut self) {
        while self.pool.has_capacity() {
            match self.pool.pop_pending() {
                Some(job) => self.dispatch_job(job, None).await,
                None => return,
            }
        }
    }

    /// Recycling: a queued request is pipelined straight onto the worker
    /// that just finished; it never appears idle in between.
    async fn release(&mut self, worker: WorkerHandle) {
        match self.pool.pop_pending() {
            Some(job) => {
                debug!(
                    host = %job.msg.hostname,
                    id = job.id,
                    pid = worker.pid(),
                    "processing queued query on released worker"
                );
                self.dispatch_job(job, Some(worker)).await;
                // If the dispatch tore workers down instead, the freed slots
                // must not strand the rest of the queue.
                self.pump_pending().await;
            }
            None => self.pool.push_idle(worker),
        }
    }

    fn cancel(&mut self, id: u64) {
        if let Some(job) = self.pool.cancel_pending(id) {
            debug!(host = %job.msg.hostname, id, "cancelled queued query");
            let _ = job.done.send(Err(DnsError::Cancelled));
        }
        // If the query is in flight its response is still drained by the
        // dispatch future; the result send just becomes a no-op because the
        // receiver is gone.
    }

    async fn shutdown_all(&mut self) {
        let pending: Vec<QueryJob> = self.pool.drain_pending().collect();
        for job in pending {
            let _ = job.done.send(Err(DnsError::ShutDown));
        }
        for worker in self.pool.drain_idle() {
            worker.kill().await;
            self.pool.note_teardown();
        }
        // In-flight futures are dropped with the manager; their workers are
        // reaped via kill-on-drop and their queries wake with `ShutDown`.
        self.inflight.clear();
    }
}
