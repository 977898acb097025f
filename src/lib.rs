//! # dnspool
//!
//! Asynchronous DNS resolution over a bounded pool of isolated worker
//! processes.
//!
//! The platform resolver (`getaddrinfo`) blocks, and a single-threaded,
//! cooperative client must never block. `dnspool` pushes every blocking
//! lookup into a small child process that talks to the parent over a pipe
//! pair with a fixed binary protocol, so the parent only ever performs
//! non-blocking reads and bounded-wait writes. Process isolation is the
//! point: a lookup that wedges inside the C library wedges one disposable
//! child, never the caller.
//!
//! ## Behavior
//!
//! - **Bounded concurrency**: at most `max_workers` (default 4) children are
//!   alive at once; further requests queue FIFO and are pipelined onto
//!   workers as they finish.
//! - **Fast path**: literal IP addresses resolve synchronously in-process.
//! - **Self-cleaning**: an idle worker exits on its own after 40 seconds; a
//!   worker that breaks its pipe is torn down and lazily replaced.
//! - **One failure path**: resolver errors, transport failures, and spawn
//!   failures all surface through the same query result.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dnspool::{PoolConfig, Resolver};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Lets re-executed children enter worker mode; no-op otherwise.
//!     dnspool::worker::run_if_requested();
//!
//!     let resolver = Resolver::new(PoolConfig::default());
//!     let addrs = resolver.resolve("example.com", 443).await.unwrap();
//!     for addr in addrs {
//!         println!("resolved: {addr}");
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`resolver`] - the public API: [`Resolver`] and [`Query`]
//! - [`pool`] - pool configuration and counters
//! - [`worker`] - the worker-mode entry points (child-process side)
//! - [`wire`] - the pipe protocol
//! - [`error`] - error definitions

pub mod error;
pub mod pool;
pub mod resolver;
pub mod wire;
pub mod worker;

mod dispatch;

pub use error::DnsError;
pub use pool::{PoolConfig, PoolStats, WorkerCommand, MAX_WORKERS};
pub use resolver::{Query, Resolver};
