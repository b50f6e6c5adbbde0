//! Network-addressable FIFO queues shared by the server and its clients.
//!
//! The server process owns two [`LocalQueue`]s (jobs and results) and exposes
//! them over TCP through a [`QueueServer`]. Client processes open a
//! [`QueueSession`] and talk to the same queues through [`RemoteQueue`]
//! handles. Both sides only see the [`Queue`] trait, so the dispatcher and
//! the worker pool run unchanged in-process (tests) or across machines.

mod local;
pub mod protocol;
mod registry;
mod remote;
mod server;

use async_trait::async_trait;

use crate::error::Result;

pub use local::LocalQueue;
pub use registry::{LiveWorkers, WorkerRegistry};
pub use remote::{QueueSession, RemoteQueue, Routed};
pub use server::QueueServer;

/// A multi-producer, multi-consumer FIFO.
///
/// Implementations serialize access themselves; callers never hold a lock.
#[async_trait]
pub trait Queue<T: Send + 'static>: Send + Sync {
    async fn put(&self, item: T) -> Result<()>;

    /// Take the head of the queue, `Ok(None)` when it is empty.
    async fn try_get(&self) -> Result<Option<T>>;
}
