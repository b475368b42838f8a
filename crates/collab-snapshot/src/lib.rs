//! The snapshot queue (module D) and snapshot worker (module E): a
//! deduplicated, throttled job queue and the long-running loop that drains
//! it by rebuilding a document's full state from (last snapshot + stream
//! tail) and persisting it through the snapshot RPC.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod queue;
mod rpc;
mod worker;

pub use queue::SnapshotQueue;
pub use rpc::{GetSnapshotResult, SnapshotRpc};
pub use worker::{run_worker, WorkerHandle};

// vim: ts=4
