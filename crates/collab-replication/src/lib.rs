//! The replication core (module B). Wraps a stream adapter (module A) with
//! a process-local publish/deliver bus, giving every process hosting a
//! document a gap-free, loop-free view of every other process's edits.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod core;

pub use core::{BindHandle, LocalReplicationCore, ReplicationCore};

#[cfg(test)]
mod tests;
