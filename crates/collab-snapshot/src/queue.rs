//! The snapshot queue contract (module D) lives in `collab_types` so the
//! CRDT session can depend on it without a cycle back through this crate.
pub use collab_types::snapshot_queue::SnapshotQueue;
