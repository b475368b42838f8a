//! The stream adapter contract (module A). An append-only log per document
//! on a shared store, with ordered range reads and an own-origin-filtering
//! tailing subscription.
//!
//! Concrete backends live in separate adapter crates, mirroring the split
//! between a shared adapter trait crate and per-backend adapter crates used
//! throughout the rest of the workspace.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

use std::pin::Pin;

use async_trait::async_trait;
use collab_types::prelude::*;
use tokio_stream::Stream;

/// Handle returned by `subscribe`. Dropping it or calling `stop()` causes
/// the tailer to stop before its next delivery.
#[derive(Clone)]
pub struct StopHandle(tokio_util::sync::CancellationToken);

impl StopHandle {
	pub fn new() -> (Self, tokio_util::sync::CancellationToken) {
		let token = tokio_util::sync::CancellationToken::new();
		(Self(token.clone()), token)
	}

	pub fn stop(&self) {
		self.0.cancel();
	}
}

/// Append-only per-document log, shared across every process hosting a
/// document. No single process owns the stream.
#[async_trait]
pub trait StreamAdapter: Send + Sync {
	/// Durable append; approximate trim to the configured `MAX_LEN`.
	/// Fails with `Error::StoreUnavailable` only on transport error.
	async fn append(
		&self,
		doc_id: &DocId,
		payload: Update,
		origin_server_id: &ServerId,
	) -> ClResult<EntryId>;

	/// Entries strictly after `after_id`, ascending, up to `limit`.
	/// `EntryId::beginning()` means "from the start". Finite: the caller
	/// tracks its own cursor across calls.
	async fn range(&self, doc_id: &DocId, after_id: &EntryId, limit: usize) -> ClResult<Vec<StreamEntry>>;

	/// Starts a long-running tailer delivering entries with id > `from_id`
	/// in order. `EntryId::tail()` starts from the current tail. Entries
	/// whose `origin_server_id` equals this adapter's configured server id
	/// are filtered out. Transient errors are retried with bounded backoff
	/// internally and never terminate the subscription.
	fn subscribe(
		&self,
		doc_id: DocId,
		from_id: EntryId,
	) -> (Pin<Box<dyn Stream<Item = StreamEntry> + Send>>, StopHandle);
}

// vim: ts=4
