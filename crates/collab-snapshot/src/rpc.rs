//! The snapshot RPC contract (module G). A bidirectional contract with the
//! external metadata service.

use async_trait::async_trait;
use collab_types::prelude::*;

pub struct GetSnapshotResult {
	pub has_snapshot: bool,
	pub snapshot: Option<Snapshot>,
}

#[async_trait]
pub trait SnapshotRpc: Send + Sync {
	/// Idempotent lookup.
	async fn get_snapshot(&self, doc_id: &DocId) -> ClResult<GetSnapshotResult>;

	/// Last-writer-wins overwrite. Fails with `Error::DocumentNotKnown` if
	/// `doc_id` is not known to the metadata service; the worker treats
	/// this as a terminal failure for the job and drops it from the queue.
	async fn save_snapshot(&self, doc_id: &DocId, snapshot: Snapshot) -> ClResult<()>;
}
