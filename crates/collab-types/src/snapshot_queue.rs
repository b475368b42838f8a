//! The snapshot queue contract (module D). A deduplicated, throttled,
//! delayed-work set keyed by `DocId`. Lives here, rather than beside the
//! snapshot worker, so the CRDT session can schedule work into it without
//! creating a dependency cycle (the worker crate already depends on the
//! CRDT crate for replica rebuilds).

use async_trait::async_trait;

use crate::error::ClResult;
use crate::model::DocId;

#[async_trait]
pub trait SnapshotQueue: Send + Sync {
	/// Insert `doc_id` with score `now + delay_ms` only if not already
	/// present. Returns `true` if newly inserted, `false` if a job for
	/// that `DocId` already existed. Never updates an existing score.
	async fn enqueue(&self, doc_id: &DocId, delay_ms: i64) -> ClResult<bool>;

	/// Atomically: find the lowest-scored member whose score <= `now`; if
	/// one exists, raise its score to `now + processing_ttl_ms` and return
	/// its id. `None` if none ready. Must be atomic against concurrent
	/// workers (server-side script or equivalent compare-and-set loop).
	async fn claim(&self, now: i64, processing_ttl_ms: i64) -> ClResult<Option<DocId>>;

	/// Remove the member. Idempotent.
	async fn complete(&self, doc_id: &DocId) -> ClResult<()>;

	/// Move the member's score to `now + delay_ms`. Used on failure; keeps
	/// the job in the queue so another attempt occurs later.
	async fn postpone(&self, doc_id: &DocId, delay_ms: i64) -> ClResult<()>;
}
