//! Process-wide shared state: the injected `SessionRegistry` of live
//! `DocActor`s plus the adapters every handler needs. Built once at startup
//! by `Builder` and cloned cheaply (everything inside is an `Arc`) into
//! every request/connection task, so tests can instantiate independent
//! stacks per test case (§9 design note).

use std::sync::Arc;

use collab_crdt::DocActor;
use collab_replication::{BindHandle, ReplicationCore};
use collab_types::prelude::*;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::metadata_client::MetadataClient;

struct BoundDoc {
	actor: Arc<DocActor>,
	bind: BindHandle,
}

#[derive(Clone)]
pub struct AppState {
	pub config: Arc<Config>,
	pub replication: Arc<dyn ReplicationCore>,
	pub snapshot_queue: Arc<dyn SnapshotQueue>,
	pub metadata: Arc<MetadataClient>,
	/// Cancelled once during graceful shutdown; every open connection's
	/// select loop watches it and closes with a normal-closure code.
	pub shutdown: CancellationToken,
	docs: Arc<DashMap<DocId, BoundDoc>>,
}

impl AppState {
	pub fn new(
		config: Arc<Config>,
		replication: Arc<dyn ReplicationCore>,
		snapshot_queue: Arc<dyn SnapshotQueue>,
		metadata: Arc<MetadataClient>,
		shutdown: CancellationToken,
	) -> Self {
		Self { config, replication, snapshot_queue, metadata, shutdown, docs: Arc::new(DashMap::new()) }
	}

	/// Returns the actor for `doc_id`, binding a fresh one against the
	/// replication core if this is the first connection to reach it on this
	/// process.
	pub async fn get_or_bind(&self, doc_id: &DocId) -> ClResult<Arc<DocActor>> {
		if let Some(bound) = self.docs.get(doc_id) {
			return Ok(bound.actor.clone());
		}

		let actor = DocActor::new(
			doc_id.clone(),
			self.replication.clone(),
			self.snapshot_queue.clone(),
			self.config.snapshot_throttle_ms,
		);
		let bind = actor.bind().await?;

		// Another connection may have raced us to bind the same doc. Only
		// one bind may survive per `DocId`: stop ours and keep theirs if we
		// lost, so there is never more than one replication tail running
		// for the same document on this process.
		use dashmap::mapref::entry::Entry;
		match self.docs.entry(doc_id.clone()) {
			Entry::Occupied(existing) => {
				bind.stop();
				Ok(existing.get().actor.clone())
			}
			Entry::Vacant(slot) => {
				slot.insert(BoundDoc { actor: actor.clone(), bind });
				Ok(actor)
			}
		}
	}

	/// Removes the doc from the registry if it has no connections left,
	/// stops its replication bind, and enqueues one final snapshot job.
	/// Idempotent; safe to call from multiple connection-close paths
	/// racing each other.
	pub async fn evict_if_idle(&self, doc_id: &DocId) {
		// Check-and-remove under a single occupied entry so a connection
		// racing in via `get_or_bind` can't register itself on the actor
		// between the idle check and the removal: `entry()` holds the
		// shard's write lock for both steps.
		use dashmap::mapref::entry::Entry;
		let bound = match self.docs.entry(doc_id.clone()) {
			Entry::Occupied(entry) if entry.get().actor.conn_count() == 0 => Some(entry.remove()),
			_ => None,
		};
		let Some(bound) = bound else { return };
		bound.bind.stop();
		if let Err(e) = self.snapshot_queue.enqueue(doc_id, 0).await {
			warn!("failed to enqueue final snapshot for {}: {}", doc_id, e);
		}
	}

	/// Enqueues one final snapshot job for every document still bound in
	/// this process's registry, regardless of whether it still has live
	/// connections. Called once during graceful shutdown so an actively
	/// edited document isn't left without a snapshot past the last update
	/// this process observed.
	pub async fn flush_warm_docs(&self) {
		let doc_ids: Vec<DocId> = self.docs.iter().map(|entry| entry.key().clone()).collect();
		for doc_id in doc_ids {
			if let Err(e) = self.snapshot_queue.enqueue(&doc_id, 0).await {
				warn!("failed to enqueue shutdown snapshot for {}: {}", doc_id, e);
			}
		}
	}
}
