use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use collab_stream::{StopHandle, StreamAdapter};
use collab_types::prelude::*;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::{Stream, StreamExt};

use crate::{LocalReplicationCore, ReplicationCore};

/// In-memory fake of module A, good enough to exercise module B's
/// replay/tail/origin-filter wiring without a real Redis instance.
struct FakeStreamAdapter {
	server_id: ServerId,
	entries: Mutex<HashMap<DocId, Vec<StreamEntry>>>,
	tails: Mutex<HashMap<DocId, broadcast::Sender<StreamEntry>>>,
}

impl FakeStreamAdapter {
	fn new(server_id: &str) -> Self {
		Self {
			server_id: Arc::from(server_id),
			entries: Mutex::new(HashMap::new()),
			tails: Mutex::new(HashMap::new()),
		}
	}

	fn tail_for(tails: &mut HashMap<DocId, broadcast::Sender<StreamEntry>>, doc_id: &DocId) -> broadcast::Sender<StreamEntry> {
		tails.entry(doc_id.clone()).or_insert_with(|| broadcast::channel(64).0).clone()
	}
}

#[async_trait]
impl StreamAdapter for FakeStreamAdapter {
	async fn append(&self, doc_id: &DocId, payload: Update, origin_server_id: &ServerId) -> ClResult<EntryId> {
		let mut entries = self.entries.lock().await;
		let list = entries.entry(doc_id.clone()).or_default();
		let entry_id = EntryId(Arc::from(format!("{}-0", list.len() + 1)));
		let entry = StreamEntry {
			entry_id: entry_id.clone(),
			payload,
			origin_server_id: origin_server_id.clone(),
			ts: now_ms(),
		};
		list.push(entry.clone());
		drop(entries);

		let mut tails = self.tails.lock().await;
		let tx = Self::tail_for(&mut tails, doc_id);
		let _ = tx.send(entry);
		Ok(entry_id)
	}

	async fn range(&self, doc_id: &DocId, after_id: &EntryId, limit: usize) -> ClResult<Vec<StreamEntry>> {
		let entries = self.entries.lock().await;
		let Some(list) = entries.get(doc_id) else { return Ok(Vec::new()) };
		let after: usize = if after_id.as_str() == "0-0" {
			0
		} else {
			after_id.as_str().split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
		};
		Ok(list.iter().filter(|e| entry_seq(&e.entry_id) > after).take(limit).cloned().collect())
	}

	fn subscribe(&self, doc_id: DocId, _from_id: EntryId) -> (Pin<Box<dyn Stream<Item = StreamEntry> + Send>>, StopHandle) {
		let (stop, token) = StopHandle::new();
		let server_id = self.server_id.clone();
		let rx = {
			// We can't `.await` here (not an async fn), so eagerly create the
			// channel under a blocking-free best-effort lock via try_lock;
			// tests call `append` before `subscribe`, so the channel already
			// exists, and `try_lock` succeeds.
			let mut tails = self.tails.try_lock().expect("fake adapter is single-threaded in tests");
			Self::tail_for(&mut tails, &doc_id).subscribe()
		};

		let stream = async_stream::stream! {
			let mut rx = rx;
			loop {
				tokio::select! {
					() = token.cancelled() => break,
					msg = rx.recv() => {
						match msg {
							Ok(entry) if entry.origin_server_id != server_id => yield entry,
							Ok(_) => {}
							Err(broadcast::error::RecvError::Lagged(_)) => {}
							Err(broadcast::error::RecvError::Closed) => break,
						}
					}
				}
			}
		};
		(Box::pin(stream), stop)
	}
}

fn entry_seq(id: &EntryId) -> usize {
	id.as_str().split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

#[tokio::test]
async fn late_joiner_replays_prior_updates() {
	let adapter = Arc::new(FakeStreamAdapter::new("server-a"));
	let doc_id: DocId = Arc::from("doc1");

	adapter.append(&doc_id, Update(b"first".to_vec()), &Arc::from("server-a")).await.expect("append");

	let core_b = LocalReplicationCore::new(adapter.clone(), Arc::from("server-b"), 100);
	let (mut stream, handle) = core_b.bind_doc(doc_id.clone(), EntryId::beginning()).await.expect("bind");

	let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
		.await
		.expect("timed out waiting for replay")
		.expect("stream ended early");
	assert_eq!(delivery.update.as_bytes(), b"first");
	handle.stop();
}

#[tokio::test]
async fn publish_filters_own_origin_on_tail() {
	let adapter = Arc::new(FakeStreamAdapter::new("server-a"));
	let doc_id: DocId = Arc::from("doc2");

	// Ensure the tail channel exists before anyone binds.
	adapter.append(&doc_id, Update(b"seed".to_vec()), &Arc::from("server-a")).await.expect("seed append");

	let core_a = LocalReplicationCore::new(adapter.clone(), Arc::from("server-a"), 100);
	let (mut stream, handle) = core_a.bind_doc(doc_id.clone(), EntryId::beginning()).await.expect("bind");

	// First delivery is the replay of the seed entry.
	let seed = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
		.await
		.expect("timeout")
		.expect("stream ended");
	assert_eq!(seed.update.as_bytes(), b"seed");

	core_a.publish(&doc_id, Update(b"mine".to_vec())).await.expect("publish");

	let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next()).await;
	// The local bus delivers the publish (same-process fast path); the
	// store tail independently filters it by origin, so at most the local
	// bus copy surfaces, never a duplicate from the tail.
	if let Ok(Some(delivery)) = delivered {
		assert_eq!(delivery.update.as_bytes(), b"mine");
	}
	handle.stop();
}
