//! Per-document CRDT session (module C): the in-memory replica, the set of
//! bound connections, awareness, and the glue between local edits and the
//! replication core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use collab_replication::ReplicationCore;
use collab_types::prelude::*;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Origin, ReadTxn, Subscription, Transact};

use crate::awareness::{AwarenessState, ClientId};
use crate::protocol::{SyncPayload, WireMessage};
use crate::replica;

pub type ConnId = u64;

/// Origin tag applied to transactions that apply a remotely-delivered
/// update, so the update observer can tell them apart from locally
/// originated edits without re-publishing them.
const REMOTE_ORIGIN: &[u8] = b"__collab_remote__";

struct ConnEntry {
	tx: mpsc::UnboundedSender<Vec<u8>>,
	awareness_ids: Mutex<Vec<ClientId>>,
}

/// Per-`DocId` actor. All mutations to `doc` are serialized by the single
/// `yrs::Doc` transaction API; concurrent callers simply queue behind it.
pub struct DocActor {
	doc_id: DocId,
	doc: Doc,
	conns: DashMap<ConnId, ConnEntry>,
	awareness: Mutex<AwarenessState>,
	replication: Arc<dyn ReplicationCore>,
	snapshot_queue: Arc<dyn SnapshotQueue>,
	snapshot_throttle_ms: i64,
	next_conn_id: AtomicU64,
	// Kept alive for the lifetime of the actor; dropping it would
	// unsubscribe the update observer below.
	_update_sub: Subscription,
}

impl DocActor {
	pub fn new(
		doc_id: DocId,
		replication: Arc<dyn ReplicationCore>,
		snapshot_queue: Arc<dyn SnapshotQueue>,
		snapshot_throttle_ms: i64,
	) -> Arc<Self> {
		Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
			let doc = Doc::new();
			let observer_weak = weak.clone();
			let update_sub = doc.observe_update_v1(move |txn, event| {
				let Some(this) = observer_weak.upgrade() else { return };
				this.on_update(txn.origin(), event.update.clone());
			});

			Self {
				doc_id,
				doc,
				conns: DashMap::new(),
				awareness: Mutex::new(AwarenessState::new()),
				replication,
				snapshot_queue,
				snapshot_throttle_ms,
				next_conn_id: AtomicU64::new(1),
				_update_sub: update_sub,
			}
		})
	}

	pub fn doc_id(&self) -> &DocId {
		&self.doc_id
	}

	pub fn conn_count(&self) -> usize {
		self.conns.len()
	}

	/// Starts tailing the replication core for this document. Remote
	/// deliveries are applied under the `REMOTE_ORIGIN` tag so the update
	/// observer broadcasts them locally without re-publishing.
	pub async fn bind(self: &Arc<Self>) -> ClResult<collab_replication::BindHandle> {
		let (mut deliveries, handle) =
			self.replication.bind_doc(self.doc_id.clone(), EntryId::beginning()).await?;
		let this = self.clone();
		tokio::spawn(async move {
			while let Some(delivery) = deliveries.next().await {
				let update = match yrs::Update::decode_v1(delivery.update.as_bytes()) {
					Ok(update) => update,
					Err(e) => {
						warn!("discarding corrupt remote update for {}: {}", this.doc_id, e);
						continue;
					}
				};
				let mut txn = this.doc.transact_mut_with(Origin::from(REMOTE_ORIGIN));
				if let Err(e) = txn.apply_update(update) {
					warn!("failed to apply remote update for {}: {:?}", this.doc_id, e);
				}
			}
			debug!("replication tail ended for {}", this.doc_id);
		});
		Ok(handle)
	}

	/// Registers a new connection. Returns its id and the receiver side of
	/// its outgoing frame channel (the gateway forwards these to the
	/// WebSocket). Sends the initial `SYNC/step1` and, if non-empty, the
	/// full awareness state, per the connection-open sequence.
	pub fn register_conn(&self) -> (ConnId, mpsc::UnboundedReceiver<Vec<u8>>) {
		let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::unbounded_channel();

		let step1 = {
			let txn = self.doc.transact();
			txn.state_vector().encode_v1()
		};
		let _ = tx.send(WireMessage::Sync(SyncPayload::Step1(step1)).encode());

		let awareness = self.awareness.lock().unwrap_or_else(|e| e.into_inner());
		if !awareness.is_empty() {
			let _ = tx.send(WireMessage::Awareness(awareness.encode_full()).encode());
		}
		drop(awareness);

		self.conns.insert(conn_id, ConnEntry { tx, awareness_ids: Mutex::new(Vec::new()) });
		(conn_id, rx)
	}

	/// Removes a connection, clears its owned awareness ids (broadcasting
	/// the removal to the remaining connections), and reports whether the
	/// document is now idle (no connections left).
	pub fn unregister_conn(&self, conn_id: ConnId) -> bool {
		if let Some((_, entry)) = self.conns.remove(&conn_id) {
			let ids = entry.awareness_ids.lock().unwrap_or_else(|e| e.into_inner()).clone();
			if !ids.is_empty() {
				let removal = {
					let mut awareness = self.awareness.lock().unwrap_or_else(|e| e.into_inner());
					awareness.remove_clients(&ids)
				};
				if let Some(bytes) = removal {
					self.broadcast(WireMessage::Awareness(bytes).encode(), None);
				}
			}
		}
		self.conns.is_empty()
	}

	/// Handles one incoming frame from `conn_id`. Returns nothing: sync
	/// replies and broadcasts are delivered via the connections' own
	/// channels (including, for a `step1` request, a direct reply).
	pub fn handle_incoming(&self, conn_id: ConnId, frame: &[u8]) -> ClResult<()> {
		match WireMessage::decode(frame)? {
			WireMessage::Sync(SyncPayload::Step1(their_sv)) => {
				let state_vector = yrs::StateVector::decode_v1(&their_sv)
					.map_err(|e| Error::InvalidMessage(format!("bad state vector: {e}")))?;
				let reply = {
					let txn = self.doc.transact();
					txn.encode_state_as_update_v1(&state_vector)
				};
				if !reply.is_empty() {
					self.send_to(conn_id, WireMessage::Sync(SyncPayload::Step2(reply)).encode());
				}
			}
			WireMessage::Sync(SyncPayload::Step2(bytes) | SyncPayload::Update(bytes)) => {
				let update = yrs::Update::decode_v1(&bytes)
					.map_err(|e| Error::InvalidMessage(format!("bad update: {e}")))?;
				let origin = Origin::from(conn_id.to_be_bytes().to_vec());
				let mut txn = self.doc.transact_mut_with(origin);
				txn.apply_update(update)
					.map_err(|e| Error::InvalidMessage(format!("apply failed: {e:?}")))?;
			}
			WireMessage::Awareness(bytes) => {
				let touched = {
					let mut awareness = self.awareness.lock().unwrap_or_else(|e| e.into_inner());
					awareness.apply_update(&bytes)
				};
				if let Some(ids) = touched {
					if let Some(entry) = self.conns.get(&conn_id) {
						let mut owned = entry.awareness_ids.lock().unwrap_or_else(|e| e.into_inner());
						for id in ids {
							if !owned.contains(&id) {
								owned.push(id);
							}
						}
					}
					self.broadcast(WireMessage::Awareness(bytes).encode(), Some(conn_id));
				}
			}
		}
		Ok(())
	}

	/// Snapshot of the current replica, for a graceful-shutdown flush or an
	/// on-demand rebuild seed.
	pub fn encode_snapshot(&self) -> Snapshot {
		replica::encode_full(&self.doc)
	}

	fn send_to(&self, conn_id: ConnId, frame: Vec<u8>) {
		if let Some(entry) = self.conns.get(&conn_id) {
			if entry.tx.send(frame).is_err() {
				drop(entry);
				self.conns.remove(&conn_id);
			}
		}
	}

	fn broadcast(&self, frame: Vec<u8>, except: Option<ConnId>) {
		let mut dead = Vec::new();
		for entry in &self.conns {
			if Some(*entry.key()) == except {
				continue;
			}
			if entry.value().tx.send(frame.clone()).is_err() {
				dead.push(*entry.key());
			}
		}
		for conn_id in dead {
			self.conns.remove(&conn_id);
		}
	}

	/// Invoked by the `yrs` update observer on every committed transaction,
	/// whether it originated from a client's sync message or from a
	/// remote delivery applied by `bind`.
	fn on_update(&self, origin: Option<&Origin>, update_bytes: Vec<u8>) {
		let frame = WireMessage::Sync(SyncPayload::Update(update_bytes.clone())).encode();

		match origin.map(Origin::as_ref) {
			Some(bytes) if bytes == REMOTE_ORIGIN => {
				// Remote delivery: broadcast only, never re-publish or
				// re-schedule (the originating server already did both).
				self.broadcast(frame, None);
			}
			Some(bytes) => {
				let except = <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes);
				self.broadcast(frame, except);
				self.schedule_local_edit(update_bytes);
			}
			None => {
				// No origin tag: treat as local (e.g. server-side mutation
				// outside the sync handler). Conservative default: publish
				// and schedule a snapshot, same as a client edit.
				self.broadcast(frame, None);
				self.schedule_local_edit(update_bytes);
			}
		}
	}

	/// Publishes a locally originated update to the replication core and
	/// schedules a throttled snapshot rebuild for this document. Both are
	/// best-effort: failures are logged, never propagated, since the
	/// triggering transaction has already committed.
	fn schedule_local_edit(&self, update_bytes: Vec<u8>) {
		let replication = self.replication.clone();
		let snapshot_queue = self.snapshot_queue.clone();
		let doc_id = self.doc_id.clone();
		let throttle_ms = self.snapshot_throttle_ms;
		tokio::spawn(async move {
			if let Err(e) = replication.publish(&doc_id, Update(update_bytes)).await {
				warn!("failed to publish update for {}: {}", doc_id, e);
			}
			if let Err(e) = snapshot_queue.enqueue(&doc_id, throttle_ms).await {
				warn!("failed to enqueue snapshot job for {}: {}", doc_id, e);
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use std::pin::Pin;

	use async_trait::async_trait;
	use collab_replication::BindHandle;
	use tokio_stream::Stream;
	use yrs::Map;

	use super::*;

	/// `publish` is a no-op; `bind_doc` is never exercised by these tests
	/// (they register connections directly), so it just errors.
	struct FakeReplicationCore;

	#[async_trait]
	impl ReplicationCore for FakeReplicationCore {
		async fn publish(&self, _doc_id: &DocId, _update: Update) -> ClResult<()> {
			Ok(())
		}

		async fn bind_doc(
			&self,
			_doc_id: DocId,
			_last_known_id: EntryId,
		) -> ClResult<(Pin<Box<dyn Stream<Item = Delivery> + Send>>, BindHandle)> {
			Err(Error::Internal("bind_doc not exercised by this fake".into()))
		}

		async fn shutdown(&self) {}
	}

	/// No-op fake; these tests only assert on broadcast/reply framing, never
	/// on what gets scheduled into the snapshot queue.
	struct FakeSnapshotQueue;

	#[async_trait]
	impl SnapshotQueue for FakeSnapshotQueue {
		async fn enqueue(&self, _doc_id: &DocId, _delay_ms: i64) -> ClResult<bool> {
			Ok(true)
		}

		async fn claim(&self, _now: i64, _processing_ttl_ms: i64) -> ClResult<Option<DocId>> {
			Ok(None)
		}

		async fn complete(&self, _doc_id: &DocId) -> ClResult<()> {
			Ok(())
		}

		async fn postpone(&self, _doc_id: &DocId, _delay_ms: i64) -> ClResult<()> {
			Ok(())
		}
	}

	fn new_actor() -> Arc<DocActor> {
		DocActor::new(DocId::from("doc-test"), Arc::new(FakeReplicationCore), Arc::new(FakeSnapshotQueue), 30_000)
	}

	async fn recv_next(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> WireMessage {
		let frame = rx.recv().await.expect("a frame was sent");
		WireMessage::decode(&frame).expect("valid frame")
	}

	#[tokio::test]
	async fn register_conn_sends_initial_step1() {
		let actor = new_actor();
		let (_conn_id, mut rx) = actor.register_conn();
		match recv_next(&mut rx).await {
			WireMessage::Sync(SyncPayload::Step1(_)) => {}
			other => panic!("expected step1, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn step1_from_behind_peer_replies_with_step2() {
		let actor = new_actor();
		let (writer_id, mut writer_rx) = actor.register_conn();
		let _ = recv_next(&mut writer_rx).await; // initial step1, ignored

		// Give the actor's doc some state so an empty-state-vector peer is
		// genuinely behind.
		let update_bytes = {
			let doc = Doc::new();
			let mut txn = doc.transact_mut();
			txn.get_or_insert_map("root").insert(&mut txn, "k", "v");
			drop(txn);
			let txn = doc.transact();
			txn.encode_state_as_update_v1(&yrs::StateVector::default())
		};
		actor
			.handle_incoming(writer_id, &WireMessage::Sync(SyncPayload::Update(update_bytes)).encode())
			.expect("seed update handled");

		let (reader_id, mut reader_rx) = actor.register_conn();
		let _ = recv_next(&mut reader_rx).await; // reader's own initial step1

		let empty_sv = yrs::StateVector::default().encode_v1();
		actor
			.handle_incoming(reader_id, &WireMessage::Sync(SyncPayload::Step1(empty_sv)).encode())
			.expect("step1 handled");

		match recv_next(&mut reader_rx).await {
			WireMessage::Sync(SyncPayload::Step2(bytes)) => assert!(!bytes.is_empty()),
			other => panic!("expected step2 for a genuinely behind peer, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn update_from_one_conn_broadcasts_to_others_but_not_itself() {
		let actor = new_actor();
		let (sender_id, mut sender_rx) = actor.register_conn();
		let (_other_id, mut other_rx) = actor.register_conn();
		let _ = recv_next(&mut sender_rx).await;
		let _ = recv_next(&mut other_rx).await;

		let update_bytes = {
			let doc = Doc::new();
			let mut txn = doc.transact_mut();
			txn.get_or_insert_map("root").insert(&mut txn, "k", "v");
			drop(txn);
			let txn = doc.transact();
			txn.encode_state_as_update_v1(&yrs::StateVector::default())
		};
		actor
			.handle_incoming(sender_id, &WireMessage::Sync(SyncPayload::Update(update_bytes)).encode())
			.expect("update handled");

		match recv_next(&mut other_rx).await {
			WireMessage::Sync(SyncPayload::Update(_)) => {}
			other => panic!("expected update broadcast, got {other:?}"),
		}

		let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), sender_rx.recv()).await;
		assert!(nothing.is_err(), "sender must not receive its own update echoed back");
	}

	#[tokio::test]
	async fn unregister_broadcasts_awareness_removal_for_owned_clients() {
		let actor = new_actor();
		let (leaver_id, mut leaver_rx) = actor.register_conn();
		let (_stayer_id, mut stayer_rx) = actor.register_conn();
		let _ = recv_next(&mut leaver_rx).await;
		let _ = recv_next(&mut stayer_rx).await;

		let awareness_update = serde_json::to_vec(&serde_json::json!({ "1": { "clock": 0, "state": {"x": 1} } }))
			.expect("encode awareness");
		actor
			.handle_incoming(leaver_id, &WireMessage::Awareness(awareness_update).encode())
			.expect("awareness handled");
		let _ = recv_next(&mut stayer_rx).await; // the forwarded awareness update

		actor.unregister_conn(leaver_id);

		match recv_next(&mut stayer_rx).await {
			WireMessage::Awareness(bytes) => {
				let decoded: serde_json::Value = serde_json::from_slice(&bytes).expect("decode");
				assert!(decoded["1"]["state"].is_null());
			}
			other => panic!("expected awareness removal broadcast, got {other:?}"),
		}
	}
}
