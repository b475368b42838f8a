use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use collab_stream::{StopHandle, StreamAdapter};
use collab_types::prelude::*;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};

/// Process-local publish/deliver bus wrapping a stream adapter. `publish`
/// is called by the CRDT session whenever a local edit produces an update;
/// `bind_doc` is called once per document this process starts hosting and
/// returns a gap-free stream of deliveries (replay, then live tail).
#[async_trait]
pub trait ReplicationCore: Send + Sync {
	async fn publish(&self, doc_id: &DocId, update: Update) -> ClResult<()>;

	async fn bind_doc(
		&self,
		doc_id: DocId,
		last_known_id: EntryId,
	) -> ClResult<(Pin<Box<dyn Stream<Item = Delivery> + Send>>, BindHandle)>;

	async fn shutdown(&self);
}

/// Returned by `bind_doc`. Stops the tail and detaches the document's
/// local bus subscription.
#[derive(Clone)]
pub struct BindHandle {
	stop: StopHandle,
}

impl BindHandle {
	pub fn stop(&self) {
		self.stop.stop();
	}
}

struct DocBus {
	tx: broadcast::Sender<Delivery>,
}

/// Default `ReplicationCore` implementation: one `tokio::sync::broadcast`
/// channel per bound document (the "local bus"), layered over a
/// `StreamAdapter` for cross-process durability and fanout.
pub struct LocalReplicationCore<A: StreamAdapter> {
	adapter: Arc<A>,
	server_id: ServerId,
	batch_size: usize,
	buses: DashMap<DocId, Arc<DocBus>>,
	binds: DashMap<DocId, StopHandle>,
}

impl<A: StreamAdapter + 'static> LocalReplicationCore<A> {
	pub fn new(adapter: Arc<A>, server_id: ServerId, batch_size: usize) -> Self {
		Self { adapter, server_id, batch_size, buses: DashMap::new(), binds: DashMap::new() }
	}

	fn bus_for(&self, doc_id: &DocId) -> Arc<DocBus> {
		self.buses
			.entry(doc_id.clone())
			.or_insert_with(|| Arc::new(DocBus { tx: broadcast::channel(256).0 }))
			.clone()
	}
}

#[async_trait]
impl<A: StreamAdapter + 'static> ReplicationCore for LocalReplicationCore<A> {
	async fn publish(&self, doc_id: &DocId, update: Update) -> ClResult<()> {
		self.adapter.append(doc_id, update.clone(), &self.server_id).await?;
		let bus = self.bus_for(doc_id);
		let delivery =
			Delivery { doc_id: doc_id.clone(), update, origin_server_id: self.server_id.clone() };
		// No subscriber (no live bind for this doc) is not an error.
		let _ = bus.tx.send(delivery);
		Ok(())
	}

	async fn bind_doc(
		&self,
		doc_id: DocId,
		last_known_id: EntryId,
	) -> ClResult<(Pin<Box<dyn Stream<Item = Delivery> + Send>>, BindHandle)> {
		let adapter = self.adapter.clone();
		let bus = self.bus_for(&doc_id);
		let mut local_rx = bus.tx.subscribe();
		let batch_size = self.batch_size;
		let (stop, token) = StopHandle::new();
		let bind_key = doc_id.clone();

		let stream = async_stream::stream! {
			let mut cursor = last_known_id;

			// Step 1: read-replay from the durable store. May be re-executed
			// implicitly by the tail below picking up from the same cursor.
			loop {
				let entries = match adapter.range(&doc_id, &cursor, batch_size).await {
					Ok(entries) => entries,
					Err(e) => {
						warn!("replay range failed for {}: {}", doc_id, e);
						break;
					}
				};
				if entries.is_empty() {
					break;
				}
				if let Some(last) = entries.last() {
					cursor = last.entry_id.clone();
				}
				for entry in entries {
					yield Delivery {
						doc_id: doc_id.clone(),
						update: entry.payload,
						origin_server_id: entry.origin_server_id,
					};
				}
			}

			// Step 2: tail the store from the same cursor step 1 left behind,
			// merged with this process's own just-published deliveries.
			let (mut tail, tail_stop) = adapter.subscribe(doc_id.clone(), cursor);

			loop {
				tokio::select! {
					() = token.cancelled() => {
						tail_stop.stop();
						break;
					}
					entry = tail.next() => {
						match entry {
							Some(entry) => yield Delivery {
								doc_id: doc_id.clone(),
								update: entry.payload,
								origin_server_id: entry.origin_server_id,
							},
							None => break,
						}
					}
					delivery = local_rx.recv() => {
						match delivery {
							Ok(delivery) if delivery.doc_id == doc_id => yield delivery,
							Ok(_) => {}
							Err(broadcast::error::RecvError::Lagged(n)) => {
								warn!("replication local bus lagged by {} for {}", n, doc_id);
							}
							Err(broadcast::error::RecvError::Closed) => break,
						}
					}
				}
			}
		};

		self.binds.insert(bind_key, stop.clone());
		Ok((Box::pin(stream), BindHandle { stop }))
	}

	async fn shutdown(&self) {
		for entry in &self.binds {
			entry.value().stop();
		}
		self.binds.clear();
	}
}
