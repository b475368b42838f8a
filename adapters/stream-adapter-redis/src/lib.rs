//! Redis Streams-backed implementation of [`collab_stream::StreamAdapter`]
//! (module A). Each document's stream lives at `{namespace}:doc:{docId}`;
//! entries are trimmed approximately to `streamMaxLen`. Own-origin entries
//! are dropped on the tailing path so the replication core never rebroadcasts
//! a server's own update back to itself.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use collab_stream::{StopHandle, StreamAdapter};
use collab_types::prelude::*;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use tokio_stream::Stream;

const FIELD_PAYLOAD: &str = "payload";
const FIELD_ORIGIN: &str = "origin";
const FIELD_TS: &str = "ts";

/// Bounded retry backoff for a tailer that hits a transient Redis error.
/// The tailer never gives up; it just waits longer between attempts, up to
/// this ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

pub struct RedisStreamAdapter {
	manager: ConnectionManager,
	server_id: ServerId,
	stream_namespace: String,
	stream_max_len: usize,
	idle_delay_ms: u64,
}

impl RedisStreamAdapter {
	pub async fn connect(redis_url: &str, config: &Config) -> ClResult<Self> {
		let client = redis::Client::open(redis_url)
			.map_err(|e| Error::ConfigError(format!("invalid redis url: {e}")))?;
		let manager = client
			.get_connection_manager()
			.await
			.map_err(|e| Error::StoreUnavailable(format!("redis connect failed: {e}")))?;
		Ok(Self {
			manager,
			server_id: ServerId::from(config.server_id.as_str()),
			stream_namespace: config.stream_namespace.clone(),
			stream_max_len: config.stream_max_len,
			idle_delay_ms: config.idle_delay_ms,
		})
	}

	fn stream_key(&self, doc_id: &DocId) -> String {
		format!("{}:doc:{}", self.stream_namespace, doc_id)
	}

	fn entry_from_stream_id(id: &StreamId) -> ClResult<StreamEntry> {
		let payload: Vec<u8> = id
			.get(FIELD_PAYLOAD)
			.ok_or_else(|| Error::Internal(format!("stream entry {} missing payload field", id.id)))?;
		let origin: String = id
			.get(FIELD_ORIGIN)
			.ok_or_else(|| Error::Internal(format!("stream entry {} missing origin field", id.id)))?;
		let ts: i64 = id.get(FIELD_TS).unwrap_or(0);
		Ok(StreamEntry {
			entry_id: EntryId(std::sync::Arc::from(id.id.as_str())),
			payload: Update(payload),
			origin_server_id: ServerId::from(origin.as_str()),
			ts,
		})
	}
}

fn transient(e: RedisError) -> Error {
	Error::StoreUnavailable(e.to_string())
}

#[async_trait]
impl StreamAdapter for RedisStreamAdapter {
	async fn append(&self, doc_id: &DocId, payload: Update, origin_server_id: &ServerId) -> ClResult<EntryId> {
		let mut conn = self.manager.clone();
		let key = self.stream_key(doc_id);
		let id: String = conn
			.xadd_maxlen(
				&key,
				redis::streams::StreamMaxlen::Approx(self.stream_max_len),
				"*",
				&[
					(FIELD_PAYLOAD, payload.as_bytes()),
					(FIELD_ORIGIN, origin_server_id.as_bytes()),
					(FIELD_TS, now_ms().to_string().as_bytes()),
				],
			)
			.await
			.map_err(transient)?;
		Ok(EntryId(std::sync::Arc::from(id.as_str())))
	}

	async fn range(&self, doc_id: &DocId, after_id: &EntryId, limit: usize) -> ClResult<Vec<StreamEntry>> {
		let mut conn = self.manager.clone();
		let key = self.stream_key(doc_id);
		let start = exclusive_start(after_id);
		let reply: StreamReadReply = conn
			.xread_options(
				&[key.as_str()],
				&[start.as_str()],
				&StreamReadOptions::default().count(limit),
			)
			.await
			.map_err(transient)?;

		let mut out = Vec::new();
		for stream_key in reply.keys {
			for id in stream_key.ids {
				out.push(Self::entry_from_stream_id(&id)?);
			}
		}
		Ok(out)
	}

	fn subscribe(&self, doc_id: DocId, from_id: EntryId) -> (Pin<Box<dyn Stream<Item = StreamEntry> + Send>>, StopHandle) {
		let (handle, cancel) = StopHandle::new();
		let manager = self.manager.clone();
		let server_id = self.server_id.clone();
		let key = self.stream_key(&doc_id);
		let idle_delay = Duration::from_millis(self.idle_delay_ms);

		let stream = async_stream::stream! {
			let mut conn = manager;
			// "$" is resolved by Redis itself on the first blocking read (the
			// current tail at call time); afterwards `cursor` is a concrete
			// entry id and every subsequent read is exclusive-from there.
			let mut cursor = from_id;
			let mut backoff = Duration::from_millis(100);

			loop {
				if cancel.is_cancelled() {
					return;
				}
				let start = exclusive_start(&cursor);
				let read = tokio::select! {
					() = cancel.cancelled() => return,
					res = conn.xread_options(
						&[key.as_str()],
						&[start.as_str()],
						&StreamReadOptions::default().block(200),
					) => res,
				};

				let reply: StreamReadReply = match read {
					Ok(reply) => reply,
					Err(e) => {
						tracing::warn!("stream tail for {} hit a transient error: {}", key, e);
						tokio::select! {
							() = cancel.cancelled() => return,
							() = tokio::time::sleep(backoff) => {}
						}
						backoff = (backoff * 2).min(MAX_BACKOFF);
						continue;
					}
				};
				backoff = Duration::from_millis(100);

				let mut delivered_any = false;
				for stream_key in reply.keys {
					for id in stream_key.ids {
						let entry = match RedisStreamAdapter::entry_from_stream_id(&id) {
							Ok(entry) => entry,
							Err(e) => {
								tracing::warn!("skipping malformed stream entry in {}: {}", key, e);
								continue;
							}
						};
						cursor = entry.entry_id.clone();
						delivered_any = true;
						if entry.origin_server_id == server_id {
							continue;
						}
						yield entry;
					}
				}
				if !delivered_any {
					tokio::time::sleep(idle_delay).await;
				}
			}
		};

		(Box::pin(stream), handle)
	}
}

fn exclusive_start(after_id: &EntryId) -> String {
	if after_id.as_str() == "$" {
		"$".to_string()
	} else {
		format!("({}", after_id.as_str())
	}
}

// vim: ts=4
