//! Redis ZSET-backed implementation of [`collab_snapshot::SnapshotQueue`]
//! (module D). The queue lives at `{namespace}:snapshot:queue`; members are
//! `DocId`s, scores are `readyAt` milliseconds. `claim` is implemented as a
//! single `EVAL` script so the find-lowest-ready/raise-score sequence is
//! atomic against concurrent workers.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use async_trait::async_trait;
use collab_snapshot::SnapshotQueue;
use collab_types::prelude::*;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

/// Finds the lowest-scored member with score <= `now`; if found, raises
/// its score to `now + processingTtlMs` and returns it. Returns an empty
/// string (translated to `None`) if nothing is ready. Single round trip,
/// atomic under Redis's single-threaded script execution.
const CLAIM_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local lease_until = tonumber(ARGV[2])
local ready = redis.call('ZRANGEBYSCORE', key, '-inf', now, 'LIMIT', 0, 1)
if #ready == 0 then
	return false
end
local doc_id = ready[1]
redis.call('ZADD', key, lease_until, doc_id)
return doc_id
";

pub struct RedisSnapshotQueue {
	manager: ConnectionManager,
	queue_key: String,
	claim_script: Script,
}

impl RedisSnapshotQueue {
	pub async fn connect(redis_url: &str, config: &Config) -> ClResult<Self> {
		let client = redis::Client::open(redis_url)
			.map_err(|e| Error::ConfigError(format!("invalid redis url: {e}")))?;
		let manager = client
			.get_connection_manager()
			.await
			.map_err(|e| Error::StoreUnavailable(format!("redis connect failed: {e}")))?;
		Ok(Self { manager, queue_key: config.snapshot_queue_key(), claim_script: Script::new(CLAIM_SCRIPT) })
	}
}

#[async_trait]
impl SnapshotQueue for RedisSnapshotQueue {
	async fn enqueue(&self, doc_id: &DocId, delay_ms: i64) -> ClResult<bool> {
		let mut conn = self.manager.clone();
		let score = now_ms() + delay_ms;
		// NX: only set the score if the member doesn't already exist.
		let added: i64 = conn
			.zadd_nx(&self.queue_key, doc_id.as_ref(), score)
			.await
			.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
		Ok(added == 1)
	}

	async fn claim(&self, now: i64, processing_ttl_ms: i64) -> ClResult<Option<DocId>> {
		let mut conn = self.manager.clone();
		let lease_until = now + processing_ttl_ms;
		let claimed: redis::Value = self
			.claim_script
			.key(&self.queue_key)
			.arg(now)
			.arg(lease_until)
			.invoke_async(&mut conn)
			.await
			.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
		match claimed {
			redis::Value::Nil | redis::Value::Boolean(false) => Ok(None),
			redis::Value::BulkString(bytes) => Ok(Some(DocId::from(
				String::from_utf8(bytes).map_err(|e| Error::Internal(format!("non-utf8 doc id: {e}")))?.as_str(),
			))),
			other => Err(Error::Internal(format!("unexpected claim script reply: {other:?}"))),
		}
	}

	async fn complete(&self, doc_id: &DocId) -> ClResult<()> {
		let mut conn = self.manager.clone();
		let _: i64 =
			conn.zrem(&self.queue_key, doc_id.as_ref()).await.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
		Ok(())
	}

	async fn postpone(&self, doc_id: &DocId, delay_ms: i64) -> ClResult<()> {
		let mut conn = self.manager.clone();
		let score = now_ms() + delay_ms;
		let _: i64 = conn
			.zadd(&self.queue_key, doc_id.as_ref(), score)
			.await
			.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
		Ok(())
	}
}

// vim: ts=4
