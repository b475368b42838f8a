//! Core data model shared by the stream adapter, replication core, CRDT
//! session, and snapshot subsystems.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque, case-sensitive document identity. Used verbatim as a key
/// component in the stream store and the snapshot queue.
pub type DocId = Arc<str>;

/// Sentinel used to mark the originating server of a stream entry or a
/// replication-bus delivery. Compared for equality against the local
/// `serverId` to filter own-origin echoes.
pub type ServerId = Arc<str>;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
	#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// An opaque binary delta produced by the CRDT library. Commutative and
/// idempotent under the CRDT merge function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update(pub Vec<u8>);

impl Update {
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

/// An opaque binary blob representing the full state of a CRDT replica at
/// a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(pub Vec<u8>);

impl Snapshot {
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

/// Monotonically increasing id within a document's stream, in the
/// store's native id format (e.g. Redis Stream `<ms>-<seq>` ids).
/// `"0-0"` means "from the beginning"; `"$"` means "current tail".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub Arc<str>);

impl EntryId {
	pub fn beginning() -> Self {
		Self(Arc::from("0-0"))
	}

	pub fn tail() -> Self {
		Self(Arc::from("$"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for EntryId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A single entry in a document's append-only stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
	pub entry_id: EntryId,
	pub payload: Update,
	pub origin_server_id: ServerId,
	pub ts: i64,
}

/// A deduplicated, delayed job in the snapshot queue.
#[derive(Debug, Clone)]
pub struct SnapshotJob {
	pub doc_id: DocId,
	pub ready_at: i64,
}

/// A bus delivery: either a locally produced update (about to be
/// published) or a remotely received one (already persisted upstream).
#[derive(Debug, Clone)]
pub struct Delivery {
	pub doc_id: DocId,
	pub update: Update,
	pub origin_server_id: ServerId,
}
