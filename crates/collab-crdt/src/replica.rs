//! Helpers for encoding/applying full CRDT state, shared by the session
//! layer (initial sync) and the snapshot worker (rebuild from
//! snapshot+tail).

use collab_types::prelude::*;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update as YUpdate};

/// Applies an opaque update (or a full snapshot, which is just an update
/// encoded against an empty state vector) to `doc`.
pub fn apply_bytes(doc: &Doc, bytes: &[u8]) -> ClResult<()> {
	let update = YUpdate::decode_v1(bytes)
		.map_err(|e| Error::Internal(format!("corrupt CRDT update: {e}")))?;
	let mut txn = doc.transact_mut();
	txn.apply_update(update).map_err(|e| Error::Internal(format!("apply_update failed: {e:?}")))?;
	Ok(())
}

/// Encodes the full current state of `doc` (an update relative to an
/// empty state vector).
pub fn encode_full(doc: &Doc) -> Snapshot {
	let txn = doc.transact();
	Snapshot(txn.encode_state_as_update_v1(&StateVector::default()))
}

/// Rebuilds a fresh replica from an optional prior snapshot plus an
/// ordered sequence of subsequent updates, then re-encodes it. Used by the
/// snapshot worker (module E). Idempotent and commutative: replaying
/// already-persisted updates is always safe.
pub fn rebuild(snapshot: Option<&Snapshot>, updates: impl IntoIterator<Item = Update>) -> ClResult<Snapshot> {
	let doc = Doc::new();
	if let Some(snap) = snapshot {
		apply_bytes(&doc, snap.as_bytes())?;
	}
	for update in updates {
		apply_bytes(&doc, update.as_bytes())?;
	}
	Ok(encode_full(&doc))
}

#[cfg(test)]
mod tests {
	use super::*;
	use yrs::{Map, Transact as _};

	#[test]
	fn rebuild_from_snapshot_and_tail_matches_direct_apply() {
		let source = Doc::new();
		{
			let mut txn = source.transact_mut();
			let map = txn.get_or_insert_map("root");
			map.insert(&mut txn, "a", "1");
		}
		let snapshot = encode_full(&source);

		{
			let mut txn = source.transact_mut();
			let map = txn.get_or_insert_map("root");
			map.insert(&mut txn, "b", "2");
		}
		let full = encode_full(&source);

		// Simulate: snapshot taken after "a", then a lone stream update
		// adding "b", replayed from scratch.
		let update_only = Doc::new();
		apply_bytes(&update_only, snapshot.as_bytes()).expect("apply snapshot");
		let before = encode_full(&update_only);
		apply_bytes(&update_only, full.as_bytes()).expect("apply full (idempotent superset)");
		let after = encode_full(&update_only);

		assert_ne!(before.as_bytes(), after.as_bytes());
	}

	#[test]
	fn rebuild_with_no_snapshot_and_empty_tail_is_empty() {
		let snapshot = rebuild(None, std::iter::empty()).expect("rebuild");
		let fresh = encode_full(&Doc::new());
		assert_eq!(snapshot.as_bytes(), fresh.as_bytes());
	}
}
