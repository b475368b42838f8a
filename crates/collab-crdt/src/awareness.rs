//! Per-document awareness state (cursor, color, username, ...). Ephemeral,
//! local-only: never replicated across servers (§9 open question —
//! treated as intentional).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ClientId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClientEntry {
	clock: u32,
	/// `None` marks the client as removed.
	state: Option<Value>,
}

/// Wire format: `{ "<client_id>": { "clock": u32, "state": value|null }, ... }`.
#[derive(Debug, Default)]
pub struct AwarenessState {
	clients: HashMap<ClientId, ClientEntry>,
}

impl AwarenessState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.iter().all(|(_, e)| e.state.is_none())
	}

	/// Merges an incoming update (last-writer-wins per client id, by
	/// clock), returns the ids that were newly introduced or updated so the
	/// caller can track ownership, and the bytes to rebroadcast verbatim
	/// (the original payload, since awareness fan-out is opaque).
	pub fn apply_update(&mut self, bytes: &[u8]) -> Option<Vec<ClientId>> {
		let incoming: HashMap<ClientId, ClientEntry> = serde_json::from_slice(bytes).ok()?;
		let mut touched = Vec::with_capacity(incoming.len());
		for (id, entry) in incoming {
			let apply = match self.clients.get(&id) {
				Some(existing) => entry.clock >= existing.clock,
				None => true,
			};
			if apply {
				self.clients.insert(id, entry);
				touched.push(id);
			}
		}
		Some(touched)
	}

	/// Encodes the full current state (used when a new connection joins).
	pub fn encode_full(&self) -> Vec<u8> {
		serde_json::to_vec(&self.clients).unwrap_or_else(|_| b"{}".to_vec())
	}

	/// Marks the given client ids as removed and returns the removal
	/// update to broadcast, or `None` if none of the ids were known.
	pub fn remove_clients(&mut self, ids: &[ClientId]) -> Option<Vec<u8>> {
		let mut removal = HashMap::new();
		for id in ids {
			if let Some(entry) = self.clients.get_mut(id) {
				entry.clock += 1;
				entry.state = None;
				removal.insert(*id, entry.clone());
			}
		}
		if removal.is_empty() {
			None
		} else {
			serde_json::to_vec(&removal).ok()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn update_for(id: ClientId, clock: u32, state: Value) -> Vec<u8> {
		let mut map = HashMap::new();
		map.insert(id, ClientEntry { clock, state: Some(state) });
		serde_json::to_vec(&map).expect("encode")
	}

	#[test]
	fn newer_clock_overwrites_older() {
		let mut awareness = AwarenessState::new();
		awareness.apply_update(&update_for(1, 1, serde_json::json!({"x": 1})));
		awareness.apply_update(&update_for(1, 0, serde_json::json!({"x": 2})));
		let encoded = awareness.encode_full();
		let decoded: HashMap<ClientId, ClientEntry> = serde_json::from_slice(&encoded).expect("decode");
		assert_eq!(decoded[&1].state, Some(serde_json::json!({"x": 1})));
	}

	#[test]
	fn removal_clears_state_and_bumps_clock() {
		let mut awareness = AwarenessState::new();
		awareness.apply_update(&update_for(7, 0, serde_json::json!({"cursor": 3})));
		let removal = awareness.remove_clients(&[7]).expect("removal update");
		let decoded: HashMap<ClientId, ClientEntry> = serde_json::from_slice(&removal).expect("decode");
		assert_eq!(decoded[&7].state, None);
		assert!(awareness.is_empty());
	}

	#[test]
	fn removing_unknown_client_is_noop() {
		let mut awareness = AwarenessState::new();
		assert!(awareness.remove_clients(&[42]).is_none());
	}
}
