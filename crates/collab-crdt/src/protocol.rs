//! The binary, length-delimited, multiplexed wire protocol for a single
//! CRDT WebSocket frame (module C). Each WebSocket binary frame carries
//! exactly one encoded `WireMessage`.
//!
//! Layout: `[type: u8][... body]`.
//! - `type=0` (SYNC): `[subtype: u8][payload]` where subtype 0=step1
//!   (state vector), 1=step2 (update), 2=update (incremental update).
//! - `type=1` (AWARENESS): the remaining bytes are an opaque awareness
//!   payload, merged and rebroadcast verbatim.

use collab_types::prelude::*;

const TYPE_SYNC: u8 = 0;
const TYPE_AWARENESS: u8 = 1;

const SYNC_STEP1: u8 = 0;
const SYNC_STEP2: u8 = 1;
const SYNC_UPDATE: u8 = 2;

#[derive(Debug, Clone)]
pub enum SyncPayload {
	/// State vector request: the peer's current state vector.
	Step1(Vec<u8>),
	/// Update reply covering the gap implied by a `Step1`.
	Step2(Vec<u8>),
	/// A subsequent incremental update.
	Update(Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum WireMessage {
	Sync(SyncPayload),
	Awareness(Vec<u8>),
}

impl WireMessage {
	pub fn decode(frame: &[u8]) -> ClResult<Self> {
		let (&msg_type, rest) = frame
			.split_first()
			.ok_or_else(|| Error::InvalidMessage("empty frame".into()))?;
		match msg_type {
			TYPE_SYNC => {
				let (&subtype, body) = rest
					.split_first()
					.ok_or_else(|| Error::InvalidMessage("truncated sync frame".into()))?;
				let payload = match subtype {
					SYNC_STEP1 => SyncPayload::Step1(body.to_vec()),
					SYNC_STEP2 => SyncPayload::Step2(body.to_vec()),
					SYNC_UPDATE => SyncPayload::Update(body.to_vec()),
					other => {
						return Err(Error::InvalidMessage(format!("unknown sync subtype {other}")))
					}
				};
				Ok(Self::Sync(payload))
			}
			TYPE_AWARENESS => Ok(Self::Awareness(rest.to_vec())),
			other => Err(Error::InvalidMessage(format!("unknown message type {other}"))),
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		match self {
			Self::Sync(SyncPayload::Step1(body)) => encode_sync(SYNC_STEP1, body),
			Self::Sync(SyncPayload::Step2(body)) => encode_sync(SYNC_STEP2, body),
			Self::Sync(SyncPayload::Update(body)) => encode_sync(SYNC_UPDATE, body),
			Self::Awareness(body) => {
				let mut out = Vec::with_capacity(1 + body.len());
				out.push(TYPE_AWARENESS);
				out.extend_from_slice(body);
				out
			}
		}
	}
}

fn encode_sync(subtype: u8, body: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(2 + body.len());
	out.push(TYPE_SYNC);
	out.push(subtype);
	out.extend_from_slice(body);
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_sync_step1() {
		let msg = WireMessage::Sync(SyncPayload::Step1(vec![1, 2, 3]));
		let frame = msg.encode();
		let decoded = WireMessage::decode(&frame).expect("decode");
		match decoded {
			WireMessage::Sync(SyncPayload::Step1(body)) => assert_eq!(body, vec![1, 2, 3]),
			_ => panic!("wrong variant"),
		}
	}

	#[test]
	fn round_trips_awareness() {
		let msg = WireMessage::Awareness(b"{}".to_vec());
		let frame = msg.encode();
		let decoded = WireMessage::decode(&frame).expect("decode");
		match decoded {
			WireMessage::Awareness(body) => assert_eq!(body, b"{}"),
			_ => panic!("wrong variant"),
		}
	}

	#[test]
	fn rejects_empty_frame() {
		assert!(WireMessage::decode(&[]).is_err());
	}

	#[test]
	fn rejects_unknown_type() {
		assert!(WireMessage::decode(&[9, 1, 2]).is_err());
	}
}
