//! The per-document CRDT session (module C): wire protocol, awareness
//! state, and the `DocActor` that ties a `yrs::Doc` to a set of WebSocket
//! connections and the replication core.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod awareness;
mod doc_actor;
pub mod protocol;
pub mod replica;

pub use awareness::{AwarenessState, ClientId};
pub use doc_actor::{ConnId, DocActor};

// vim: ts=4
