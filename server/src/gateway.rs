//! The WebSocket gateway (module F). One route, `/{docId}`: parses the
//! `token` query parameter, runs the access check against the metadata
//! service, and on success hands the connection off to the document's
//! `DocActor`.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use collab_types::prelude::*;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConnectQuery {
	token: String,
}

pub async fn upgrade(
	State(state): State<AppState>,
	Path(doc_id): Path<String>,
	Query(query): Query<ConnectQuery>,
	ws: WebSocketUpgrade,
) -> Response {
	let doc_id: DocId = DocId::from(doc_id.as_str());

	if let Err(e) = state.metadata.check_access(&doc_id, &query.token).await {
		return e.into_response();
	}

	ws.on_upgrade(move |socket| handle_socket(socket, state, doc_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, doc_id: DocId) {
	let actor = match state.get_or_bind(&doc_id).await {
		Ok(actor) => actor,
		Err(e) => {
			warn!("failed to bind document {}: {}", doc_id, e);
			return;
		}
	};

	let (conn_id, mut outgoing_rx) = actor.register_conn();
	let (mut ws_tx, mut ws_rx) = socket.split();
	let mut ping_timer = tokio::time::interval(Duration::from_millis(state.config.ping_interval_ms));
	// No pong is owed until the first ping goes out.
	let mut pong_seen = true;

	loop {
		tokio::select! {
			outgoing = outgoing_rx.recv() => {
				let Some(frame) = outgoing else { break };
				if ws_tx.send(Message::Binary(Bytes::from(frame))).await.is_err() {
					break;
				}
			}
			incoming = ws_rx.next() => {
				match incoming {
					Some(Ok(Message::Binary(bytes))) => {
						if let Err(e) = actor.handle_incoming(conn_id, &bytes) {
							warn!("closing conn {} on {} after invalid message: {}", conn_id, doc_id, e);
							break;
						}
					}
					Some(Ok(Message::Pong(_))) => {
						pong_seen = true;
					}
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {}
					Some(Err(e)) => {
						warn!("websocket transport error for conn {} on {}: {}", conn_id, doc_id, e);
						break;
					}
				}
			}
			_ = ping_timer.tick() => {
				if !pong_seen {
					warn!("closing unresponsive conn {} on {}: no pong since last ping", conn_id, doc_id);
					break;
				}
				pong_seen = false;
				if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
					break;
				}
			}
			() = state.shutdown.cancelled() => {
				let _ = ws_tx.send(Message::Close(Some(CloseFrame {
					code: axum::extract::ws::close_code::NORMAL,
					reason: "server shutting down".into(),
				}))).await;
				break;
			}
		}
	}

	actor.unregister_conn(conn_id);
	state.evict_if_idle(&doc_id).await;
}

// vim: ts=4
