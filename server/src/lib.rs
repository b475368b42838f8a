//! Config + lifecycle glue (module H): a `Builder` that wires the chosen
//! stream adapter, snapshot queue, and snapshot RPC client into the
//! WebSocket gateway, starts the snapshot worker, and serves until a
//! shutdown signal arrives.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use collab_replication::{LocalReplicationCore, ReplicationCore};
use collab_stream::StreamAdapter;
use collab_types::prelude::*;
use tokio_util::sync::CancellationToken;

pub mod gateway;
pub mod health;
pub mod metadata_client;
pub mod snapshot_rpc_client;
pub mod state;

use metadata_client::MetadataClient;
use snapshot_rpc_client::HttpSnapshotRpc;
use state::AppState;

/// Bounded deadline for the access-check and snapshot RPC calls (§5:
/// "Access-check timeout: a bounded per-upgrade deadline"). Not part of
/// the exhaustive §4.H config table, so it is a fixed constant rather than
/// a knob.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Builder {
	config: Config,
	replication: Option<Arc<dyn ReplicationCore>>,
	snapshot_queue: Option<Arc<dyn SnapshotQueue>>,
	worker_stream_adapter: Option<Arc<dyn StreamAdapter>>,
	spawn_worker: bool,
}

impl Builder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			replication: None,
			snapshot_queue: None,
			worker_stream_adapter: None,
			spawn_worker: false,
		}
	}

	/// Wires a stream adapter (module A) into a default, process-local
	/// [`LocalReplicationCore`] (module B).
	pub fn with_stream_adapter<A: StreamAdapter + 'static>(mut self, adapter: Arc<A>) -> Self {
		let server_id = ServerId::from(self.config.server_id.as_str());
		self.replication = Some(Arc::new(LocalReplicationCore::new(adapter, server_id, self.config.stream_batch_size)));
		self
	}

	pub fn with_snapshot_queue<Q: SnapshotQueue + 'static>(mut self, queue: Arc<Q>) -> Self {
		self.snapshot_queue = Some(queue);
		self
	}

	/// Spawns the snapshot worker (module E) in-process alongside the
	/// gateway. Requires `rpc_stream_adapter` because the worker reads the
	/// stream tail directly, bypassing the replication bus.
	pub fn with_worker<A: StreamAdapter + 'static>(mut self, rpc_stream_adapter: Arc<A>) -> Self {
		self.worker_stream_adapter = Some(rpc_stream_adapter as Arc<dyn StreamAdapter>);
		self.spawn_worker = true;
		self
	}

	pub async fn run(self) -> ClResult<()> {
		tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.init();

		let replication =
			self.replication.ok_or_else(|| Error::ConfigError("no stream adapter configured".into()))?;
		let snapshot_queue =
			self.snapshot_queue.ok_or_else(|| Error::ConfigError("no snapshot queue configured".into()))?;

		let metadata = Arc::new(MetadataClient::new(self.config.metadata_base_url.clone(), RPC_TIMEOUT)?);
		let config = Arc::new(self.config);
		let shutdown = CancellationToken::new();
		let state = AppState::new(config.clone(), replication.clone(), snapshot_queue.clone(), metadata, shutdown.clone());

		let worker_handle = if self.spawn_worker {
			let Some(stream_adapter) = self.worker_stream_adapter else {
				return Err(Error::ConfigError("worker enabled without a stream adapter".into()));
			};
			let rpc = Arc::new(HttpSnapshotRpc::new(config.snapshot_rpc_addr.clone(), RPC_TIMEOUT)?);
			Some(collab_snapshot::run_worker(snapshot_queue, rpc, stream_adapter, (*config).clone()))
		} else {
			None
		};

		let router = Router::new()
			.route("/health", get(health::health))
			.route("/{doc_id}", get(gateway::upgrade))
			.with_state(state.clone());

		let addr = format!("{}:{}", config.listen_addr, config.listen_port);
		let listener = tokio::net::TcpListener::bind(&addr).await?;
		info!("collaboration gateway listening on {}", addr);

		axum::serve(listener, router)
			.with_graceful_shutdown(shutdown_signal(shutdown, state))
			.await
			.map_err(|e| Error::Internal(format!("server error: {e}")))?;

		replication.shutdown().await;
		if let Some(handle) = worker_handle {
			handle.stop();
			handle.join().await;
		}

		Ok(())
	}
}

/// Awaits ctrl-c/SIGTERM, then signals every open connection to close with a
/// normal-closure code and flushes a final snapshot for every document still
/// warm in this process. Returned future is handed to
/// `axum::serve(...).with_graceful_shutdown`, so the server only stops
/// accepting new connections once this has run.
async fn shutdown_signal(shutdown: CancellationToken, state: AppState) {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(e) => {
				warn!("failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {}
		() = terminate => {}
	}

	info!("shutdown signal received");
	shutdown.cancel();
	state.flush_warm_docs().await;
}

// vim: ts=4
