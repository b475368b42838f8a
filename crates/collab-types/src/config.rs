//! Configuration recognized by the gateway, replication core, and snapshot
//! worker. See spec §4.H — this struct is exhaustive.

#[derive(Debug, Clone)]
pub struct Config {
	/// Origin tag on stream entries; must be stable for the process lifetime.
	pub server_id: String,
	pub listen_addr: String,
	pub listen_port: u16,
	/// Base URL for the metadata service's access-check endpoint.
	pub metadata_base_url: String,
	/// Address of the snapshot RPC service.
	pub snapshot_rpc_addr: String,
	/// Prefix for all stream and queue keys.
	pub stream_namespace: String,
	/// Approximate cap on stream entries per document.
	pub stream_max_len: usize,
	/// Max entries fetched per tail iteration.
	pub stream_batch_size: usize,
	/// Sleep when a tail finds no new entries.
	pub idle_delay_ms: u64,
	/// Delay between edit and first eligible enqueue-ready time.
	pub snapshot_throttle_ms: i64,
	/// Lease window for an in-flight snapshot job.
	pub snapshot_processing_ttl_ms: i64,
	/// Postpone offset on worker failure.
	pub snapshot_retry_delay_ms: i64,
	/// Sleep when the snapshot queue is empty.
	pub worker_poll_interval_ms: u64,
	/// WebSocket heartbeat interval.
	pub ping_interval_ms: u64,
}

impl Config {
	/// Defaults matching §4.H; `server_id` defaults to `${hostname}-${pid}`.
	pub fn defaults() -> Self {
		let hostname = std::env::var("HOSTNAME")
			.or_else(|_| std::env::var("COMPUTERNAME"))
			.unwrap_or_else(|_| "localhost".to_string());
		Self {
			server_id: format!("{}-{}", hostname, std::process::id()),
			listen_addr: "0.0.0.0".to_string(),
			listen_port: 8080,
			metadata_base_url: "http://localhost:3000".to_string(),
			snapshot_rpc_addr: "http://localhost:3001".to_string(),
			stream_namespace: "collab".to_string(),
			stream_max_len: 10_000,
			stream_batch_size: 500,
			idle_delay_ms: 200,
			snapshot_throttle_ms: 5_000,
			snapshot_processing_ttl_ms: 30_000,
			snapshot_retry_delay_ms: 10_000,
			worker_poll_interval_ms: 1_000,
			ping_interval_ms: 30_000,
		}
	}

	pub fn stream_key(&self, doc_id: &str) -> String {
		format!("{}:doc:{}", self.stream_namespace, doc_id)
	}

	pub fn snapshot_queue_key(&self) -> String {
		format!("{}:snapshot:queue", self.stream_namespace)
	}
}

impl Default for Config {
	fn default() -> Self {
		Self::defaults()
	}
}
