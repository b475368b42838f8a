//! Minimal binary wiring the Redis-backed adapters into the collaboration
//! gateway. Configuration is read entirely from the environment so this can
//! run as a container with no config file.

use std::env;
use std::sync::Arc;

use collab_snapshot_queue_redis::RedisSnapshotQueue;
use collab_stream_adapter_redis::RedisStreamAdapter;
use collab_types::prelude::*;

fn env_or(key: &str, default: &str) -> String {
	env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
	env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn config_from_env() -> Config {
	let mut config = Config::defaults();
	if let Ok(v) = env::var("SERVER_ID") {
		config.server_id = v;
	}
	config.listen_addr = env_or("LISTEN_ADDR", &config.listen_addr);
	config.listen_port = env_parsed("LISTEN_PORT", config.listen_port);
	config.metadata_base_url = env_or("METADATA_BASE_URL", &config.metadata_base_url);
	config.snapshot_rpc_addr = env_or("SNAPSHOT_RPC_ADDR", &config.snapshot_rpc_addr);
	config.stream_namespace = env_or("STREAM_NAMESPACE", &config.stream_namespace);
	config.stream_max_len = env_parsed("STREAM_MAX_LEN", config.stream_max_len);
	config.stream_batch_size = env_parsed("STREAM_BATCH_SIZE", config.stream_batch_size);
	config.idle_delay_ms = env_parsed("IDLE_DELAY_MS", config.idle_delay_ms);
	config.snapshot_throttle_ms = env_parsed("SNAPSHOT_THROTTLE_MS", config.snapshot_throttle_ms);
	config.snapshot_processing_ttl_ms = env_parsed("SNAPSHOT_PROCESSING_TTL_MS", config.snapshot_processing_ttl_ms);
	config.snapshot_retry_delay_ms = env_parsed("SNAPSHOT_RETRY_DELAY_MS", config.snapshot_retry_delay_ms);
	config.worker_poll_interval_ms = env_parsed("WORKER_POLL_INTERVAL_MS", config.worker_poll_interval_ms);
	config.ping_interval_ms = env_parsed("PING_INTERVAL_MS", config.ping_interval_ms);
	config
}

#[tokio::main]
async fn main() -> ClResult<()> {
	let config = config_from_env();
	let redis_url = env_or("REDIS_URL", "redis://127.0.0.1");

	let stream_adapter = Arc::new(RedisStreamAdapter::connect(&redis_url, &config).await?);
	let snapshot_queue = Arc::new(RedisSnapshotQueue::connect(&redis_url, &config).await?);

	let mut builder = collab_server::Builder::new(config)
		.with_stream_adapter(stream_adapter.clone())
		.with_snapshot_queue(snapshot_queue);

	if env_or("WORKER_ENABLED", "true") == "true" {
		builder = builder.with_worker(stream_adapter);
	}

	builder.run().await
}

// vim: ts=4
