//! Integration tests against a real Redis instance. Ignored by default;
//! run with `REDIS_URL=redis://127.0.0.1 cargo test -- --ignored`.

use collab_stream::StreamAdapter;
use collab_stream_adapter_redis::RedisStreamAdapter;
use collab_types::prelude::*;
use tokio_stream::StreamExt;

async fn connect() -> RedisStreamAdapter {
	let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1".to_string());
	let mut config = Config::defaults();
	config.server_id = "test-server".to_string();
	config.stream_namespace = format!("collab-test-{}", now_ms());
	RedisStreamAdapter::connect(&url, &config).await.expect("connect to redis")
}

#[tokio::test]
#[ignore]
async fn append_then_range_returns_entry_in_order() {
	let adapter = connect().await;
	let doc_id: DocId = DocId::from("doc-append");
	let server_id: ServerId = ServerId::from("test-server");

	adapter.append(&doc_id, Update(b"first".to_vec()), &server_id).await.expect("append first");
	adapter.append(&doc_id, Update(b"second".to_vec()), &server_id).await.expect("append second");

	let entries = adapter.range(&doc_id, &EntryId::beginning(), 10).await.expect("range");
	assert_eq!(entries.len(), 2);
	assert_eq!(entries[0].payload.as_bytes(), b"first");
	assert_eq!(entries[1].payload.as_bytes(), b"second");
}

#[tokio::test]
#[ignore]
async fn subscribe_filters_own_origin() {
	let adapter = connect().await;
	let doc_id: DocId = DocId::from("doc-subscribe");
	let own_id: ServerId = ServerId::from("test-server");
	let other_id: ServerId = ServerId::from("other-server");

	let (mut stream, _handle) = adapter.subscribe(doc_id.clone(), EntryId::tail());

	adapter.append(&doc_id, Update(b"mine".to_vec()), &own_id).await.expect("append own");
	adapter.append(&doc_id, Update(b"theirs".to_vec()), &other_id).await.expect("append other");

	let delivered = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
		.await
		.expect("timed out waiting for delivery")
		.expect("stream ended early");
	assert_eq!(delivered.payload.as_bytes(), b"theirs");
}
