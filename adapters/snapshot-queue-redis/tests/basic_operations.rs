//! Integration tests against a real Redis instance. Ignored by default;
//! run with `REDIS_URL=redis://127.0.0.1 cargo test -- --ignored`.

use collab_snapshot::SnapshotQueue;
use collab_snapshot_queue_redis::RedisSnapshotQueue;
use collab_types::prelude::*;

async fn connect() -> RedisSnapshotQueue {
	let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1".to_string());
	let mut config = Config::defaults();
	config.stream_namespace = format!("collab-test-{}", now_ms());
	RedisSnapshotQueue::connect(&url, &config).await.expect("connect to redis")
}

#[tokio::test]
#[ignore]
async fn enqueue_dedups_and_claim_round_trips() {
	let queue = connect().await;
	let doc_id: DocId = DocId::from("doc-dedup");

	assert!(queue.enqueue(&doc_id, 0).await.expect("first enqueue"));
	assert!(!queue.enqueue(&doc_id, 0).await.expect("second enqueue is a dup"));

	let claimed = queue.claim(now_ms(), 30_000).await.expect("claim").expect("job ready");
	assert_eq!(claimed, doc_id);

	// Still dedup'd while in flight.
	assert!(!queue.enqueue(&doc_id, 0).await.expect("enqueue while in-flight"));

	queue.complete(&doc_id).await.expect("complete");
	assert!(queue.enqueue(&doc_id, 0).await.expect("enqueue after complete"));
}

#[tokio::test]
#[ignore]
async fn lease_expiry_allows_reclaim() {
	let queue = connect().await;
	let doc_id: DocId = DocId::from("doc-lease");
	queue.enqueue(&doc_id, 0).await.expect("enqueue");

	let now = now_ms();
	let first = queue.claim(now, 10).await.expect("claim").expect("job ready");
	assert_eq!(first, doc_id);

	// Not yet expired: nothing else ready.
	assert!(queue.claim(now, 10).await.expect("claim").is_none());

	// After the lease window, the job is reclaimable.
	let second = queue.claim(now + 20, 10_000).await.expect("claim").expect("job ready again");
	assert_eq!(second, doc_id);
}
