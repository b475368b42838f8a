pub use crate::config::Config;
pub use crate::error::{ClResult, Error};
pub use crate::model::{now_ms, Delivery, DocId, EntryId, ServerId, Snapshot, SnapshotJob, StreamEntry, Update};
pub use crate::snapshot_queue::SnapshotQueue;
pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn};
