//! `GET /health` (module F).

use axum::response::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}
