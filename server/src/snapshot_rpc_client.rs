//! HTTP client implementing [`collab_snapshot::SnapshotRpc`] (module G)
//! against the external snapshot service: `GetSnapshot` and `SaveSnapshot`.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use collab_snapshot::{GetSnapshotResult, SnapshotRpc};
use collab_types::prelude::*;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

#[derive(Deserialize)]
struct GetSnapshotBody {
	has_snapshot: bool,
	#[serde(default)]
	snapshot: Option<String>,
}

pub struct HttpSnapshotRpc {
	client: Client<HttpsConnector, Full<Bytes>>,
	addr: String,
	timeout: Duration,
}

impl HttpSnapshotRpc {
	pub fn new(addr: String, timeout: Duration) -> ClResult<Self> {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|e| Error::ConfigError(format!("failed to load TLS roots: {e}")))?
			.https_or_http()
			.enable_http1()
			.build();
		let client = Client::builder(TokioExecutor::new()).build(connector);
		Ok(Self { client, addr, timeout })
	}

	async fn send(&self, request: Request<Full<Bytes>>) -> ClResult<Bytes> {
		let response = tokio::time::timeout(self.timeout, self.client.request(request))
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|e| Error::RpcUnavailable(e.to_string()))?;

		if response.status() == hyper::StatusCode::NOT_FOUND {
			return Err(Error::DocumentNotKnown);
		}
		if !response.status().is_success() {
			return Err(Error::RpcUnavailable(format!("unexpected status {}", response.status())));
		}

		response.into_body().collect().await.map(http_body_util::Collected::to_bytes).map_err(|e| {
			Error::RpcUnavailable(e.to_string())
		})
	}
}

#[async_trait]
impl SnapshotRpc for HttpSnapshotRpc {
	async fn get_snapshot(&self, doc_id: &DocId) -> ClResult<GetSnapshotResult> {
		let uri: hyper::Uri = format!("{}/snapshot/{}", self.addr, doc_id)
			.parse()
			.map_err(|e| Error::ConfigError(format!("invalid snapshot rpc addr: {e}")))?;
		let request = Request::get(uri)
			.body(Full::new(Bytes::new()))
			.map_err(|e| Error::Internal(format!("failed to build get_snapshot request: {e}")))?;

		let bytes = self.send(request).await?;
		let body: GetSnapshotBody = serde_json::from_slice(&bytes)?;
		let snapshot = body
			.snapshot
			.map(|encoded| BASE64.decode(encoded.as_bytes()))
			.transpose()
			.map_err(|e| Error::Internal(format!("malformed base64 snapshot: {e}")))?
			.map(Snapshot);
		Ok(GetSnapshotResult { has_snapshot: body.has_snapshot, snapshot })
	}

	async fn save_snapshot(&self, doc_id: &DocId, snapshot: Snapshot) -> ClResult<()> {
		let uri: hyper::Uri = format!("{}/snapshot/{}", self.addr, doc_id)
			.parse()
			.map_err(|e| Error::ConfigError(format!("invalid snapshot rpc addr: {e}")))?;
		let payload = serde_json::json!({ "snapshot": BASE64.encode(snapshot.as_bytes()) });
		let request = Request::put(uri)
			.header(hyper::header::CONTENT_TYPE, "application/json")
			.body(Full::new(Bytes::from(serde_json::to_vec(&payload)?)))
			.map_err(|e| Error::Internal(format!("failed to build save_snapshot request: {e}")))?;

		self.send(request).await?;
		Ok(())
	}
}

// vim: ts=4
