//! HTTP client for the one inbound call the metadata service exposes to the
//! core (module F step 2): `GET {metadataBaseUrl}/sharing/document/{docId}/check-access`
//! with `Authorization: Bearer <token>`. A 2xx response allows the upgrade;
//! anything else (including a transport failure) is treated as denied.

use std::time::Duration;

use collab_types::prelude::*;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::Request;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Empty<Bytes>>;

pub struct MetadataClient {
	client: HttpsClient,
	base_url: String,
	timeout: Duration,
}

impl MetadataClient {
	pub fn new(base_url: String, timeout: Duration) -> ClResult<Self> {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|e| Error::ConfigError(format!("failed to load TLS roots: {e}")))?
			.https_or_http()
			.enable_http1()
			.build();
		let client = Client::builder(TokioExecutor::new()).build(connector);
		Ok(Self { client, base_url, timeout })
	}

	/// Returns `Ok(())` on a 2xx response, `Err(Error::AccessDenied)` on any
	/// other status, transport error, or timeout.
	pub async fn check_access(&self, doc_id: &DocId, token: &str) -> ClResult<()> {
		let uri: hyper::Uri = format!("{}/sharing/document/{}/check-access", self.base_url, doc_id)
			.parse()
			.map_err(|e| Error::ConfigError(format!("invalid metadata base url: {e}")))?;

		let request = Request::get(uri)
			.header(hyper::header::AUTHORIZATION, format!("Bearer {token}"))
			.body(Empty::new())
			.map_err(|e| Error::Internal(format!("failed to build access-check request: {e}")))?;

		let response = tokio::time::timeout(self.timeout, self.client.request(request))
			.await
			.map_err(|_| Error::AccessDenied)?
			.map_err(|e| {
				warn!("access-check RPC failed for {}: {}", doc_id, e);
				Error::AccessDenied
			})?;

		if response.status().is_success() {
			Ok(())
		} else {
			Err(Error::AccessDenied)
		}
	}
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
	use super::*;

	#[test]
	fn check_access_uri_is_well_formed() {
		let doc_id: DocId = DocId::from("doc-1");
		let uri: hyper::Uri = format!("http://localhost:3000/sharing/document/{doc_id}/check-access")
			.parse()
			.expect("valid uri");
		assert_eq!(uri.path(), "/sharing/document/doc-1/check-access");
	}
}
