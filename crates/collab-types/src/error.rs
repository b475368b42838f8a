//! Error handling subsystem. Implements the shared `Error` type used by every
//! collab-* crate and adapter.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Stream store or snapshot queue unreachable / timed out. Retried with backoff.
	StoreUnavailable(String),
	/// Metadata or snapshot RPC service unreachable, timed out, or returned a transient status.
	RpcUnavailable(String),
	/// Malformed or otherwise invalid WebSocket frame from a client.
	InvalidMessage(String),
	/// Access-check RPC denied the connection.
	AccessDenied,
	/// `SaveSnapshot` reported the document is not known to the metadata service.
	DocumentNotKnown,
	/// Document not currently bound in this process.
	DocumentNotBound,
	/// Internal invariant violation. Fatal: the caller should log and exit.
	Internal(String),
	/// Operation exceeded its deadline.
	Timeout,
	/// Missing or invalid configuration.
	ConfigError(String),

	Io(std::io::Error),
	Json(serde_json::Error),
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		tracing::warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("json error: {}", err);
		Self::Json(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

#[derive(Serialize)]
struct ErrorResponse {
	code: String,
	message: String,
}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let (status, code, message) = match self {
			Error::AccessDenied => {
				(StatusCode::FORBIDDEN, "E-CORE-NOPERM", "Access denied".to_string())
			}
			Error::DocumentNotKnown => {
				(StatusCode::NOT_FOUND, "E-CORE-NOTFOUND", "Document not known".to_string())
			}
			Error::DocumentNotBound => {
				(StatusCode::NOT_FOUND, "E-CORE-NOTBOUND", "Document not bound".to_string())
			}
			Error::Timeout => {
				(StatusCode::REQUEST_TIMEOUT, "E-NET-TIMEOUT", "Request timeout".to_string())
			}
			Error::InvalidMessage(msg) => {
				(StatusCode::BAD_REQUEST, "E-VAL-INVALID", msg)
			}
			Error::StoreUnavailable(_) => (
				StatusCode::SERVICE_UNAVAILABLE,
				"E-SYS-UNAVAIL",
				"Store temporarily unavailable".to_string(),
			),
			Error::RpcUnavailable(_) => (
				StatusCode::SERVICE_UNAVAILABLE,
				"E-NET-UNAVAIL",
				"Upstream service temporarily unavailable".to_string(),
			),
			Error::Internal(msg) => {
				tracing::error!("internal error: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "E-CORE-INTERNAL", "Internal server error".to_string())
			}
			Error::ConfigError(msg) => {
				tracing::error!("config error: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "E-CONF-CFGERR", "Internal server error".to_string())
			}
			Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "E-SYS-IO", "Internal server error".to_string()),
			Error::Json(_) => (StatusCode::INTERNAL_SERVER_ERROR, "E-CORE-PARSE", "Internal server error".to_string()),
		};

		(status, Json(ErrorResponse { code: code.to_string(), message })).into_response()
	}
}
