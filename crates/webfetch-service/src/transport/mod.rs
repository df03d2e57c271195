//! The network side of a work unit.
//!
//! A [`Transport`] performs exactly one request/response exchange. It is not responsible for
//! caching, retries or notifying anybody.
use bytes::Bytes;
use futures::future::BoxFuture;

use crate::types::Request;

mod http;

pub use http::ReqwestTransport;

/// The raw result of a request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// The reason phrase of the status line.
    pub reason: String,
    /// The `Content-Type` header, if the response had one.
    pub content_type: Option<String>,
    /// The body with any content encoding already removed.
    pub body: Bytes,
}

/// An error that prevented a request/response exchange.
///
/// Any response that was received, including error statuses, is not a [`TransportError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("failed to connect: {0}")]
    Connection(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("failed to build request: {0}")]
    Request(String),
}

/// Executes requests on behalf of a work unit.
pub trait Transport: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>>;
}
