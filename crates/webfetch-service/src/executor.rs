//! A single execution of a request.
//!
//! The [`Executor`] runs the transport (or substitutes canned data), normalizes the body
//! according to its [`ContentKind`], persists the result and hands back exactly one outcome. It
//! knows nothing about subscribers; reporting the outcome is up to the caller.
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use uuid::Uuid;

use crate::caching::{CacheStore, RequestKey};
use crate::dispatch::ResponseInfo;
use crate::transport::{Transport, TransportResponse};
use crate::types::{ContentKind, FetchError, Request};

#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CacheStore>) -> Self {
        Self { transport, store }
    }

    /// Executes the request, returning the response or the reason it failed.
    ///
    /// Successful responses are written to the cache under `key` before returning. A failure to
    /// write the cache is logged, but does not fail the request.
    pub async fn run(&self, key: &RequestKey, request: &Request) -> Result<ResponseInfo, FetchError> {
        let start = Instant::now();
        let result = self.fetch(request).await;
        metric!(
            timer("requests.duration") = start.elapsed(),
            "outcome" => if result.is_ok() { "response" } else { "failed" },
        );

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(%key, url = %request.url, %error, "Request failed");
                return Err(error);
            }
        };

        self.persist(key, &response).await;
        Ok(response)
    }

    async fn fetch(&self, request: &Request) -> Result<ResponseInfo, FetchError> {
        if let Some(data) = &request.fake_data {
            tracing::trace!(url = %request.url, "Using canned response data");
            let content_kind = match request.content_kind {
                ContentKind::Auto => ContentKind::Text,
                kind => kind,
            };
            return Ok(ResponseInfo {
                status: Some(200),
                reason: Some("OK".into()),
                content_type: String::new(),
                content_kind,
                body: normalize_body(content_kind, data.clone()),
                from_cache: false,
            });
        }

        let TransportResponse {
            status,
            reason,
            content_type,
            body,
        } = self.transport.execute(request).await?;

        let content_kind = resolve_content_kind(request.content_kind, content_type.as_deref());
        Ok(ResponseInfo {
            status: Some(status),
            reason: Some(reason),
            content_type: content_type.unwrap_or_default(),
            content_kind,
            body: normalize_body(content_kind, body),
            from_cache: false,
        })
    }

    async fn persist(&self, key: &RequestKey, response: &ResponseInfo) {
        let store = self.store.clone();
        let entry_key = key.clone();
        let content_kind = response.content_kind;
        let body = response.body.clone();
        let mime_type = response.content_type.clone();

        let result = tokio::task::spawn_blocking(move || {
            store.put(&entry_key, Uuid::new_v4(), content_kind, body, &mime_type)
        })
        .await;

        let error: Box<dyn std::error::Error + Send + Sync> = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.into(),
            Err(e) => e.into(),
        };
        metric!(counter("cache.write_failed") += 1);
        tracing::error!(%key, error = error.as_ref() as &dyn std::error::Error, "Failed to write response to cache");
    }
}

/// Decides how a body is treated, given the requested kind and the response `Content-Type`.
///
/// Responses without a `Content-Type` are considered raw.
fn resolve_content_kind(requested: ContentKind, content_type: Option<&str>) -> ContentKind {
    match requested {
        ContentKind::Auto => match content_type {
            Some(_) => ContentKind::Text,
            None => ContentKind::Raw,
        },
        kind => kind,
    }
}

/// Makes sure that text bodies are valid UTF-8, replacing invalid sequences.
fn normalize_body(kind: ContentKind, body: Bytes) -> Bytes {
    if kind != ContentKind::Text || std::str::from_utf8(&body).is_ok() {
        return body;
    }
    Bytes::from(String::from_utf8_lossy(&body).into_owned())
}
