use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header;

use crate::caching::parse_url;
use crate::config::Config;
use crate::types::{Method, Request};

use super::{Transport, TransportError, TransportResponse};

/// A [`Transport`] backed by a [`reqwest::Client`].
///
/// Responses encoded with gzip, brotli or deflate are inflated transparently, and the matching
/// `Accept-Encoding` header is sent unless the request carries its own. Parameters are sent as
/// query string for `GET` and `DELETE`, and as a form body for `POST` and `PUT` unless the request
/// has an explicit body.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport using the timeouts and user agent from the [`Config`].
    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.max_request_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(&self, request: &Request) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = parse_url(&request.url).map_err(|e| TransportError::Request(e.to_string()))?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let params_in_query =
            matches!(request.method, Method::Get | Method::Delete) || request.body.is_some();
        if params_in_query && !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        builder = match (request.method, &request.body) {
            (Method::Post | Method::Put, None) => builder.form(&request.params),
            (Method::Post | Method::Put, Some(body)) => builder.body(body.clone()),
            (Method::Get | Method::Delete, _) => builder,
        };

        Ok(builder)
    }
}

impl Transport for ReqwestTransport {
    fn execute<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let builder = self.build_request(request)?;

            tracing::debug!(method = %request.method, url = %request.url, "Sending request");
            let response = builder.send().await.map_err(map_error)?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let body = response.bytes().await.map_err(map_error)?;

            tracing::debug!(
                url = %request.url,
                status = status.as_u16(),
                size = body.len(),
                "Received response",
            );

            Ok(TransportResponse {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_owned(),
                content_type,
                body,
            })
        })
    }
}

fn map_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_builder() {
        TransportError::Request(error.to_string())
    } else if error.is_body() || error.is_decode() {
        TransportError::Body(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}
