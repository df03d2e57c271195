use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

/// The HTTP method of a [`Request`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a response body should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Decide based on the response: bodies without a `Content-Type` are [`Raw`](Self::Raw),
    /// everything else is [`Text`](Self::Text).
    #[default]
    Auto,
    /// Opaque bytes, stored as received.
    Raw,
    /// UTF-8 text.
    Text,
}

/// The unit of a [`CacheDuration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    /// 30 days.
    Month,
    /// 365 days.
    Year,
}

impl TimeUnit {
    pub const fn as_secs(self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 60 * 60,
            TimeUnit::Day => 24 * 60 * 60,
            TimeUnit::Month => 30 * 24 * 60 * 60,
            TimeUnit::Year => 365 * 24 * 60 * 60,
        }
    }
}

/// How long a cached response may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheDuration {
    pub value: u64,
    pub unit: TimeUnit,
}

impl CacheDuration {
    /// The validity used when long caching is enabled.
    pub const LONG: Self = Self::new(999, TimeUnit::Year);

    pub const fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.value.saturating_mul(self.unit.as_secs()))
    }
}

impl From<Duration> for CacheDuration {
    fn from(duration: Duration) -> Self {
        Self::new(duration.as_secs(), TimeUnit::Second)
    }
}

/// Opaque caller data echoed back with every update of a subscription.
pub type Extras = BTreeMap<String, String>;

/// A description of a single fetch.
///
/// Only the URL, the parameters, the headers and the body contribute to the
/// [`RequestKey`](crate::caching::RequestKey). Two requests differing only in method, cache
/// validity or extras share results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub method: Method,
    /// Parameters in insertion order. Sent as query for `GET`, and as a form body for
    /// `POST` and `PUT` without an explicit body.
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// An explicit request body, sent instead of the form-encoded parameters.
    pub body: Option<Bytes>,
    /// How long a cached response satisfies this request. Falls back to the configured default.
    pub cache_for: Option<CacheDuration>,
    /// Canned response data used instead of performing any network call.
    pub fake_data: Option<Bytes>,
    pub content_kind: ContentKind,
    pub extras: Extras,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn cache_for(mut self, value: u64, unit: TimeUnit) -> Self {
        self.cache_for = Some(CacheDuration::new(value, unit));
        self
    }

    pub fn fake_data(mut self, data: impl Into<Bytes>) -> Self {
        self.fake_data = Some(data.into());
        self
    }

    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = kind;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// An error that prevented a request from producing a response.
///
/// This is cloned into the outcome of every subscriber of a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request could not be turned into a key, for example because of a malformed URL.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The work unit was cancelled by a forced shutdown.
    #[error("request was cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    InternalError(String),
}
