use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

use crate::types::{FetchError, Request};

/// The identity of a [`Request`].
///
/// Requests with equal URL, parameters, headers and body map to the same key. The key is
/// derived from a stable, human readable description of those fields, which is kept around to
/// help debugging cache contents.
#[derive(Debug, Clone, Eq)]
pub struct RequestKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for RequestKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for RequestKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl RequestKey {
    /// Computes the key for the given [`Request`].
    ///
    /// Fails with [`FetchError::InvalidRequest`] if the URL is not an absolute `http` or
    /// `https` URL.
    pub fn for_request(request: &Request) -> Result<Self, FetchError> {
        let url = parse_url(&request.url)?;
        Self::build(url.as_str(), request).map_err(|e| FetchError::InternalError(e.to_string()))
    }

    /// Computes a key for a [`Request`] without validating its URL.
    ///
    /// This is used to address updates about requests that were rejected by
    /// [`for_request`](Self::for_request).
    pub(crate) fn unchecked(request: &Request) -> Self {
        Self::build(&request.url, request).unwrap_or_else(|_| {
            RequestKeyBuilder {
                metadata: format!("url: {}\n", request.url),
            }
            .build()
        })
    }

    fn build(url: &str, request: &Request) -> Result<Self, fmt::Error> {
        let mut builder = RequestKeyBuilder::new(url);
        builder.write_request(request)?;
        Ok(builder.build())
    }

    /// Returns the human-readable metadata that forms the basis of the [`RequestKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the relative path for this key.
    ///
    /// The relative path is a sha-256 hash hex-formatted like so:
    /// `aa/bbccdd/eeff...`
    pub fn cache_path(&self) -> String {
        let mut path = format!("{:02x}/", self.hash[0]);
        for b in &self.hash[1..4] {
            let _ = write!(path, "{b:02x}");
        }
        path.push('/');
        for b in &self.hash[4..] {
            let _ = write!(path, "{b:02x}");
        }
        path
    }

    #[cfg(test)]
    pub fn for_testing(key: impl Into<String>) -> Self {
        RequestKeyBuilder {
            metadata: key.into(),
        }
        .build()
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidRequest(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(FetchError::InvalidRequest(format!(
            "{url}: unsupported scheme `{scheme}`"
        ))),
    }
}

/// A builder for [`RequestKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the intention of it is to
/// accept human readable, but most importantly **stable**, input.
/// Entries are written in request order, so reordering parameters or headers yields a different
/// key.
pub struct RequestKeyBuilder {
    metadata: String,
}

impl RequestKeyBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            metadata: format!("url: {url}\n"),
        }
    }

    /// Writes the parameters, headers and body of the [`Request`] into the key.
    pub fn write_request(&mut self, request: &Request) -> fmt::Result {
        for (key, value) in &request.params {
            writeln!(self, "param: {key:?}={value:?}")?;
        }
        for (key, value) in &request.headers {
            writeln!(self, "header: {key:?}={value:?}")?;
        }
        if let Some(body) = &request.body {
            let digest = Sha256::digest(body);
            write!(self, "body: {} ", body.len())?;
            for b in digest.iter() {
                write!(self, "{b:02x}")?;
            }
            writeln!(self)?;
        }
        Ok(())
    }

    /// Finalize the [`RequestKey`].
    pub fn build(self) -> RequestKey {
        let hash = Sha256::digest(&self.metadata).into();

        RequestKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for RequestKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
