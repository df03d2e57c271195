//! The coalescing request service.
//!
//! [`Dispatcher`] is the main interface of this crate. Every [`submit`](Dispatcher::submit) takes
//! one of three paths:
//!
//! 1. A fresh enough response exists in the cache. It is delivered to the subscriber right away,
//!    without any record or work being created.
//! 2. A request with the same [`RequestKey`] is already outstanding. The subscriber joins it and
//!    receives its current state, followed by all later ones.
//! 3. Otherwise a new record is created and a work unit is queued on the worker pool.
//!
//! The service requires an asynchronous runtime for executing requests, ideally one dedicated to
//! I/O. Submitting itself is synchronous and may be called from anywhere, including from within a
//! subscriber callback.
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::FutureExt;
use tokio::runtime::Handle;

use crate::caching::{self, CacheStore, CachedResponse, RequestKey};
use crate::config::Config;
use crate::dispatch::{
    Joined, Outcome, Record, Registry, ResponseInfo, State, SubscriberRef, UnknownRequest,
    Update, invoke,
};
use crate::executor::Executor;
use crate::pool::WorkerPool;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{CacheDuration, FetchError, Request};
use crate::utils::defer::defer;

#[derive(Debug)]
struct DispatcherInner {
    registry: Registry,
    store: Arc<dyn CacheStore>,
    executor: Executor,
    pool: WorkerPool,
    default_validity: CacheDuration,
    long_cache: bool,
    shutdown_timeout: Duration,
}

/// Coalesces identical requests and fans their lifecycle out to subscribers.
///
/// This is cheap to clone, all clones share the same state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Creates a dispatcher with the cache store and HTTP transport selected by `config`.
    ///
    /// Requests are executed on the runtime behind `io_pool`.
    pub fn create(config: &Config, io_pool: Handle) -> Result<Self> {
        let store = caching::open_store(config).context("failed to open response cache")?;
        let transport =
            ReqwestTransport::from_config(config).context("failed to create HTTP client")?;

        Ok(Self::new(config, io_pool, Arc::new(transport), store))
    }

    pub fn new(
        config: &Config,
        io_pool: Handle,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let executor = Executor::new(transport, store.clone());
        let pool = WorkerPool::new(io_pool, config.pool_size);

        Self {
            inner: Arc::new(DispatcherInner {
                registry: Registry::new(),
                store,
                executor,
                pool,
                default_validity: config.default_validity(),
                long_cache: config.long_cache,
                shutdown_timeout: config.shutdown_timeout,
            }),
        }
    }

    /// Submits a request on behalf of `subscriber`, returning the key it is tracked under.
    ///
    /// Identical requests that are outstanding at the same time are executed only once. Updates
    /// about the request are delivered to `subscriber`, possibly before this returns. Invalid
    /// requests are reported to the subscriber as [`FetchError::InvalidRequest`].
    pub fn submit(&self, mut request: Request, subscriber: SubscriberRef) -> RequestKey {
        metric!(counter("requests.submit") += 1);
        let extras = Arc::new(std::mem::take(&mut request.extras));

        let key = match RequestKey::for_request(&request) {
            Ok(key) => key,
            Err(error) => {
                metric!(counter("requests.invalid") += 1);
                let key = RequestKey::unchecked(&request);
                tracing::debug!(%key, url = %request.url, %error, "Rejecting invalid request");
                let update = Update {
                    key: key.clone(),
                    state: State::Failed,
                    outcome: Outcome::Failed(error),
                    extras,
                };
                invoke(&subscriber, &update);
                return key;
            }
        };

        let validity = self.validity(&request);
        if let Some(response) = self.lookup(&key, validity) {
            metric!(counter("requests.cache_hit") += 1);
            tracing::trace!(%key, "Serving request from cache");
            let update = Update {
                key: key.clone(),
                state: State::Finished,
                outcome: Outcome::Response(response),
                extras,
            };
            invoke(&subscriber, &update);
            return key;
        }

        match self.inner.registry.join_or_create(&key, subscriber, extras) {
            Joined::Existing(_) => {
                metric!(counter("requests.coalesced") += 1);
                tracing::trace!(%key, "Joined outstanding request");
            }
            Joined::Created(record) => {
                metric!(counter("requests.work_unit") += 1);
                tracing::trace!(%key, url = %request.url, "Starting request");
                self.start(record, request);
            }
        }
        key
    }

    /// The validity a cached response needs for `request`.
    fn validity(&self, request: &Request) -> Duration {
        let validity = if self.inner.long_cache {
            CacheDuration::LONG
        } else {
            request.cache_for.unwrap_or(self.inner.default_validity)
        };
        validity.as_duration()
    }

    fn lookup(&self, key: &RequestKey, validity: Duration) -> Option<ResponseInfo> {
        if !self.inner.store.contains(key, Some(validity)) {
            return None;
        }
        let Some(entry) = self.inner.store.get(key) else {
            tracing::debug!(%key, "Cache entry vanished during lookup");
            return None;
        };

        Some(ResponseInfo {
            status: None,
            reason: None,
            content_type: entry.metadata.mime_type,
            content_kind: entry.metadata.content_kind,
            body: entry.body,
            from_cache: true,
        })
    }

    /// Queues the work unit for a freshly created record.
    ///
    /// The record is guaranteed to reach a terminal state: if the work unit is dropped before it
    /// completes, either because the pool is shut down or because it was cancelled, the record
    /// fails with [`FetchError::Cancelled`]. A record that never got a worker still passes through
    /// [`State::Running`] first.
    fn start(&self, record: Arc<Record>, request: Request) {
        let cancel_guard = {
            let inner = self.inner.clone();
            let record = record.clone();
            defer(move || {
                tracing::debug!(key = %record.key(), "Request was cancelled");
                if record.state() == State::Created {
                    inner
                        .registry
                        .notify(&record, State::Running, Outcome::Pending);
                }
                let outcome = Outcome::Failed(FetchError::Cancelled);
                inner.registry.notify(&record, State::Failed, outcome);
            })
        };

        let inner = self.inner.clone();
        let work = async move {
            inner
                .registry
                .notify(&record, State::Running, Outcome::Pending);

            let result = AssertUnwindSafe(inner.executor.run(record.key(), &request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(key = %record.key(), "Request panicked");
                    Err(FetchError::InternalError("request panicked".into()))
                });
            cancel_guard.disarm();

            let (state, outcome) = match result {
                Ok(response) => (State::Finished, Outcome::Response(response)),
                Err(error) => (State::Failed, Outcome::Failed(error)),
            };
            inner.registry.notify(&record, state, outcome);
        };

        if let Err(error) = self.inner.pool.spawn(work) {
            // dropping the work unit fails the record
            tracing::warn!(%error, "Could not queue request");
        }
    }

    /// Attaches a subscriber to an outstanding request.
    ///
    /// The subscriber receives the current state of the request right away.
    pub fn attach(&self, key: &RequestKey, subscriber: SubscriberRef) -> Result<(), UnknownRequest> {
        self.inner
            .registry
            .attach(key, subscriber, Default::default())
    }

    /// Detaches a subscriber from all requests, returning how many it was attached to.
    ///
    /// The requests themselves continue and their responses are cached.
    pub fn detach(&self, subscriber: &SubscriberRef) -> usize {
        self.inner.registry.detach(subscriber)
    }

    /// Detaches all subscribers from all requests.
    pub fn clear_subscribers(&self) -> usize {
        self.inner.registry.clear_subscribers()
    }

    /// Holds back all updates until [`resume_all`](Self::resume_all).
    ///
    /// Requests keep executing while paused. Cache hits are still delivered right away, as they
    /// are answered directly by [`submit`](Self::submit).
    pub fn pause_all(&self) {
        self.inner.registry.pause_all()
    }

    /// Resumes updates, giving each subscriber the latest state of its requests.
    pub fn resume_all(&self) {
        self.inner.registry.resume_all()
    }

    /// The state of the outstanding request for `key`.
    pub fn state(&self, key: &RequestKey) -> Option<State> {
        self.inner.registry.get(key).map(|record| record.state())
    }

    /// The number of requests currently tracked.
    ///
    /// Completed requests stay tracked until somebody has seen their result.
    pub fn outstanding(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns the cached entry for `key`, regardless of its age.
    pub fn cached(&self, key: &RequestKey) -> Option<CachedResponse> {
        self.inner.store.get(key)
    }

    /// Returns the cached body for `key`, regardless of its age.
    pub fn response_bytes(&self, key: &RequestKey) -> Option<Bytes> {
        self.cached(key).map(|entry| entry.body)
    }

    /// Returns the cached body for `key` as text, replacing invalid UTF-8 sequences.
    pub fn response_string(&self, key: &RequestKey) -> Option<String> {
        self.response_bytes(key)
            .map(|body| String::from_utf8_lossy(&body).into_owned())
    }

    /// Removes all cached responses.
    pub fn clear_cache(&self) -> io::Result<()> {
        tracing::info!("Clearing response cache");
        self.inner.store.clear()
    }

    /// Shuts down gracefully, see [`shutdown_with`](Self::shutdown_with).
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with(true).await
    }

    /// Stops accepting new work and tears down the dispatcher.
    ///
    /// With `drain`, outstanding requests get up to the configured `shutdown_timeout` to
    /// complete. Requests still outstanding after that, or all of them without `drain`, fail with
    /// [`FetchError::Cancelled`]. Finally, all records whose results were delivered are dropped.
    ///
    /// Returns `true` if no request had to be cancelled. Submissions after shutdown fail with
    /// [`FetchError::Cancelled`].
    pub async fn shutdown_with(&self, drain: bool) -> bool {
        tracing::info!(drain, "Shutting down dispatcher");
        let completed = self
            .inner
            .pool
            .shutdown(drain, self.inner.shutdown_timeout)
            .await;
        let purged = self.inner.registry.purge();
        tracing::info!(
            completed,
            purged,
            remaining = self.inner.registry.len(),
            "Dispatcher shut down",
        );
        completed
    }
}
