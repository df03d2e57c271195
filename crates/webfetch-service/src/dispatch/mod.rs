//! # Dispatching request lifecycles to subscribers
//!
//! Every outstanding request is tracked by a dispatch record, keyed by its [`RequestKey`]. A
//! record moves through the [`State`]s `Created → Running → {Finished | Failed}` and fans every
//! transition out to its [`Subscriber`]s.
//!
//! Delivery guarantees:
//!
//! - Every subscriber sees the states of a record in order, and each state at most once.
//! - A subscriber attaching to a record that already progressed first receives the current state,
//!   and then any later ones.
//! - While dispatching is paused, nothing is delivered. On resume, every subscriber receives the
//!   latest state it has not seen yet, and only that.
//! - Subscribers are invoked without any internal lock held, so they may call back into the
//!   dispatcher. A panicking subscriber does not affect other subscribers.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::caching::RequestKey;
use crate::types::{ContentKind, Extras, FetchError};

mod record;
mod registry;

pub(crate) use record::Record;
pub(crate) use registry::{Joined, Registry};

/// The lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// The request was accepted and waits for a free worker.
    Created,
    /// The request is being executed.
    Running,
    /// A response was received or served from cache.
    Finished,
    /// The request could not be completed.
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Finished | State::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Created => "created",
            State::Running => "running",
            State::Finished => "finished",
            State::Failed => "failed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    /// The status code, not known for responses served from the cache.
    pub status: Option<u16>,
    /// The reason phrase of the status line, not known for responses served from the cache.
    pub reason: Option<String>,
    /// The `Content-Type` of the response, empty for canned data.
    pub content_type: String,
    pub content_kind: ContentKind,
    pub body: Bytes,
    /// Whether the response was served from the cache without running a request.
    pub from_cache: bool,
}

impl ResponseInfo {
    /// Returns the body as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// What is known about the result of a request in a given [`State`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No result yet.
    Pending,
    Response(ResponseInfo),
    Failed(FetchError),
}

/// A lifecycle notification for a single subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub key: RequestKey,
    pub state: State,
    pub outcome: Outcome,
    /// The extras of the request that created this subscription.
    pub extras: Arc<Extras>,
}

impl Update {
    pub fn response(&self) -> Option<&ResponseInfo> {
        match &self.outcome {
            Outcome::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.outcome {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// A consumer of request lifecycle [`Update`]s.
pub trait Subscriber: Send + Sync + 'static {
    fn on_update(&self, update: &Update);
}

impl<F> Subscriber for F
where
    F: Fn(&Update) + Send + Sync + 'static,
{
    fn on_update(&self, update: &Update) {
        self(update)
    }
}

/// A shared handle to a [`Subscriber`].
///
/// Handles compare equal when they point to the same subscriber instance, which is what
/// deduplication and detaching is based on. Clone the handle to attach the same subscriber to
/// multiple requests.
#[derive(Clone)]
pub struct SubscriberRef(Arc<dyn Subscriber>);

impl SubscriberRef {
    pub fn new(subscriber: impl Subscriber) -> Self {
        Self(Arc::new(subscriber))
    }

    pub fn from_arc(subscriber: Arc<dyn Subscriber>) -> Self {
        Self(subscriber)
    }
}

impl PartialEq for SubscriberRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for SubscriberRef {}

impl fmt::Debug for SubscriberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriberRef")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Invokes a subscriber, containing any panic it raises.
pub(crate) fn invoke(subscriber: &SubscriberRef, update: &Update) {
    tracing::trace!(key = %update.key, state = %update.state, "Notifying subscriber");
    let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber.0.on_update(update)));
    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic>");
        tracing::error!(
            key = %update.key,
            state = %update.state,
            panic = message,
            "Subscriber panicked while handling an update",
        );
        metric!(counter("subscriber.panicked") += 1);
    }
}

/// A [`Subscriber`] forwarding all updates into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    sender: mpsc::UnboundedSender<Update>,
}

impl ChannelSubscriber {
    /// Creates a subscriber, returning its handle and the receiving end of the channel.
    pub fn channel() -> (SubscriberRef, mpsc::UnboundedReceiver<Update>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (SubscriberRef::new(Self { sender }), receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_update(&self, update: &Update) {
        // the receiver going away just means nobody is interested anymore
        let _ = self.sender.send(update.clone());
    }
}

/// The error returned when attaching to a request that is not outstanding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no outstanding request for key {0}")]
pub struct UnknownRequest(pub RequestKey);
