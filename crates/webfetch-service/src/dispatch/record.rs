use std::sync::Arc;

use parking_lot::Mutex;

use crate::caching::RequestKey;
use crate::types::Extras;

use super::{Outcome, State, SubscriberRef, Update, invoke};

/// One entry in the lifecycle of a record.
#[derive(Debug, Clone)]
struct Snapshot {
    state: State,
    outcome: Outcome,
}

#[derive(Debug)]
struct Subscription {
    subscriber: SubscriberRef,
    extras: Arc<Extras>,
    /// Number of snapshots this subscription has been given, or skipped over.
    delivered: usize,
}

#[derive(Debug)]
struct RecordInner {
    /// All states this record went through, the last one being the current state.
    ///
    /// A record only ever moves forward through its states, so this holds at most three
    /// snapshots.
    history: Vec<Snapshot>,
    /// Subscriptions in attachment order.
    subscriptions: Vec<Subscription>,
    /// A state change was swallowed, either because nobody was subscribed or because
    /// dispatching was paused.
    pending: bool,
    /// Dispatching is paused.
    paused: bool,
    /// Some thread is currently invoking subscribers of this record.
    draining: bool,
}

impl RecordInner {
    fn current(&self) -> &Snapshot {
        // `history` is never empty, it starts out with `Created`.
        &self.history[self.history.len() - 1]
    }

    fn position(&self, subscriber: &SubscriberRef) -> Option<usize> {
        self.subscriptions
            .iter()
            .position(|s| &s.subscriber == subscriber)
    }

    /// Picks the next delivery, in attachment order.
    ///
    /// The subscription is marked as having seen the snapshot before the delivery is handed
    /// out, so every snapshot reaches every subscription at most once.
    fn next_delivery(&mut self, key: &RequestKey) -> Option<(SubscriberRef, Update)> {
        if self.paused {
            return None;
        }
        let revision = self.history.len();
        let subscription = self
            .subscriptions
            .iter_mut()
            .find(|s| s.delivered < revision)?;
        let snapshot = &self.history[subscription.delivered];
        subscription.delivered += 1;

        let update = Update {
            key: key.clone(),
            state: snapshot.state,
            outcome: snapshot.outcome.clone(),
            extras: subscription.extras.clone(),
        };
        Some((subscription.subscriber.clone(), update))
    }
}

/// The dispatch record of a single outstanding request.
///
/// The record owns the lifecycle state of the request and the list of its subscribers. Methods
/// that change what subscribers need to see only update the bookkeeping; the actual callbacks are
/// invoked by [`deliver`](Self::deliver), which must be called without holding any lock.
#[derive(Debug)]
pub(crate) struct Record {
    key: RequestKey,
    inner: Mutex<RecordInner>,
}

impl Record {
    pub fn new(key: RequestKey, paused: bool) -> Self {
        let created = Snapshot {
            state: State::Created,
            outcome: Outcome::Pending,
        };
        Self {
            key,
            inner: Mutex::new(RecordInner {
                history: vec![created],
                subscriptions: Vec::new(),
                pending: paused,
                paused,
                draining: false,
            }),
        }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn state(&self) -> State {
        self.inner.lock().current().state
    }

    pub fn outcome(&self) -> Outcome {
        self.inner.lock().current().outcome.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Whether a new submission for the same key should join this record.
    pub fn is_joinable(&self) -> bool {
        let inner = self.inner.lock();
        !inner.current().state.is_terminal() || inner.pending
    }

    /// Whether the record can be dropped from the registry.
    pub fn is_collectible(&self) -> bool {
        let inner = self.inner.lock();
        inner.current().state.is_terminal() && inner.subscriptions.is_empty() && !inner.pending
    }

    /// Adds a subscriber, to be given the current state on the next [`deliver`](Self::deliver).
    ///
    /// Returns `false` if the subscriber was already attached, in which case its original
    /// subscription is kept as is.
    pub fn subscribe(&self, subscriber: SubscriberRef, extras: Arc<Extras>) -> bool {
        let mut inner = self.inner.lock();
        if inner.position(&subscriber).is_some() {
            return false;
        }

        let delivered = inner.history.len() - 1;
        inner.subscriptions.push(Subscription {
            subscriber,
            extras,
            delivered,
        });
        // the current state reaches somebody now, unless we are paused
        inner.pending = inner.paused;
        true
    }

    /// Removes a subscriber, returning whether it was attached.
    pub fn unsubscribe(&self, subscriber: &SubscriberRef) -> bool {
        let mut inner = self.inner.lock();
        match inner.position(subscriber) {
            Some(index) => {
                inner.subscriptions.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes all subscribers, returning how many there were.
    pub fn unsubscribe_all(&self) -> usize {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.subscriptions).len()
    }

    /// Records a state change.
    ///
    /// The state is always recorded, even if nobody is there to receive it. In that case, or
    /// while paused, the record becomes pending. Changes after a terminal state are ignored.
    pub fn transition(&self, state: State, outcome: Outcome) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.current().state;
        if current.is_terminal() {
            tracing::warn!(
                key = %self.key,
                %current,
                ignored = %state,
                "Ignoring state change of a completed request",
            );
            return false;
        }

        inner.history.push(Snapshot { state, outcome });
        if inner.subscriptions.is_empty() || inner.paused {
            inner.pending = true;
        }
        true
    }

    /// Suspends all deliveries.
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        inner.paused = true;
        inner.pending = true;
    }

    /// Lifts a [`pause`](Self::pause).
    ///
    /// Every subscriber receives the latest state once more, skipping whatever it missed in
    /// between. A terminal state is only replayed to subscribers that have not seen it yet, so
    /// nobody is told about a completed request twice. Without any subscribers the record stays
    /// pending until somebody joins it.
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.paused = false;
        inner.pending = inner.subscriptions.is_empty();
        let latest = inner.history.len() - 1;
        let terminal = inner.current().state.is_terminal();
        for subscription in &mut inner.subscriptions {
            subscription.delivered = if terminal {
                subscription.delivered.max(latest)
            } else {
                latest
            };
        }
    }

    /// Invokes subscribers for all outstanding deliveries.
    ///
    /// Only one thread delivers for a record at any time, which keeps the order of updates
    /// intact. If another thread is already delivering, this returns immediately and the other
    /// thread picks up whatever was added in the meantime.
    ///
    /// Deliveries are picked one at a time, so a subscriber detached by an earlier callback does
    /// not receive anything anymore.
    pub fn deliver(&self) {
        let mut inner = self.inner.lock();
        if inner.draining {
            return;
        }

        loop {
            let Some((subscriber, update)) = inner.next_delivery(&self.key) else {
                inner.draining = false;
                return;
            };
            inner.draining = true;
            drop(inner);

            invoke(&subscriber, &update);

            inner = self.inner.lock();
        }
    }
}
