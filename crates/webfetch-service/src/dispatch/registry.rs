use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::caching::RequestKey;
use crate::types::Extras;

use super::{Outcome, Record, State, SubscriberRef, UnknownRequest};

#[derive(Debug, Default)]
struct RegistryInner {
    records: HashMap<RequestKey, Arc<Record>>,
    paused: bool,
}

/// The table of all outstanding [`Record`]s.
///
/// Locks are always taken in the order registry first, record second. Subscribers are only ever
/// invoked after both locks have been released.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

/// The result of [`Registry::join_or_create`].
#[derive(Debug)]
pub(crate) enum Joined {
    /// The subscriber joined a request that is already outstanding.
    Existing(Arc<Record>),
    /// A new record was created, which needs a work unit to be started.
    Created(Arc<Record>),
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the subscriber to the outstanding record for `key`, or creates a new one.
    ///
    /// Records that are still in flight, or whose latest state has not been seen by anybody, are
    /// joined. A completed record is replaced by a fresh one. Checking for a record and creating
    /// it happens atomically, so concurrent callers for the same key end up on the same record.
    pub fn join_or_create(
        &self,
        key: &RequestKey,
        subscriber: SubscriberRef,
        extras: Arc<Extras>,
    ) -> Joined {
        let joined = {
            let mut inner = self.inner.lock();
            let existing = inner
                .records
                .get(key)
                .filter(|record| record.is_joinable())
                .cloned();
            match existing {
                Some(record) => {
                    record.subscribe(subscriber, extras);
                    Joined::Existing(record)
                }
                None => {
                    let record = Arc::new(Record::new(key.clone(), inner.paused));
                    record.subscribe(subscriber, extras);
                    inner.records.insert(key.clone(), record.clone());
                    metric!(gauge("dispatch.records") = inner.records.len() as u64);
                    Joined::Created(record)
                }
            }
        };

        match &joined {
            Joined::Existing(record) | Joined::Created(record) => record.deliver(),
        }
        joined
    }

    /// Attaches a subscriber to the outstanding record for `key`.
    ///
    /// The subscriber immediately receives the current state of the record.
    pub fn attach(
        &self,
        key: &RequestKey,
        subscriber: SubscriberRef,
        extras: Arc<Extras>,
    ) -> Result<(), UnknownRequest> {
        let record = {
            let inner = self.inner.lock();
            let record = inner
                .records
                .get(key)
                .ok_or_else(|| UnknownRequest(key.clone()))?;
            record.subscribe(subscriber, extras);
            record.clone()
        };
        record.deliver();
        Ok(())
    }

    /// Detaches a subscriber from every record it is attached to.
    ///
    /// Returns the number of records it was detached from. Detaching never cancels any work.
    pub fn detach(&self, subscriber: &SubscriberRef) -> usize {
        let mut inner = self.inner.lock();
        let mut detached = 0;
        inner.records.retain(|_, record| {
            if record.unsubscribe(subscriber) {
                detached += 1;
                !record.is_collectible()
            } else {
                true
            }
        });
        detached
    }

    /// Detaches all subscribers from all records.
    pub fn clear_subscribers(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut detached = 0;
        inner.records.retain(|_, record| {
            detached += record.unsubscribe_all();
            !record.is_collectible()
        });
        detached
    }

    /// Records a state change of `record` and delivers it to its subscribers.
    ///
    /// Once the record reached a terminal state that was delivered and nobody is subscribed
    /// anymore, it is removed from the registry.
    pub fn notify(&self, record: &Arc<Record>, state: State, outcome: Outcome) {
        if !record.transition(state, outcome) {
            return;
        }
        record.deliver();
        if state.is_terminal() {
            self.collect(record);
        }
    }

    /// Suspends delivery for all current and future records.
    pub fn pause_all(&self) {
        let mut inner = self.inner.lock();
        inner.paused = true;
        for record in inner.records.values() {
            record.pause();
        }
        tracing::debug!(records = inner.records.len(), "Paused dispatching");
    }

    /// Resumes delivery, giving every subscriber the latest state of its records.
    ///
    /// Records without subscribers remain pending, their result is kept for the next submission.
    pub fn resume_all(&self) {
        let records: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.paused = false;
            for record in inner.records.values() {
                record.resume();
            }
            inner.records.values().cloned().collect()
        };
        tracing::debug!(records = records.len(), "Resumed dispatching");

        for record in &records {
            record.deliver();
        }
        for record in &records {
            self.collect(record);
        }
    }

    /// Drops all records that are not pending.
    ///
    /// Returns the number of records that were removed.
    pub fn purge(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner.records.retain(|_, record| record.is_pending());
        before - inner.records.len()
    }

    /// Returns the current record for `key`.
    pub fn get(&self, key: &RequestKey) -> Option<Arc<Record>> {
        self.inner.lock().records.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Removes `record` if it is still the current record for its key and can be dropped.
    fn collect(&self, record: &Arc<Record>) {
        let mut inner = self.inner.lock();
        let is_current = inner
            .records
            .get(record.key())
            .is_some_and(|current| Arc::ptr_eq(current, record));
        if is_current && record.is_collectible() {
            inner.records.remove(record.key());
            tracing::trace!(key = %record.key(), "Dropped completed record");
        }
    }
}
