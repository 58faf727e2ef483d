//! Thread-safe consumer registry with cached snapshots.
//!
//! Both consumer sets and both cached snapshots sit behind one lock, so a
//! reader never sees a snapshot that disagrees with the pair of sets. Writes
//! clear the affected cache; the next read rebuilds it under the same lock.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use super::consumer::{ConsumerKey, EventConsumer};
use super::listener::DeliveryMode;

/// Immutable point-in-time copy of one consumer set, in registration order.
#[derive(Debug, Clone)]
pub struct ConsumerSnapshot {
    consumers: Arc<[Arc<EventConsumer>]>,
    version: u64,
}

impl ConsumerSnapshot {
    fn build(set: &ConsumerSet, version: u64) -> Self {
        let mut entries: Vec<&Entry> = set.values().collect();
        entries.sort_by_key(|e| e.seq);
        Self {
            consumers: entries.into_iter().map(|e| Arc::clone(&e.consumer)).collect(),
            version,
        }
    }

    /// Registry version this snapshot was built from.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns true if both snapshots share the same backing allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.consumers, &other.consumers)
    }
}

impl Deref for ConsumerSnapshot {
    type Target = [Arc<EventConsumer>];

    fn deref(&self) -> &Self::Target {
        &self.consumers
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    consumer: Arc<EventConsumer>,
}

type ConsumerSet = HashMap<ConsumerKey, Entry>;

#[derive(Debug, Default)]
struct RegistryState {
    synchronous: ConsumerSet,
    asynchronous: ConsumerSet,
    synchronous_snapshot: Option<ConsumerSnapshot>,
    asynchronous_snapshot: Option<ConsumerSnapshot>,
    next_seq: u64,
    version: u64,
}

impl RegistryState {
    fn set_mut(&mut self, mode: DeliveryMode) -> &mut ConsumerSet {
        match mode {
            DeliveryMode::Synchronous => &mut self.synchronous,
            DeliveryMode::Asynchronous => &mut self.asynchronous,
        }
    }

    fn invalidate(&mut self, mode: DeliveryMode) {
        self.version += 1;
        match mode {
            DeliveryMode::Synchronous => self.synchronous_snapshot = None,
            DeliveryMode::Asynchronous => self.asynchronous_snapshot = None,
        }
    }

    fn remove(&mut self, key: &ConsumerKey) -> Option<Arc<EventConsumer>> {
        for mode in [DeliveryMode::Synchronous, DeliveryMode::Asynchronous] {
            if let Some(entry) = self.set_mut(mode).remove(key) {
                self.invalidate(mode);
                return Some(entry.consumer);
            }
        }
        None
    }

    fn snapshot(&mut self, mode: DeliveryMode) -> ConsumerSnapshot {
        let version = self.version;
        let (set, cache) = match mode {
            DeliveryMode::Synchronous => (&self.synchronous, &mut self.synchronous_snapshot),
            DeliveryMode::Asynchronous => (&self.asynchronous, &mut self.asynchronous_snapshot),
        };
        cache.get_or_insert_with(|| ConsumerSnapshot::build(set, version)).clone()
    }
}

/// Registry of synchronous and asynchronous consumers.
///
/// A consumer lives in exactly one of the two sets, chosen by the delivery
/// mode it was registered with.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    state: Mutex<RegistryState>,
}

impl ConsumerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `consumer`, replacing any consumer with the same identity in
    /// either set. Returns the replaced consumer.
    pub fn add(&self, consumer: EventConsumer) -> Option<Arc<EventConsumer>> {
        let mut state = self.state.lock();
        let key = consumer.key();
        let mode = consumer.delivery_mode();
        let replaced = state.remove(&key);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.set_mut(mode).insert(
            key,
            Entry {
                seq,
                consumer: Arc::new(consumer),
            },
        );
        state.invalidate(mode);
        replaced
    }

    /// Removes the consumer with `key` from whichever set holds it.
    /// Absent keys are ignored.
    pub fn remove(&self, key: &ConsumerKey) -> Option<Arc<EventConsumer>> {
        self.state.lock().remove(key)
    }

    /// Snapshot of the set for `mode`, built on first read after a change.
    #[must_use]
    pub fn snapshot(&self, mode: DeliveryMode) -> ConsumerSnapshot {
        self.state.lock().snapshot(mode)
    }

    /// Synchronous and asynchronous snapshots taken under one lock.
    #[must_use]
    pub fn snapshots(&self) -> (ConsumerSnapshot, ConsumerSnapshot) {
        let mut state = self.state.lock();
        let synchronous = state.snapshot(DeliveryMode::Synchronous);
        let asynchronous = state.snapshot(DeliveryMode::Asynchronous);
        (synchronous, asynchronous)
    }

    /// Incremented on every mutation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Number of registered consumers in both sets.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.synchronous.len() + state.asynchronous.len()
    }

    /// Returns true if no consumer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::item::SessionId;
    use crate::observation::event::EventTypes;
    use crate::observation::filter::EventFilter;
    use crate::observation::listener::{FnListener, ListenerHandle};
    use crate::path::NormalizedPath;

    fn listener(mode: DeliveryMode) -> ListenerHandle {
        Arc::new(FnListener::new(mode, |_| Ok(())))
    }

    fn consumer(session: SessionId, listener: &ListenerHandle, scope: &str) -> EventConsumer {
        let filter = EventFilter::new(
            session,
            EventTypes::ALL,
            NormalizedPath::parse(scope).unwrap(),
            false,
            None,
            None,
            false,
        );
        EventConsumer::new(session, Arc::clone(listener), filter)
    }

    fn keys(snapshot: &ConsumerSnapshot) -> Vec<ConsumerKey> {
        snapshot.iter().map(|c| c.key()).collect()
    }

    #[test]
    fn test_add_partitions_by_mode() {
        let registry = ConsumerRegistry::new();
        let s = SessionId::new();
        let sync = listener(DeliveryMode::Synchronous);
        let asynchronous = listener(DeliveryMode::Asynchronous);
        registry.add(consumer(s, &sync, "/a"));
        registry.add(consumer(s, &asynchronous, "/a"));

        let (sync_snap, async_snap) = registry.snapshots();
        assert_eq!(keys(&sync_snap), vec![ConsumerKey::new(s, &sync)]);
        assert_eq!(keys(&async_snap), vec![ConsumerKey::new(s, &asynchronous)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reregistration_replaces_filter() {
        let registry = ConsumerRegistry::new();
        let s = SessionId::new();
        let l = listener(DeliveryMode::Asynchronous);
        assert!(registry.add(consumer(s, &l, "/old")).is_none());
        let replaced = registry.add(consumer(s, &l, "/new")).unwrap();
        assert_eq!(replaced.filter().path().as_str(), "/old");

        let snap = registry.snapshot(DeliveryMode::Asynchronous);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].filter().path().as_str(), "/new");
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = ConsumerRegistry::new();
        let l = listener(DeliveryMode::Synchronous);
        let before = registry.version();
        assert!(registry.remove(&ConsumerKey::new(SessionId::new(), &l)).is_none());
        assert_eq!(registry.version(), before);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_cached_until_mutation() {
        let registry = ConsumerRegistry::new();
        let s = SessionId::new();
        let a = listener(DeliveryMode::Asynchronous);
        let b = listener(DeliveryMode::Asynchronous);
        let sync = listener(DeliveryMode::Synchronous);
        registry.add(consumer(s, &a, "/"));

        let first = registry.snapshot(DeliveryMode::Asynchronous);
        let second = registry.snapshot(DeliveryMode::Asynchronous);
        assert!(first.ptr_eq(&second));

        // A synchronous change leaves the asynchronous cache alone.
        registry.add(consumer(s, &sync, "/"));
        assert!(first.ptr_eq(&registry.snapshot(DeliveryMode::Asynchronous)));

        registry.add(consumer(s, &b, "/"));
        let third = registry.snapshot(DeliveryMode::Asynchronous);
        assert!(!first.ptr_eq(&third));
        assert_eq!(first.len(), 1);
        assert_eq!(third.len(), 2);
        assert!(third.version() > first.version());
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let registry = ConsumerRegistry::new();
        let s = SessionId::new();
        let handles: Vec<_> = (0..5).map(|_| listener(DeliveryMode::Synchronous)).collect();
        for h in &handles {
            registry.add(consumer(s, h, "/"));
        }
        // Re-registering moves a consumer to the end.
        registry.add(consumer(s, &handles[1], "/x"));
        let expected: Vec<_> = [0, 2, 3, 4, 1].iter().map(|&i| ConsumerKey::new(s, &handles[i])).collect();
        assert_eq!(keys(&registry.snapshot(DeliveryMode::Synchronous)), expected);
    }

    #[test]
    fn test_union_matches_live_set_after_mixed_operations() {
        let registry = ConsumerRegistry::new();
        let sessions = [SessionId::new(), SessionId::new()];
        let handles: Vec<_> = (0..6)
            .map(|i| {
                listener(if i % 2 == 0 {
                    DeliveryMode::Synchronous
                } else {
                    DeliveryMode::Asynchronous
                })
            })
            .collect();

        let mut live = HashSet::new();
        for (step, h) in handles.iter().cycle().take(30).enumerate() {
            let session = sessions[step % 2];
            let key = ConsumerKey::new(session, h);
            if step % 3 == 2 {
                registry.remove(&key);
                live.remove(&key);
            } else {
                registry.add(consumer(session, h, "/"));
                live.insert(key);
            }

            let (sync_snap, async_snap) = registry.snapshots();
            let mut union: Vec<_> = keys(&sync_snap);
            union.extend(keys(&async_snap));
            let as_set: HashSet<_> = union.iter().copied().collect();
            assert_eq!(union.len(), as_set.len(), "duplicate consumer at step {step}");
            assert_eq!(as_set, live, "snapshot union diverged at step {step}");
        }
    }
}
