//! Registry bindings between a session, a listener and its filter.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::DeliveryError;
use crate::item::SessionId;

use super::event::{Event, EventBatch, SealedBatch};
use super::filter::EventFilter;
use super::listener::{listener_addr, DeliveryMode, ListenerHandle};

/// Registry identity of a consumer: the owning session plus the listener
/// allocation. The filter is not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerKey {
    session: SessionId,
    listener: usize,
}

impl ConsumerKey {
    /// Identity of `listener` registered by `session`.
    #[must_use]
    pub fn new(session: SessionId, listener: &ListenerHandle) -> Self {
        Self {
            session,
            listener: listener_addr(listener),
        }
    }

    /// Session that registered the listener.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }
}

impl fmt::Display for ConsumerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:#x}", self.session, self.listener)
    }
}

/// A registered `{session, listener, filter}` binding.
pub struct EventConsumer {
    key: ConsumerKey,
    listener: ListenerHandle,
    filter: Arc<EventFilter>,
    mode: DeliveryMode,
}

impl EventConsumer {
    /// Binds `listener` for `session`, capturing its delivery mode now.
    #[must_use]
    pub fn new(session: SessionId, listener: ListenerHandle, filter: EventFilter) -> Self {
        let mode = listener.delivery_mode();
        Self {
            key: ConsumerKey::new(session, &listener),
            listener,
            filter: Arc::new(filter),
            mode,
        }
    }

    /// Registry identity of this consumer.
    #[must_use]
    pub const fn key(&self) -> ConsumerKey {
        self.key
    }

    /// Session that owns this consumer.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.key.session
    }

    /// Listener events are delivered to.
    #[must_use]
    pub const fn listener(&self) -> &ListenerHandle {
        &self.listener
    }

    /// Filter selecting the events this consumer receives.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Delivery mode captured when the consumer was created.
    #[must_use]
    pub const fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Precomputes which events of `batch` this consumer's filter accepts.
    ///
    /// Consumers sharing a filter instance share the selection; a second
    /// call for the same filter is a no-op.
    pub(crate) fn prepare_events(&self, batch: &mut EventBatch) {
        if self.filter.is_block_all() || batch.has_selection(&self.filter) {
            return;
        }
        let indices = self.filter.select(batch.events());
        batch.attach_selection(&self.filter, indices);
    }

    /// Delivers the accepted subset of `batch`, if non-empty.
    ///
    /// Returns the number of events handed to the listener. Listener errors
    /// and panics come back as [`DeliveryError`]; nothing escapes.
    pub(crate) fn consume_events(&self, batch: &SealedBatch) -> Result<usize, DeliveryError> {
        let events: Vec<Event> = match batch.selection_for(&self.filter) {
            Some(indices) => indices.iter().map(|&i| batch.events()[i].clone()).collect(),
            None => batch
                .events()
                .iter()
                .filter(|e| self.filter.matches(e))
                .cloned()
                .collect(),
        };
        if events.is_empty() {
            return Ok(0);
        }

        let listener = &self.listener;
        match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&events))) {
            Ok(Ok(())) => Ok(events.len()),
            Ok(Err(err)) => Err(DeliveryError::Listener(err)),
            Err(payload) => Err(DeliveryError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

impl fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConsumer")
            .field("key", &self.key)
            .field("filter", &self.filter)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ListenerError;
    use crate::item::NodeId;
    use crate::observation::event::{ChangeRecord, EventTypes};
    use crate::observation::listener::FnListener;
    use crate::path::NormalizedPath;

    fn path(raw: &str) -> NormalizedPath {
        NormalizedPath::parse(raw).unwrap()
    }

    fn scoped(session: SessionId, scope: &str) -> EventFilter {
        EventFilter::new(session, EventTypes::ALL, path(scope), false, None, None, false)
    }

    fn batch_under_a(session: SessionId) -> EventBatch {
        let mut batch = EventBatch::new(session, None);
        let parent = NodeId::new();
        batch.record(ChangeRecord::node_added(path("/a/x"), NodeId::new(), parent));
        batch.record(ChangeRecord::node_added(path("/b/x"), NodeId::new(), parent));
        batch
    }

    #[test]
    fn test_key_ignores_filter() {
        let s = SessionId::new();
        let listener: ListenerHandle = Arc::new(FnListener::asynchronous(|_| Ok(())));
        let a = EventConsumer::new(s, Arc::clone(&listener), scoped(s, "/a"));
        let b = EventConsumer::new(s, Arc::clone(&listener), scoped(s, "/b"));
        assert_eq!(a.key(), b.key());
        let other_session = EventConsumer::new(SessionId::new(), listener, scoped(s, "/a"));
        assert_ne!(a.key(), other_session.key());
    }

    #[test]
    fn test_consume_delivers_only_matching_events() {
        let s = SessionId::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let listener: ListenerHandle = Arc::new(FnListener::synchronous(move |events| {
            sink.lock().unwrap().extend(events.iter().map(|e| e.path().to_string()));
            Ok(())
        }));
        let consumer = EventConsumer::new(s, listener, scoped(s, "/a"));
        let delivered = consumer.consume_events(&batch_under_a(s).seal(1)).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["/a/x".to_string()]);
    }

    #[test]
    fn test_consume_skips_listener_when_nothing_matches() {
        let s = SessionId::new();
        let listener: ListenerHandle = Arc::new(FnListener::asynchronous(|_| -> Result<(), ListenerError> {
            panic!("must not be called")
        }));
        let consumer = EventConsumer::new(s, listener, scoped(s, "/zzz"));
        assert_eq!(consumer.consume_events(&batch_under_a(s).seal(1)).unwrap(), 0);
    }

    #[test]
    fn test_prepared_selection_is_used() {
        let s = SessionId::new();
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let listener: ListenerHandle = Arc::new(FnListener::asynchronous(move |events| {
            *sink.lock().unwrap() += events.len();
            Ok(())
        }));
        let consumer = EventConsumer::new(s, listener, scoped(s, "/a"));
        let mut batch = batch_under_a(s);
        consumer.prepare_events(&mut batch);
        consumer.prepare_events(&mut batch);
        let sealed = batch.seal(7);
        assert_eq!(sealed.selection_for(&consumer.filter), Some(&[0usize][..]));
        assert_eq!(consumer.consume_events(&sealed).unwrap(), 1);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_stale_selection_is_ignored_for_new_filter() {
        let s = SessionId::new();
        let listener: ListenerHandle = Arc::new(FnListener::asynchronous(|_| Ok(())));
        let old = EventConsumer::new(s, Arc::clone(&listener), scoped(s, "/a"));
        let fresh = EventConsumer::new(s, listener, scoped(s, "/b"));
        let mut batch = batch_under_a(s);
        old.prepare_events(&mut batch);
        let sealed = batch.seal(1);
        assert!(sealed.selection_for(&fresh.filter).is_none());
        assert_eq!(fresh.consume_events(&sealed).unwrap(), 1);
    }

    #[test]
    fn test_errors_and_panics_are_captured() {
        let s = SessionId::new();
        let failing: ListenerHandle = Arc::new(FnListener::asynchronous(|_| Err("boom".into())));
        let panicking: ListenerHandle = Arc::new(FnListener::asynchronous(|_| -> Result<(), ListenerError> {
            panic!("listener exploded")
        }));
        let sealed = batch_under_a(s).seal(1);

        let err = EventConsumer::new(s, failing, scoped(s, "/a")).consume_events(&sealed).unwrap_err();
        assert!(matches!(err, DeliveryError::Listener(_)));

        let err = EventConsumer::new(s, panicking, scoped(s, "/a")).consume_events(&sealed).unwrap_err();
        match err {
            DeliveryError::Panicked(msg) => assert!(msg.contains("listener exploded")),
            other => panic!("expected panic capture, got {other:?}"),
        }
    }
}
