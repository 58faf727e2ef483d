//! Per-session observation facade.
//!
//! Each session gets its own manager. It validates registration arguments
//! against the session's path and node-type collaborators, then forwards to
//! the shared dispatcher.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ObservationResult;
use crate::item::{NodeId, SessionId};
use crate::node_type::{NodeTypeId, NodeTypeResolver};
use crate::path::PathNormalizer;

use super::consumer::{ConsumerKey, EventConsumer};
use super::dispatcher::ObservationDispatcher;
use super::event::EventBatch;
use super::filter::{EventFilter, FilterSpec};
use super::listener::ListenerHandle;

/// Registration API for one session.
pub struct ObservationManager<'d> {
    dispatcher: &'d ObservationDispatcher,
    session: SessionId,
    paths: Arc<dyn PathNormalizer>,
    node_types: Arc<dyn NodeTypeResolver>,
    user_data: Mutex<Option<Arc<str>>>,
}

impl<'d> ObservationManager<'d> {
    pub(crate) fn new(
        dispatcher: &'d ObservationDispatcher,
        session: SessionId,
        paths: Arc<dyn PathNormalizer>,
        node_types: Arc<dyn NodeTypeResolver>,
    ) -> Self {
        Self {
            dispatcher,
            session,
            paths,
            node_types,
            user_data: Mutex::new(None),
        }
    }

    /// Session this manager registers listeners for.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session
    }

    /// Dispatcher shared by all sessions.
    #[must_use]
    pub const fn dispatcher(&self) -> &'d ObservationDispatcher {
        self.dispatcher
    }

    /// Registers `listener` for this session, replacing any earlier
    /// registration of the same listener.
    ///
    /// Fails with a configuration error for a malformed path or identifier
    /// or an unknown node type; nothing is registered in that case.
    pub fn register_listener(&self, listener: ListenerHandle, spec: FilterSpec) -> ObservationResult<()> {
        let path = self.paths.normalize(&spec.abs_path).inspect_err(|_| {
            debug!(path = %spec.abs_path, "invalid path syntax");
        })?;

        let ids = spec
            .identifiers
            .as_ref()
            .map(|ids| ids.iter().map(|id| id.parse::<NodeId>()).collect::<Result<HashSet<_>, _>>())
            .transpose()?;

        let node_types = spec
            .node_type_names
            .as_ref()
            .map(|names| self.resolve_node_types(names))
            .transpose()?;

        let filter = EventFilter::new(
            self.session,
            spec.event_types,
            path,
            spec.deep,
            ids,
            node_types,
            spec.no_local,
        );
        self.dispatcher.add_consumer(EventConsumer::new(self.session, listener, filter));
        Ok(())
    }

    fn resolve_node_types(&self, names: &[String]) -> ObservationResult<HashSet<NodeTypeId>> {
        let mut resolved = HashSet::new();
        for name in names {
            let id = self.node_types.resolve(name)?;
            resolved.insert(id);
            resolved.extend(self.node_types.subtypes(id));
        }
        Ok(resolved)
    }

    /// Unregisters `listener` from this session. Unknown listeners are ignored.
    pub fn unregister_listener(&self, listener: &ListenerHandle) {
        self.dispatcher.remove_consumer(&ConsumerKey::new(self.session, listener));
    }

    /// Listeners this session has registered, as of now.
    #[must_use]
    pub fn listeners(&self) -> ListenerIter {
        let (synchronous, asynchronous) = self.dispatcher.consumer_snapshots();
        let handles: Vec<ListenerHandle> = synchronous
            .iter()
            .chain(asynchronous.iter())
            .filter(|c| c.session() == self.session)
            .map(|c| Arc::clone(c.listener()))
            .collect();
        ListenerIter::new(handles)
    }

    /// Unregisters every listener of this session.
    pub fn dispose(&self) {
        for listener in self.listeners() {
            debug!(session = %self.session, "removing event listener");
            self.unregister_listener(&listener);
        }
    }

    /// Sets opaque data attached to events of batches created afterwards.
    pub fn set_user_data(&self, user_data: Option<String>) {
        *self.user_data.lock() = user_data.map(Arc::from);
    }

    /// A new, empty batch bound to this session.
    #[must_use]
    pub fn create_event_batch(&self) -> EventBatch {
        EventBatch::new(self.session, self.user_data.lock().clone())
    }
}

impl fmt::Debug for ObservationManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationManager")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// One-shot iterator over registered listeners.
pub struct ListenerIter {
    inner: std::vec::IntoIter<ListenerHandle>,
    position: usize,
    size: usize,
}

impl ListenerIter {
    fn new(handles: Vec<ListenerHandle>) -> Self {
        Self {
            size: handles.len(),
            inner: handles.into_iter(),
            position: 0,
        }
    }

    /// Number of listeners already returned.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Total number of listeners in the snapshot.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Iterator for ListenerIter {
    type Item = ListenerHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;
        self.position += 1;
        Some(next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ListenerIter {}

impl fmt::Debug for ListenerIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerIter")
            .field("position", &self.position)
            .field("size", &self.size)
            .finish()
    }
}
