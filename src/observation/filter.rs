//! Event filters and the registration arguments they are built from.

use std::collections::HashSet;

use crate::item::{NodeId, SessionId};
use crate::node_type::NodeTypeId;
use crate::path::NormalizedPath;

use super::event::{Event, EventTypes};

/// Immutable predicate deciding which events a listener receives.
///
/// All checks apply to the parent node of the affected item: an event on
/// `/a/b` is in scope of a shallow filter at `/a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    session: SessionId,
    event_types: EventTypes,
    path: NormalizedPath,
    deep: bool,
    ids: Option<HashSet<NodeId>>,
    node_types: Option<HashSet<NodeTypeId>>,
    no_local: bool,
    block_all: bool,
}

impl EventFilter {
    /// Builds a filter owned by `session`.
    #[must_use]
    pub fn new(
        session: SessionId,
        event_types: EventTypes,
        path: NormalizedPath,
        deep: bool,
        ids: Option<HashSet<NodeId>>,
        node_types: Option<HashSet<NodeTypeId>>,
        no_local: bool,
    ) -> Self {
        Self {
            session,
            event_types,
            path,
            deep,
            ids,
            node_types,
            no_local,
            block_all: false,
        }
    }

    /// A filter that rejects every event.
    #[must_use]
    pub fn block_all(session: SessionId) -> Self {
        Self {
            session,
            event_types: EventTypes::NONE,
            path: NormalizedPath::root(),
            deep: false,
            ids: None,
            node_types: None,
            no_local: false,
            block_all: true,
        }
    }

    /// Returns true if `event` passes every condition of this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if self.block_all {
            return false;
        }
        if self.no_local && event.session() == self.session {
            return false;
        }
        if !self.event_types.contains(event.kind()) {
            return false;
        }
        if let Some(types) = &self.node_types {
            if !event.parent_types().iter().any(|t| types.contains(t)) {
                return false;
            }
        }

        let Some(parent_path) = event.path().parent() else {
            return false;
        };
        let in_scope = if self.deep {
            parent_path.is_descendant_or_self_of(&self.path)
        } else {
            parent_path == self.path
        };
        if !in_scope {
            return false;
        }

        match &self.ids {
            Some(ids) => ids.contains(&event.parent()),
            None => true,
        }
    }

    /// Indices of the events in `events` this filter accepts, in order.
    #[must_use]
    pub fn select(&self, events: &[Event]) -> Vec<usize> {
        events
            .iter()
            .enumerate()
            .filter(|(_, e)| self.matches(e))
            .map(|(i, _)| i)
            .collect()
    }

    /// Session that registered the filter.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Accepted event types.
    #[must_use]
    pub const fn event_types(&self) -> EventTypes {
        self.event_types
    }

    /// Scope path.
    #[must_use]
    pub const fn path(&self) -> &NormalizedPath {
        &self.path
    }

    /// Returns true if events below the scope path match too.
    #[must_use]
    pub const fn is_deep(&self) -> bool {
        self.deep
    }

    /// Returns true if this filter rejects everything.
    #[must_use]
    pub const fn is_block_all(&self) -> bool {
        self.block_all
    }
}

/// Registration arguments for a listener, as supplied by the caller.
///
/// Paths, identifiers and node-type names stay unparsed here; the
/// session's observation manager validates and resolves them.
///
/// # Examples
///
/// ```
/// use repo_observation::{EventTypes, FilterSpec};
///
/// let spec = FilterSpec::new(EventTypes::NODE_ADDED, "/content")
///     .deep(true)
///     .node_types(["nt:folder"])
///     .no_local(true);
/// assert!(spec.is_deep());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub(crate) event_types: EventTypes,
    pub(crate) abs_path: String,
    pub(crate) deep: bool,
    pub(crate) identifiers: Option<Vec<String>>,
    pub(crate) node_type_names: Option<Vec<String>>,
    pub(crate) no_local: bool,
}

impl FilterSpec {
    /// Arguments for events of `event_types` whose parent is exactly `abs_path`.
    #[must_use]
    pub fn new(event_types: EventTypes, abs_path: impl Into<String>) -> Self {
        Self {
            event_types,
            abs_path: abs_path.into(),
            deep: false,
            identifiers: None,
            node_type_names: None,
            no_local: false,
        }
    }

    /// Include the whole subtree below the path, not just its children.
    #[must_use]
    pub const fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    /// Restrict to events whose parent node has one of these identifiers.
    #[must_use]
    pub fn identifiers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifiers = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to events whose parent node is of one of these types or a
    /// subtype of one.
    #[must_use]
    pub fn node_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_type_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Drop events produced by the registering session itself.
    #[must_use]
    pub const fn no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    /// Whether the whole subtree below the path is observed.
    #[must_use]
    pub const fn is_deep(&self) -> bool {
        self.deep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::event::{ChangeRecord, EventBatch};

    fn path(raw: &str) -> NormalizedPath {
        NormalizedPath::parse(raw).unwrap()
    }

    fn filter(session: SessionId, types: EventTypes, scope: &str, deep: bool) -> EventFilter {
        EventFilter::new(session, types, path(scope), deep, None, None, false)
    }

    fn one_event(session: SessionId, change: ChangeRecord) -> Event {
        let mut batch = EventBatch::new(session, None);
        batch.record(change).clone()
    }

    #[test]
    fn test_shallow_scope_covers_direct_children_only() {
        let s = SessionId::new();
        let f = filter(s, EventTypes::ALL, "/a", false);
        let parent = NodeId::new();
        assert!(f.matches(&one_event(s, ChangeRecord::node_added(path("/a/x"), NodeId::new(), parent))));
        assert!(!f.matches(&one_event(s, ChangeRecord::node_added(path("/a/b/y"), NodeId::new(), parent))));
        assert!(!f.matches(&one_event(s, ChangeRecord::node_added(path("/a"), NodeId::new(), parent))));
    }

    #[test]
    fn test_deep_scope_covers_subtree() {
        let s = SessionId::new();
        let f = filter(s, EventTypes::ALL, "/a/b", true);
        let parent = NodeId::new();
        assert!(f.matches(&one_event(s, ChangeRecord::node_added(path("/a/b/y"), NodeId::new(), parent))));
        assert!(f.matches(&one_event(s, ChangeRecord::property_added(path("/a/b/c/d/p"), parent))));
        assert!(!f.matches(&one_event(s, ChangeRecord::node_added(path("/a/x"), NodeId::new(), parent))));
        assert!(!f.matches(&one_event(s, ChangeRecord::node_added(path("/a/bc/x"), NodeId::new(), parent))));
    }

    #[test]
    fn test_type_mask_is_applied() {
        let s = SessionId::new();
        let f = filter(s, EventTypes::NODE_ADDED, "/", true);
        let parent = NodeId::new();
        assert!(f.matches(&one_event(s, ChangeRecord::node_added(path("/n"), NodeId::new(), parent))));
        assert!(!f.matches(&one_event(s, ChangeRecord::node_removed(path("/n"), NodeId::new(), parent))));
    }

    #[test]
    fn test_no_local_drops_own_session() {
        let own = SessionId::new();
        let other = SessionId::new();
        let f = EventFilter::new(own, EventTypes::ALL, path("/"), true, None, None, true);
        let parent = NodeId::new();
        assert!(!f.matches(&one_event(own, ChangeRecord::node_added(path("/n"), NodeId::new(), parent))));
        assert!(f.matches(&one_event(other, ChangeRecord::node_added(path("/n"), NodeId::new(), parent))));
    }

    #[test]
    fn test_identifier_set_checks_parent() {
        let s = SessionId::new();
        let wanted = NodeId::new();
        let f = EventFilter::new(s, EventTypes::ALL, path("/"), true, Some(HashSet::from([wanted])), None, false);
        assert!(f.matches(&one_event(s, ChangeRecord::property_changed(path("/a/p"), wanted))));
        assert!(!f.matches(&one_event(s, ChangeRecord::property_changed(path("/a/p"), NodeId::new()))));
    }

    #[test]
    fn test_node_type_set_checks_parent_types() {
        let s = SessionId::new();
        let folder = NodeTypeId::from_raw(4);
        let file = NodeTypeId::from_raw(5);
        let f = EventFilter::new(s, EventTypes::ALL, path("/"), true, None, Some(HashSet::from([folder])), false);
        let parent = NodeId::new();
        let in_folder = ChangeRecord::node_added(path("/f/x"), NodeId::new(), parent).with_parent_types([folder]);
        let in_file = ChangeRecord::node_added(path("/g/x"), NodeId::new(), parent).with_parent_types([file]);
        let untyped = ChangeRecord::node_added(path("/h/x"), NodeId::new(), parent);
        assert!(f.matches(&one_event(s, in_folder)));
        assert!(!f.matches(&one_event(s, in_file)));
        assert!(!f.matches(&one_event(s, untyped)));
    }

    #[test]
    fn test_block_all_matches_nothing() {
        let s = SessionId::new();
        let f = EventFilter::block_all(s);
        assert!(f.is_block_all());
        assert!(!f.matches(&one_event(s, ChangeRecord::node_added(path("/n"), NodeId::new(), NodeId::new()))));
    }

    #[test]
    fn test_select_preserves_order() {
        let s = SessionId::new();
        let mut batch = EventBatch::new(s, None);
        let parent = NodeId::new();
        batch.record(ChangeRecord::node_added(path("/a/x"), NodeId::new(), parent));
        batch.record(ChangeRecord::node_added(path("/b/x"), NodeId::new(), parent));
        batch.record(ChangeRecord::node_removed(path("/a/y"), NodeId::new(), parent));
        let f = filter(s, EventTypes::ALL, "/a", false);
        assert_eq!(f.select(batch.events()), vec![0, 2]);
    }
}
