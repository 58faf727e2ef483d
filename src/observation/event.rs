//! Change events and the batches a commit produces.
//!
//! A batch is owned and appendable while a session records its changes.
//! Handing it to the dispatcher moves it into a [`SealedBatch`], which is
//! shared read-only between synchronous delivery and the async queue.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{ItemId, NodeId, SessionId};
use crate::node_type::NodeTypeId;
use crate::path::NormalizedPath;

use super::filter::EventFilter;

/// Kind of content mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A node was added.
    NodeAdded,
    /// A node was removed.
    NodeRemoved,
    /// A property was added.
    PropertyAdded,
    /// A property was removed.
    PropertyRemoved,
    /// A property value changed.
    PropertyChanged,
}

impl EventType {
    /// The single-bit mask for this kind.
    #[must_use]
    pub const fn mask(self) -> EventTypes {
        match self {
            Self::NodeAdded => EventTypes::NODE_ADDED,
            Self::NodeRemoved => EventTypes::NODE_REMOVED,
            Self::PropertyAdded => EventTypes::PROPERTY_ADDED,
            Self::PropertyRemoved => EventTypes::PROPERTY_REMOVED,
            Self::PropertyChanged => EventTypes::PROPERTY_CHANGED,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NodeAdded => "node_added",
            Self::NodeRemoved => "node_removed",
            Self::PropertyAdded => "property_added",
            Self::PropertyRemoved => "property_removed",
            Self::PropertyChanged => "property_changed",
        };
        f.write_str(s)
    }
}

/// Bitmask of [`EventType`]s a listener is interested in.
///
/// Bits outside the known kinds are preserved but never match.
///
/// # Examples
///
/// ```
/// use repo_observation::{EventType, EventTypes};
///
/// let mask = EventTypes::NODE_ADDED | EventTypes::PROPERTY_CHANGED;
/// assert!(mask.contains(EventType::NodeAdded));
/// assert!(!mask.contains(EventType::NodeRemoved));
/// assert_eq!(mask.bits(), 17);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTypes(u32);

impl EventTypes {
    /// Matches no event.
    pub const NONE: Self = Self(0);
    /// Node additions.
    pub const NODE_ADDED: Self = Self(1);
    /// Node removals.
    pub const NODE_REMOVED: Self = Self(2);
    /// Property additions.
    pub const PROPERTY_ADDED: Self = Self(4);
    /// Property removals.
    pub const PROPERTY_REMOVED: Self = Self(8);
    /// Property value changes.
    pub const PROPERTY_CHANGED: Self = Self(16);
    /// Every event type.
    pub const ALL: Self = Self(1 | 2 | 4 | 8 | 16);

    /// Wraps a raw integer mask.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw mask value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if `kind` is in the mask.
    #[must_use]
    pub const fn contains(self, kind: EventType) -> bool {
        self.0 & kind.mask().0 != 0
    }

    /// Returns true if no type is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 & Self::ALL.0 == 0
    }
}

impl BitOr for EventTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<EventType> for EventTypes {
    fn from(kind: EventType) -> Self {
        kind.mask()
    }
}

/// One recorded content mutation.
///
/// Events are immutable. The originating session and user data are stamped
/// by the batch the change is recorded into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    kind: EventType,
    path: NormalizedPath,
    item: ItemId,
    parent: NodeId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parent_types: Vec<NodeTypeId>,
    session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_data: Option<Arc<str>>,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// What happened.
    #[must_use]
    pub const fn kind(&self) -> EventType {
        self.kind
    }

    /// Path of the affected item.
    #[must_use]
    pub const fn path(&self) -> &NormalizedPath {
        &self.path
    }

    /// Identity of the affected item.
    #[must_use]
    pub const fn item(&self) -> &ItemId {
        &self.item
    }

    /// Identity of the affected item's parent node.
    #[must_use]
    pub const fn parent(&self) -> NodeId {
        self.parent
    }

    /// Primary and mixin types of the parent node.
    #[must_use]
    pub fn parent_types(&self) -> &[NodeTypeId] {
        &self.parent_types
    }

    /// Session whose commit produced this event.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// User data of the batch that produced this event.
    #[must_use]
    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    /// Time the change was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A change as described by the recording session, before it is stamped
/// into a batch.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    kind: EventType,
    path: NormalizedPath,
    item: ItemId,
    parent: NodeId,
    parent_types: Vec<NodeTypeId>,
}

impl ChangeRecord {
    fn node(kind: EventType, path: NormalizedPath, id: NodeId, parent: NodeId) -> Self {
        Self {
            kind,
            path,
            item: ItemId::node(id),
            parent,
            parent_types: Vec::new(),
        }
    }

    fn property(kind: EventType, path: NormalizedPath, parent: NodeId) -> Self {
        let name = path.name().unwrap_or_default().to_string();
        Self {
            kind,
            item: ItemId::property(parent, name),
            path,
            parent,
            parent_types: Vec::new(),
        }
    }

    /// Node `id` was added under `parent`.
    #[must_use]
    pub fn node_added(path: NormalizedPath, id: NodeId, parent: NodeId) -> Self {
        Self::node(EventType::NodeAdded, path, id, parent)
    }

    /// Node `id` was removed from under `parent`.
    #[must_use]
    pub fn node_removed(path: NormalizedPath, id: NodeId, parent: NodeId) -> Self {
        Self::node(EventType::NodeRemoved, path, id, parent)
    }

    /// Property at `path` was added to `parent`.
    #[must_use]
    pub fn property_added(path: NormalizedPath, parent: NodeId) -> Self {
        Self::property(EventType::PropertyAdded, path, parent)
    }

    /// Property at `path` was removed from `parent`.
    #[must_use]
    pub fn property_removed(path: NormalizedPath, parent: NodeId) -> Self {
        Self::property(EventType::PropertyRemoved, path, parent)
    }

    /// Property at `path` on `parent` changed value.
    #[must_use]
    pub fn property_changed(path: NormalizedPath, parent: NodeId) -> Self {
        Self::property(EventType::PropertyChanged, path, parent)
    }

    /// Sets the parent node's primary and mixin types.
    #[must_use]
    pub fn with_parent_types(mut self, types: impl IntoIterator<Item = NodeTypeId>) -> Self {
        self.parent_types = types.into_iter().collect();
        self
    }
}

#[derive(Debug)]
struct PreparedSelection {
    // Held so the key address cannot be reused while the batch is alive.
    filter: Arc<EventFilter>,
    indices: Arc<[usize]>,
}

type SelectionMap = HashMap<usize, PreparedSelection>;

fn filter_key(filter: &Arc<EventFilter>) -> usize {
    Arc::as_ptr(filter) as usize
}

/// Ordered events from one commit, still open for recording.
#[derive(Debug)]
pub struct EventBatch {
    session: SessionId,
    user_data: Option<Arc<str>>,
    events: Vec<Event>,
    prepared: bool,
    selections: SelectionMap,
}

impl EventBatch {
    /// Creates an empty batch bound to `session`.
    #[must_use]
    pub fn new(session: SessionId, user_data: Option<Arc<str>>) -> Self {
        Self {
            session,
            user_data,
            events: Vec::new(),
            prepared: false,
            selections: HashMap::new(),
        }
    }

    /// Appends a change, stamping it with this batch's session and user data.
    pub fn record(&mut self, change: ChangeRecord) -> &Event {
        let index = self.events.len();
        self.events.push(Event {
            kind: change.kind,
            path: change.path,
            item: change.item,
            parent: change.parent,
            parent_types: change.parent_types,
            session: self.session,
            user_data: self.user_data.clone(),
            timestamp: Utc::now(),
        });
        &self.events[index]
    }

    /// Session that made the changes.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// User data stamped on recorded events.
    #[must_use]
    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    /// Events recorded so far, in order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns true once the dispatcher has prepared this batch.
    #[must_use]
    pub const fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub(crate) fn mark_prepared(&mut self) {
        self.prepared = true;
    }

    /// Attaches the indices of events `filter` accepts. The first attachment
    /// for a given filter wins.
    pub(crate) fn attach_selection(&mut self, filter: &Arc<EventFilter>, indices: Vec<usize>) {
        self.selections
            .entry(filter_key(filter))
            .or_insert_with(|| PreparedSelection {
                filter: Arc::clone(filter),
                indices: indices.into(),
            });
    }

    pub(crate) fn has_selection(&self, filter: &Arc<EventFilter>) -> bool {
        self.selections.contains_key(&filter_key(filter))
    }

    pub(crate) fn seal(self, sequence: u64) -> SealedBatch {
        SealedBatch {
            sequence,
            session: self.session,
            user_data: self.user_data,
            events: self.events,
            selections: self.selections,
        }
    }
}

/// A dispatched batch. Never modified after sealing.
#[derive(Debug)]
pub struct SealedBatch {
    sequence: u64,
    session: SessionId,
    user_data: Option<Arc<str>>,
    events: Vec<Event>,
    selections: SelectionMap,
}

impl SealedBatch {
    /// Dispatch sequence number, increasing per dispatcher.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Session that made the changes.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// User data of the batch.
    #[must_use]
    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    /// Events of the batch, in commit order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the batch has no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Selection prepared for exactly this filter instance, if any.
    pub(crate) fn selection_for(&self, filter: &Arc<EventFilter>) -> Option<&[usize]> {
        self.selections
            .get(&filter_key(filter))
            .filter(|s| Arc::ptr_eq(&s.filter, filter))
            .map(|s| &*s.indices)
    }
}
