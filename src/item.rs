//! Identity types for sessions and repository items.
//!
//! Events name the item they affect by identity as well as by path, so a
//! listener can follow an item across moves. Node identities are UUIDs;
//! properties are identified by their parent node plus their name.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;

/// Identity of a repository session.
///
/// Every event records the session whose commit produced it, which is what
/// no-local filtering compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a session ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a node.
///
/// # Examples
///
/// ```
/// use repo_observation::NodeId;
///
/// let id: NodeId = "6f1f3a1e-3f0c-4c4e-9a55-0b7f6a2f9a10".parse().unwrap();
/// assert_eq!(id.to_string(), "6f1f3a1e-3f0c-4c4e-9a55-0b7f6a2f9a10");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a node ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ConfigurationError::InvalidIdentifier { value: s.to_string() })
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identity of the item an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemId {
    /// A node, identified by its own UUID.
    Node {
        id: NodeId,
    },

    /// A property, identified by its parent node and name.
    Property {
        parent: NodeId,
        name: Arc<str>,
    },
}

impl ItemId {
    /// Identity of a node item.
    #[must_use]
    pub const fn node(id: NodeId) -> Self {
        Self::Node { id }
    }

    /// Identity of a property item.
    #[must_use]
    pub fn property(parent: NodeId, name: impl Into<Arc<str>>) -> Self {
        Self::Property {
            parent,
            name: name.into(),
        }
    }

    /// Returns true if this denotes a node.
    #[must_use]
    pub const fn denotes_node(&self) -> bool {
        matches!(self, Self::Node { .. })
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node { id } => write!(f, "{id}"),
            Self::Property { parent, name } => write!(f, "{parent}/{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<NodeId>().unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::InvalidIdentifier {
                value: "not-a-uuid".to_string()
            }
        );
    }

    #[test]
    fn test_node_id_parse_trims_whitespace() {
        let id = NodeId::new();
        let parsed: NodeId = format!("  {id} ").parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_item_id_display() {
        let parent = NodeId::new();
        let prop = ItemId::property(parent, "jcr:title");
        assert_eq!(prop.to_string(), format!("{parent}/jcr:title"));
        assert!(!prop.denotes_node());
        assert!(ItemId::node(parent).denotes_node());
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
