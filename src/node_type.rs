//! Node-type names and their inheritance.
//!
//! Listeners may restrict events to parent nodes of given types. A filter
//! naming `nt:hierarchyNode` must also accept `nt:folder` parents, so the
//! resolver exposes the subtype closure alongside name resolution.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Resolved identifier of a registered node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTypeId(u32);

impl NodeTypeId {
    /// Wraps a raw registry index.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for NodeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolves node-type names for listener registration.
pub trait NodeTypeResolver: Send + Sync {
    /// Resolves a node-type name, failing with
    /// [`ConfigurationError::UnknownNodeType`] for unregistered names.
    fn resolve(&self, name: &str) -> Result<NodeTypeId, ConfigurationError>;

    /// All registered types that inherit from `id`, directly or transitively.
    /// Does not include `id` itself.
    fn subtypes(&self, id: NodeTypeId) -> Vec<NodeTypeId>;
}

#[derive(Debug)]
struct TypeEntry {
    name: Arc<str>,
    supertypes: Vec<NodeTypeId>,
}

#[derive(Debug, Default)]
struct RegistryState {
    by_name: HashMap<Arc<str>, NodeTypeId>,
    types: Vec<TypeEntry>,
}

impl RegistryState {
    fn entry(&self, id: NodeTypeId) -> Option<&TypeEntry> {
        self.types.get(id.0 as usize)
    }

    fn inherits(&self, id: NodeTypeId, ancestor: NodeTypeId) -> bool {
        let mut stack = vec![id];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(entry) = self.entry(current) {
                stack.extend(entry.supertypes.iter().copied());
            }
        }
        false
    }
}

/// Thread-safe in-memory node-type registry.
///
/// # Examples
///
/// ```
/// use repo_observation::{NodeTypeRegistry, NodeTypeResolver};
///
/// let registry = NodeTypeRegistry::with_builtins();
/// let folder = registry.resolve("nt:folder").unwrap();
/// let hierarchy = registry.resolve("nt:hierarchyNode").unwrap();
/// assert!(registry.subtypes(hierarchy).contains(&folder));
/// ```
#[derive(Debug, Default)]
pub struct NodeTypeRegistry {
    state: RwLock<RegistryState>,
}

impl NodeTypeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with a small set of standard types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins: [(&str, &[&str]); 7] = [
            ("nt:base", &[]),
            ("mix:referenceable", &[]),
            ("nt:unstructured", &["nt:base"]),
            ("nt:hierarchyNode", &["nt:base"]),
            ("nt:folder", &["nt:hierarchyNode"]),
            ("nt:file", &["nt:hierarchyNode"]),
            ("nt:resource", &["nt:base", "mix:referenceable"]),
        ];
        for (name, supertypes) in builtins {
            // Builtins only reference earlier entries.
            let registered = registry.register(name, supertypes);
            debug_assert!(registered.is_ok(), "builtin node type {name} failed to register");
        }
        registry
    }

    /// Registers `name` with the given direct supertypes.
    ///
    /// Registering an existing name returns its current identifier and leaves
    /// its supertypes unchanged. Every supertype must already be registered.
    pub fn register(&self, name: &str, supertypes: &[&str]) -> Result<NodeTypeId, ConfigurationError> {
        let mut state = self.state.write();
        if let Some(id) = state.by_name.get(name) {
            return Ok(*id);
        }

        let mut resolved = Vec::with_capacity(supertypes.len());
        for supertype in supertypes {
            let id = state
                .by_name
                .get(*supertype)
                .copied()
                .ok_or_else(|| ConfigurationError::UnknownNodeType {
                    name: (*supertype).to_string(),
                })?;
            resolved.push(id);
        }

        let raw = u32::try_from(state.types.len()).map_err(|_| ConfigurationError::UnknownNodeType {
            name: name.to_string(),
        })?;
        let id = NodeTypeId(raw);
        let name: Arc<str> = Arc::from(name);
        state.types.push(TypeEntry {
            name: Arc::clone(&name),
            supertypes: resolved,
        });
        state.by_name.insert(name, id);
        Ok(id)
    }

    /// The registered name of `id`.
    #[must_use]
    pub fn name(&self, id: NodeTypeId) -> Option<Arc<str>> {
        self.state.read().entry(id).map(|e| Arc::clone(&e.name))
    }

    /// Returns true if `id` is `required` or inherits from it.
    #[must_use]
    pub fn is_node_type(&self, id: NodeTypeId, required: NodeTypeId) -> bool {
        self.state.read().inherits(id, required)
    }

    /// Number of registered node types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().types.len()
    }

    /// Returns true if no node type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeTypeResolver for NodeTypeRegistry {
    fn resolve(&self, name: &str) -> Result<NodeTypeId, ConfigurationError> {
        self.state
            .read()
            .by_name
            .get(name.trim())
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownNodeType {
                name: name.to_string(),
            })
    }

    fn subtypes(&self, id: NodeTypeId) -> Vec<NodeTypeId> {
        let state = self.state.read();
        (0..state.types.len())
            .filter_map(|raw| u32::try_from(raw).ok().map(NodeTypeId))
            .filter(|candidate| *candidate != id && state.inherits(*candidate, id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_unknown_name_fails() {
        let registry = NodeTypeRegistry::with_builtins();
        let err = registry.resolve("app:nothing").unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownNodeType {
                name: "app:nothing".to_string()
            }
        );
    }

    #[test]
    fn test_register_is_idempotent_by_name() {
        let registry = NodeTypeRegistry::new();
        let a = registry.register("app:a", &[]).unwrap();
        let again = registry.register("app:a", &[]).unwrap();
        assert_eq!(a, again);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_requires_known_supertypes() {
        let registry = NodeTypeRegistry::new();
        assert!(registry.register("app:child", &["app:missing"]).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subtypes_are_transitive() {
        let registry = NodeTypeRegistry::with_builtins();
        let base = registry.resolve("nt:base").unwrap();
        let folder = registry.resolve("nt:folder").unwrap();
        let hierarchy = registry.resolve("nt:hierarchyNode").unwrap();
        let subs = registry.subtypes(base);
        assert!(subs.contains(&folder));
        assert!(subs.contains(&hierarchy));
        assert!(!subs.contains(&base));
        assert!(registry.subtypes(folder).is_empty());
    }

    #[test]
    fn test_is_node_type_follows_multiple_inheritance() {
        let registry = NodeTypeRegistry::with_builtins();
        let resource = registry.resolve("nt:resource").unwrap();
        let referenceable = registry.resolve("mix:referenceable").unwrap();
        let folder = registry.resolve("nt:folder").unwrap();
        assert!(registry.is_node_type(resource, referenceable));
        assert!(registry.is_node_type(resource, resource));
        assert!(!registry.is_node_type(folder, referenceable));
        assert_eq!(registry.name(folder).as_deref(), Some("nt:folder"));
    }
}
