//! # repo-observation - change notification for a content repository
//!
//! When a session commits a set of content mutations, registered listeners
//! are told about them: synchronous listeners inline before the commit call
//! returns, asynchronous listeners later on a dedicated delivery worker. A
//! slow or failing listener never fails a commit.
//!
//! ## Core Concepts
//!
//! - **Event**: one recorded mutation (kind, item path and identity, origin)
//! - **EventBatch**: the ordered events of one commit
//! - **EventFilter**: which events a listener wants (types, path scope, ids, node types)
//! - **ObservationDispatcher**: shared registry plus delivery worker
//! - **ObservationManager**: per-session registration API
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use repo_observation::{
//!     ChangeRecord, DispatcherConfig, EventTypes, FilterSpec, FnListener, NodeId,
//!     NodeTypeRegistry, NormalizedPath, ObservationDispatcher, SessionId, StandardPathNormalizer,
//! };
//!
//! let dispatcher = ObservationDispatcher::new(DispatcherConfig::default())?;
//! let session = dispatcher.create_manager(
//!     SessionId::new(),
//!     Arc::new(StandardPathNormalizer),
//!     Arc::new(NodeTypeRegistry::with_builtins()),
//! );
//!
//! session.register_listener(
//!     Arc::new(FnListener::synchronous(|events| {
//!         println!("{} change(s)", events.len());
//!         Ok(())
//!     })),
//!     FilterSpec::new(EventTypes::NODE_ADDED, "/content").deep(true),
//! )?;
//!
//! let mut batch = session.create_event_batch();
//! batch.record(ChangeRecord::node_added(
//!     NormalizedPath::parse("/content/page")?,
//!     NodeId::new(),
//!     NodeId::new(),
//! ));
//! dispatcher.dispatch_events(batch);
//!
//! drop(session);
//! dispatcher.dispose();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod item;
pub mod node_type;
pub mod observation;
pub mod path;

// Re-export primary types at crate root for convenience
pub use error::{ConfigurationError, DeliveryError, ListenerError, ObservationError, ObservationResult};
pub use item::{ItemId, NodeId, SessionId};
pub use node_type::{NodeTypeId, NodeTypeRegistry, NodeTypeResolver};
pub use observation::{
    ChangeRecord, ConsumerKey, ConsumerRegistry, ConsumerSnapshot, DeliveryMode, DispatchStats,
    DispatcherConfig, Event, EventBatch, EventConsumer, EventFilter, EventListener, EventType,
    EventTypes, FilterSpec, FnListener, ListenerHandle, ListenerIter, ObservationDispatcher,
    ObservationManager, SealedBatch,
};
pub use path::{NormalizedPath, PathNormalizer, StandardPathNormalizer};
