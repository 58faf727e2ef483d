//! Change observation for the content repository.
//!
//! Sessions register listeners through their [`ObservationManager`]. At
//! commit time the storage layer prepares and dispatches the session's
//! [`EventBatch`] through the shared [`ObservationDispatcher`]: synchronous
//! listeners run inline, asynchronous ones on the dispatcher's worker.

/// Registry bindings between sessions, listeners and filters.
pub mod consumer;
/// Dispatcher, delivery worker and configuration.
pub mod dispatcher;
/// Events and event batches.
pub mod event;
/// Event filters and registration arguments.
pub mod filter;
/// Listener callback contract.
pub mod listener;
/// Per-session facade.
pub mod manager;
/// Consumer registry and snapshots.
pub mod registry;

pub use consumer::{ConsumerKey, EventConsumer};
pub use dispatcher::{DispatchStats, DispatcherConfig, ObservationDispatcher};
pub use event::{ChangeRecord, Event, EventBatch, EventType, EventTypes, SealedBatch};
pub use filter::{EventFilter, FilterSpec};
pub use listener::{DeliveryMode, EventListener, FnListener, ListenerHandle};
pub use manager::{ListenerIter, ObservationManager};
pub use registry::{ConsumerRegistry, ConsumerSnapshot};
