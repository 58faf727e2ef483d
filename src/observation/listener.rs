//! The listener callback contract.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ListenerError;

use super::event::Event;

/// How a listener wants its events delivered.
///
/// Read once when the listener is registered and stored on the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Inline on the committing thread, before dispatch returns.
    Synchronous,
    /// Later, on the dispatcher's delivery worker, in dispatch order.
    #[default]
    Asynchronous,
}

/// Receives change notifications.
///
/// Implementations may fail or panic; either way the failure is logged and
/// the listener simply misses that batch.
pub trait EventListener: Send + Sync {
    /// Called with the non-empty subset of a batch the listener's filter accepts.
    fn on_event(&self, events: &[Event]) -> Result<(), ListenerError>;

    /// Delivery capability of this listener.
    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Asynchronous
    }
}

/// Shared handle to a registered listener. Identity is the allocation it
/// points to, so clones of one handle denote the same listener.
pub type ListenerHandle = Arc<dyn EventListener>;

pub(crate) fn listener_addr(listener: &ListenerHandle) -> usize {
    Arc::as_ptr(listener).cast::<()>() as usize
}

/// Adapts a closure into a listener.
///
/// # Examples
///
/// ```
/// use repo_observation::{DeliveryMode, EventListener, FnListener};
///
/// let listener = FnListener::synchronous(|events| {
///     assert!(!events.is_empty());
///     Ok(())
/// });
/// assert_eq!(listener.delivery_mode(), DeliveryMode::Synchronous);
/// ```
pub struct FnListener<F> {
    mode: DeliveryMode,
    callback: F,
}

impl<F> FnListener<F>
where
    F: Fn(&[Event]) -> Result<(), ListenerError> + Send + Sync,
{
    /// Wraps `callback` with an explicit delivery mode.
    #[must_use]
    pub fn new(mode: DeliveryMode, callback: F) -> Self {
        Self { mode, callback }
    }

    /// A listener run inline on the committing thread.
    #[must_use]
    pub fn synchronous(callback: F) -> Self {
        Self::new(DeliveryMode::Synchronous, callback)
    }

    /// A listener run on the delivery worker.
    #[must_use]
    pub fn asynchronous(callback: F) -> Self {
        Self::new(DeliveryMode::Asynchronous, callback)
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&[Event]) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, events: &[Event]) -> Result<(), ListenerError> {
        (self.callback)(events)
    }

    fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").field("mode", &self.mode).finish_non_exhaustive()
    }
}
