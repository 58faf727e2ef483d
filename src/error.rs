//! Error types for the observation subsystem.
//!
//! Registration problems are returned to the caller as strongly typed
//! errors. Listener failures never reach the committing thread: they are
//! captured as [`DeliveryError`] at the call site, logged, and dropped.

use thiserror::Error;

/// Error type a listener callback may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised synchronously while registering a listener.
///
/// When one of these is returned, no registration has taken place.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid path syntax '{path}': {reason}")]
    InvalidPath {
        path: String,
        reason: String,
    },

    #[error("Unknown node type: {name}")]
    UnknownNodeType {
        name: String,
    },

    #[error("Invalid node identifier '{value}'")]
    InvalidIdentifier {
        value: String,
    },
}

impl ConfigurationError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A listener failed while events were being delivered to it.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("listener returned an error: {0}")]
    Listener(#[source] ListenerError),

    #[error("listener panicked: {0}")]
    Panicked(String),
}

/// Top-level error type for the observation subsystem.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ObservationError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a registration-time configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for observation operations.
pub type ObservationResult<T> = Result<T, ObservationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_message() {
        let err = ConfigurationError::invalid_path("a/b", "path must be absolute");
        let msg = format!("{err}");
        assert!(msg.contains("a/b"));
        assert!(msg.contains("absolute"));
    }

    #[test]
    fn test_unknown_node_type_message() {
        let err = ConfigurationError::UnknownNodeType {
            name: "app:missing".to_string(),
        };
        assert!(format!("{err}").contains("app:missing"));
    }

    #[test]
    fn test_observation_error_from_configuration() {
        let err: ObservationError = ConfigurationError::InvalidIdentifier {
            value: "not-a-uuid".to_string(),
        }
        .into();
        assert!(err.is_configuration());
        assert!(!err.is_internal());
        assert!(format!("{err}").contains("not-a-uuid"));
    }

    #[test]
    fn test_observation_error_internal() {
        let err = ObservationError::internal("worker did not start");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("worker did not start"));
    }

    #[test]
    fn test_delivery_error_keeps_source() {
        let inner: ListenerError = "disk full".into();
        let err = DeliveryError::Listener(inner);
        assert!(format!("{err}").contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
