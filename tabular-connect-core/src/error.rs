//! Error types for component operations.
//!
//! Every failure a component can surface falls into one of five kinds:
//!
//! - [`ConnectorError::Configuration`]: caught during `validate`, surfaced as a
//!   [`ValidationResult`](crate::ValidationResult) rather than aborting the process
//! - [`ConnectorError::ConnectionResolution`]: no usable connection could be obtained
//! - [`ConnectorError::BackendOperation`]: a backend call failed; whether this aborts
//!   the pipeline is decided by the component's [`ErrorPolicy`]
//! - [`ConnectorError::SchemaInference`]: no field list could be derived
//! - [`ConnectorError::NoCurrentElement`]: reader misuse, always fatal

use thiserror::Error;

/// Result type used throughout the framework.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors that can occur in component operations.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Invalid or incomplete configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// A declared connection reference could not be resolved to a usable connection.
    #[error("connection resolution error: {message}")]
    ConnectionResolution {
        /// Error message
        message: String,
    },

    /// A backend call (query execution, page fetch, write) failed.
    #[error("backend operation error: {message}")]
    BackendOperation {
        /// Error message
        message: String,
        /// Underlying backend error, if available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Neither the declared schema nor a backend probe produced a field list.
    #[error("schema inference error: {message}")]
    SchemaInference {
        /// Error message
        message: String,
    },

    /// `get_current` was invoked while the reader is not positioned on a record.
    #[error("reader has no current record")]
    NoCurrentElement,
}

impl ConnectorError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection resolution error.
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::ConnectionResolution {
            message: message.into(),
        }
    }

    /// Create a backend operation error without an underlying cause.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendOperation {
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend operation error wrapping the underlying backend error.
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BackendOperation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a schema inference error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::SchemaInference {
            message: message.into(),
        }
    }

    /// Whether this error is a backend operation failure, the only kind whose
    /// fatality is governed by [`ErrorPolicy`].
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::BackendOperation { .. })
    }

    /// Stable name of the error kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::ConnectionResolution { .. } => "connection_resolution",
            Self::BackendOperation { .. } => "backend_operation",
            Self::SchemaInference { .. } => "schema_inference",
            Self::NoCurrentElement => "no_current_element",
        }
    }
}

/// Failure handling policy for backend operations, chosen once per component
/// instance by the `die_on_error` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Any backend failure aborts the running pipeline stage immediately.
    Fatal,
    /// Backend failures are recorded (message plus counter) and the operation
    /// reports a benign negative result instead of propagating.
    Soft,
}

impl ErrorPolicy {
    /// Map the `die_on_error` configuration flag to a policy.
    pub fn from_die_on_error(die_on_error: bool) -> Self {
        if die_on_error {
            Self::Fatal
        } else {
            Self::Soft
        }
    }

    /// Whether backend failures abort the pipeline stage.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_helpers() {
        assert!(matches!(
            ConnectorError::config("bad"),
            ConnectorError::Configuration { .. }
        ));
        assert!(matches!(
            ConnectorError::resolution("no handle"),
            ConnectorError::ConnectionResolution { .. }
        ));
        assert!(matches!(
            ConnectorError::inference("no fields"),
            ConnectorError::SchemaInference { .. }
        ));
        assert!(ConnectorError::backend("boom").is_backend());
        assert!(!ConnectorError::NoCurrentElement.is_backend());
    }

    #[test]
    fn test_backend_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectorError::backend_with_source("query failed", io);
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
        assert_eq!(err.to_string(), "backend operation error: query failed");
    }

    #[test]
    fn test_policy_from_flag() {
        assert_eq!(ErrorPolicy::from_die_on_error(true), ErrorPolicy::Fatal);
        assert_eq!(ErrorPolicy::from_die_on_error(false), ErrorPolicy::Soft);
        assert!(ErrorPolicy::Fatal.is_fatal());
        assert!(!ErrorPolicy::Soft.is_fatal());
    }
}
