//! Component lifecycle contracts.
//!
//! The pipeline engine drives every component through the same strict order:
//! `initialize` binds configuration, `validate` checks it (and proves
//! reachability where the backend requires it), and only then is a reader or
//! writer created. Design time and runtime execution differ in exactly one
//! way: whether a [`PipelineContext`] is supplied.

use async_trait::async_trait;

use crate::config::ComponentConfig;
use crate::reader::BoundedReader;
use crate::registry::PipelineContext;
use crate::writer::RecordWriter;
use crate::{ConnectorError, ConnectorResult};

/// Outcome of component validation.
///
/// Ordinary validation failures are values, not errors: `validate` never
/// propagates them as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The component is ready for use.
    Ok,
    /// The component cannot be used as configured.
    Error(String),
}

impl ValidationResult {
    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Fold a fallible check into a validation result.
    pub fn from_error(err: &ConnectorError) -> Self {
        Self::Error(err.to_string())
    }

    /// Whether validation passed.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// The failure message, if validation failed.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Ok => None,
            Self::Error(message) => Some(message),
        }
    }
}

/// Lifecycle shared by sources and sinks.
///
/// State progression: uninitialized → initialized → validated → (connected) →
/// closed. `initialize` does not necessarily open a physical connection;
/// opening is deferred to first use.
#[async_trait]
pub trait SourceOrSink: Send {
    /// Connector-specific configuration, embedding a
    /// [`CoreConfig`](crate::CoreConfig).
    type Config: ComponentConfig;

    /// Bind configuration to this component instance.
    async fn initialize(
        &mut self,
        ctx: Option<&PipelineContext>,
        config: Self::Config,
    ) -> ConnectorResult<()>;

    /// Check the bound configuration and, for components that must prove
    /// reachability, attempt a lightweight connection or probe.
    async fn validate(&mut self, ctx: Option<&PipelineContext>) -> ValidationResult;
}

/// A component that produces records from a remote datastore.
#[async_trait]
pub trait Source: SourceOrSink {
    /// Create a reader over this source's result set.
    async fn create_reader(
        &mut self,
        ctx: Option<&PipelineContext>,
    ) -> ConnectorResult<Box<dyn BoundedReader>>;
}

/// A component that writes records to a remote datastore.
#[async_trait]
pub trait Sink: SourceOrSink {
    /// Create a writer against this sink's target.
    async fn create_writer(
        &mut self,
        ctx: Option<&PipelineContext>,
    ) -> ConnectorResult<Box<dyn RecordWriter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_result() {
        assert!(ValidationResult::Ok.is_ok());
        assert_eq!(ValidationResult::Ok.message(), None);

        let failed = ValidationResult::error("'Account' is required");
        assert!(!failed.is_ok());
        assert_eq!(failed.message(), Some("'Account' is required"));
    }

    #[test]
    fn test_validation_result_from_error() {
        let err = ConnectorError::config("fetch_size must be > 0");
        let result = ValidationResult::from_error(&err);
        assert_eq!(
            result.message(),
            Some("configuration error: fetch_size must be > 0")
        );
    }
}
