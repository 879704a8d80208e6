//! # Tabular Connect Core
//!
//! Core SDK for building tabular datastore components.
//!
//! This library provides the foundational framework for pipeline components
//! that read from and write to remote tabular datastores (relational
//! databases, SaaS APIs, cloud storage tables). It handles connection sharing
//! across pipeline stages, bounded iteration over paginated result sets,
//! schema resolution, and the fatal-vs-soft failure policy, allowing
//! connector developers to focus solely on talking to their backend.
//!
//! ## Overview
//!
//! Components come in two flavours:
//! - **Source**: read a finite remote result set and hand records to the
//!   pipeline
//! - **Sink**: accept records from the pipeline and write them to an external
//!   system
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tabular_connect_core::{
//!     ConnectorResult, CoreConfig, PipelineContext, SourceOrSink, ValidationResult,
//! };
//! use async_trait::async_trait;
//!
//! pub struct MySource {
//!     config: Option<CoreConfig>,
//! }
//!
//! #[async_trait]
//! impl SourceOrSink for MySource {
//!     type Config = CoreConfig;
//!
//!     async fn initialize(
//!         &mut self,
//!         _ctx: Option<&PipelineContext>,
//!         config: CoreConfig,
//!     ) -> ConnectorResult<()> {
//!         self.config = Some(config);
//!         Ok(())
//!     }
//!
//!     async fn validate(&mut self, _ctx: Option<&PipelineContext>) -> ValidationResult {
//!         ValidationResult::Ok
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Connection sharing**: components that reference another component's
//!   connection resolve to the identical physical connection within one
//!   pipeline run
//! - **Uniform pagination**: one `start`/`advance`/`get_current` protocol over
//!   cursors, locators, offsets and continuation tokens
//! - **Schema resolution**: declared schemas are locked; inferred schemas
//!   derive from backend metadata, observed values, and a string fallback
//! - **Failure policy**: a single `die_on_error` flag selects fatal or soft
//!   handling for every backend operation of a component
//! - **Observability**: structured logging and metrics throughout

mod component;
mod config;
mod error;
mod metrics;
mod pagination;
mod reader;
mod record;
mod registry;
mod retry;
mod runtime;
mod schema;
mod writer;

// Re-export public API
pub use component::{Sink, Source, SourceOrSink, ValidationResult};
pub use config::{ComponentConfig, CoreConfig};
pub use error::{ConnectorError, ConnectorResult, ErrorPolicy};
pub use metrics::ComponentMetrics;
pub use pagination::{ContinuationToken, Page, PageFetch};
pub use reader::{BoundedReader, PagedReader, ReturnStatistics, RowConverter};
pub use record::{Record, Value};
pub use registry::{resolve_connection, ConnectionHandle, PipelineContext};
pub use retry::{RetryConfig, RetryStrategy};
pub use runtime::SourceRuntime;
pub use schema::{
    ColumnMetadata, DeclaredSchema, FieldDescriptor, FieldType, SchemaDescriptor, SchemaResolver,
};
pub use writer::{RecordWriter, SinkWriter, WriteSink};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
