//! Schema description and resolution.
//!
//! A component's output shape is described by an immutable [`SchemaDescriptor`].
//! Descriptors are either declared explicitly in configuration (and then locked)
//! or resolved dynamically by probing the backend; see [`SchemaResolver`].

mod resolver;
mod types;

pub use resolver::SchemaResolver;
pub use types::{ColumnMetadata, DeclaredSchema, FieldDescriptor, FieldType, SchemaDescriptor};
