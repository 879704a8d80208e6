//! Schema data types: canonical field types, field descriptors and the
//! immutable schema descriptor.

use serde::{Deserialize, Serialize};

/// Canonical type tags for tabular field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Int32,
    Int64,
    Float,
    Double,
    Decimal,
    String,
    Bytes,
    Date,
    Timestamp,
}

/// Description of one field in a tabular schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, in the casing the pipeline sees.
    pub name: String,

    /// Canonical type tag.
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Whether null values are permitted. Defaults to `true`.
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Backend-native type name, when known (e.g. `"numeric"`, `"VARCHAR(255)"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_type: Option<String>,

    /// Format pattern for date/time rendering, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl FieldDescriptor {
    /// Create a nullable field with the given name and canonical type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            native_type: None,
            pattern: None,
        }
    }

    /// Mark the field as non-nullable.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Attach the backend-native type name.
    pub fn with_native_type(mut self, native_type: impl Into<String>) -> Self {
        self.native_type = Some(native_type.into());
        self
    }

    /// Attach a format pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// An ordered, typed field list describing the shape of records produced by a
/// reader.
///
/// Descriptors are immutable values. Deriving a variant (for example appending
/// a synthetic system field) constructs a new descriptor rather than mutating
/// in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    fields: Vec<FieldDescriptor>,
}

impl SchemaDescriptor {
    /// Create a descriptor from an ordered field list.
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    /// The ordered field list.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the descriptor declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field with the exact given name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of the exactly-named field.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Derive a new descriptor with a synthetic system field appended.
    ///
    /// This is the only permitted extension of a locked descriptor.
    pub fn with_system_field(&self, field: FieldDescriptor) -> SchemaDescriptor {
        let mut fields = self.fields.clone();
        fields.push(field);
        SchemaDescriptor::new(fields)
    }
}

/// A component's schema declaration: either an explicit, locked descriptor or
/// the marker asking the component to include every field the backend reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredSchema {
    /// The schema is exactly this descriptor; no runtime re-inference may
    /// alter it.
    Explicit(SchemaDescriptor),
    /// Resolve the full field list from the backend.
    InferAll,
}

impl DeclaredSchema {
    /// Whether this declaration asks for dynamic inference.
    pub fn is_infer_all(&self) -> bool {
        matches!(self, DeclaredSchema::InferAll)
    }
}

/// Column metadata reported by a backend probe (catalog query, result-set
/// metadata, parsed query grammar).
#[derive(Debug, Clone, Default)]
pub struct ColumnMetadata {
    /// Column name as the backend reports it.
    pub name: String,

    /// Backend-native type name.
    pub native_type: Option<String>,

    /// Canonical type the backend metadata maps to, when the probe can tell.
    pub field_type: Option<FieldType>,

    /// Declared digit length (precision) for fixed-point numeric columns.
    pub length: Option<u32>,

    /// Declared scale for fixed-point numeric columns.
    pub scale: Option<u32>,

    /// Whether the backend reports the column as nullable.
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create metadata for a column of unknown type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            ..Default::default()
        }
    }

    /// Set the canonical type reported by backend metadata.
    pub fn with_field_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    /// Set the backend-native type name.
    pub fn with_native_type(mut self, native_type: impl Into<String>) -> Self {
        self.native_type = Some(native_type.into());
        self
    }

    /// Set declared precision and scale.
    pub fn with_precision(mut self, length: u32, scale: u32) -> Self {
        self.length = Some(length);
        self.scale = Some(scale);
        self
    }

    /// Mark the column non-nullable.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_lookup() {
        let schema = SchemaDescriptor::new(vec![
            FieldDescriptor::new("id", FieldType::Int64).required(),
            FieldDescriptor::new("name", FieldType::String),
        ]);
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.position("name"), Some(1));
        assert!(schema.field("Name").is_none());
        assert!(!schema.field("id").unwrap().nullable);
    }

    #[test]
    fn test_with_system_field_derives_new_value() {
        let schema = SchemaDescriptor::new(vec![FieldDescriptor::new("id", FieldType::Int64)]);
        let derived = schema.with_system_field(
            FieldDescriptor::new("_fetched_at", FieldType::Timestamp).required(),
        );
        assert_eq!(schema.len(), 1);
        assert_eq!(derived.len(), 2);
        assert_eq!(derived.fields()[1].name, "_fetched_at");
    }

    #[test]
    fn test_field_descriptor_toml_roundtrip() {
        let toml = r#"
            name = "amount"
            type = "decimal"
            nullable = false
            native_type = "numeric"
        "#;
        let field: FieldDescriptor = toml::from_str(toml).unwrap();
        assert_eq!(field.field_type, FieldType::Decimal);
        assert!(!field.nullable);
        assert_eq!(field.native_type.as_deref(), Some("numeric"));
    }
}
