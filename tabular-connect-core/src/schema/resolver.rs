//! Schema resolution: static declarations, dynamic inference and the rules
//! for reconciling backend-reported columns with declared fields.

use tracing::debug;

use crate::record::Value;
use crate::{ConnectorError, ConnectorResult};

use super::types::{ColumnMetadata, DeclaredSchema, FieldDescriptor, FieldType, SchemaDescriptor};

/// Resolves the schema a component produces records against.
///
/// Two modes, selected by the component's [`DeclaredSchema`]:
///
/// - **Static**: the schema is exactly the declared descriptor. It is locked;
///   resolution never alters it.
/// - **Dynamic** ([`DeclaredSchema::InferAll`]): the field list comes from the
///   backend. The source of truth for each field's type, in order: explicit
///   backend column metadata, then the runtime type of the first observed
///   non-null value, then a string fallback.
pub struct SchemaResolver;

impl SchemaResolver {
    /// Resolve a schema from the declaration, backend column metadata and an
    /// optional first observed row.
    ///
    /// `observed` pairs backend field names with the first non-null value seen
    /// for each field; it may be empty when no sample row is available.
    pub fn resolve(
        declared: &DeclaredSchema,
        columns: &[ColumnMetadata],
        observed: &[(String, Value)],
    ) -> ConnectorResult<SchemaDescriptor> {
        match declared {
            DeclaredSchema::Explicit(schema) => Ok(schema.clone()),
            DeclaredSchema::InferAll => Self::infer_all(columns, observed),
        }
    }

    /// Find the declared field a backend-reported name maps to.
    ///
    /// An exact match wins; otherwise the first field that matches ignoring
    /// letter case is taken, and its declared casing is what the pipeline
    /// sees.
    pub fn match_field<'a>(
        schema: &'a SchemaDescriptor,
        backend_name: &str,
    ) -> Option<&'a FieldDescriptor> {
        schema.field(backend_name).or_else(|| {
            schema
                .fields()
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(backend_name))
        })
    }

    /// Align a declared schema with the columns a backend actually reported.
    ///
    /// Output fields follow the backend column order; each column that matches
    /// a declared field (case-insensitively) adopts the declared descriptor
    /// wholesale, so declared casing, type and nullability win over whatever
    /// the backend observed. Columns with no declared counterpart are dropped.
    pub fn reconcile(
        declared: &SchemaDescriptor,
        columns: &[ColumnMetadata],
    ) -> SchemaDescriptor {
        let mut fields = Vec::with_capacity(columns.len());
        for column in columns {
            match Self::match_field(declared, &column.name) {
                Some(field) => fields.push(field.clone()),
                None => {
                    debug!(column = %column.name, "backend column has no declared field, dropping");
                }
            }
        }
        SchemaDescriptor::new(fields)
    }

    fn infer_all(
        columns: &[ColumnMetadata],
        observed: &[(String, Value)],
    ) -> ConnectorResult<SchemaDescriptor> {
        if !columns.is_empty() {
            let fields = columns
                .iter()
                .map(|column| {
                    let field_type = match column.field_type {
                        Some(FieldType::Decimal) => {
                            Self::narrow_numeric(column.length, column.scale)
                        }
                        Some(t) => t,
                        None => observed
                            .iter()
                            .find(|(name, value)| name == &column.name && !value.is_null())
                            .and_then(|(_, value)| value.field_type())
                            .unwrap_or(FieldType::String),
                    };
                    let mut field = FieldDescriptor::new(column.name.clone(), field_type);
                    field.nullable = column.nullable;
                    field.native_type = column.native_type.clone();
                    field
                })
                .collect();
            return Ok(SchemaDescriptor::new(fields));
        }

        if !observed.is_empty() {
            let fields = observed
                .iter()
                .map(|(name, value)| {
                    let field_type = value.field_type().unwrap_or(FieldType::String);
                    FieldDescriptor::new(name.clone(), field_type)
                })
                .collect();
            return Ok(SchemaDescriptor::new(fields));
        }

        Err(ConnectorError::inference(
            "neither a declared schema nor a backend probe produced any field",
        ))
    }

    /// Narrow a scale-0 fixed-point column by its declared digit length.
    ///
    /// Backends that cannot report true precision semantics still declare a
    /// digit length; lengths below 13 fit a 32-bit integer and lengths below
    /// 19 fit a 64-bit integer. Columns with nonzero scale are never narrowed.
    fn narrow_numeric(length: Option<u32>, scale: Option<u32>) -> FieldType {
        if scale != Some(0) {
            return FieldType::Decimal;
        }
        match length {
            Some(length) if length < 13 => FieldType::Int32,
            Some(length) if length < 19 => FieldType::Int64,
            _ => FieldType::Decimal,
        }
    }
}
