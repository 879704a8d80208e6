//! Record and value types produced by readers and consumed by writers.

use crate::schema::{FieldType, SchemaDescriptor};
use crate::{ConnectorError, ConnectorResult};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};

/// A single field value in its canonical runtime representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Decimal(BigDecimal),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The canonical type tag of this value, or `None` for null, which carries
    /// no type information of its own.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(FieldType::Boolean),
            Value::Int32(_) => Some(FieldType::Int32),
            Value::Int64(_) => Some(FieldType::Int64),
            Value::Float(_) => Some(FieldType::Float),
            Value::Double(_) => Some(FieldType::Double),
            Value::Decimal(_) => Some(FieldType::Decimal),
            Value::String(_) => Some(FieldType::String),
            Value::Bytes(_) => Some(FieldType::Bytes),
            Value::Date(_) => Some(FieldType::Date),
            Value::Timestamp(_) => Some(FieldType::Timestamp),
        }
    }

    /// Render this value as JSON, for handing records to embedding pipelines.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Int32(i) => serde_json::Value::from(*i),
            Value::Int64(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Double(f) => serde_json::Value::from(*f),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(hex_encode(b)),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// An ordered name-to-value mapping conforming exactly to a [`SchemaDescriptor`]:
/// field names, order and count are taken from the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Build a record from values in schema field order.
    ///
    /// Fails with a backend operation error if the value count does not match
    /// the descriptor, since that means the backend row and the resolved schema
    /// disagree.
    pub fn new(schema: &SchemaDescriptor, values: Vec<Value>) -> ConnectorResult<Self> {
        if values.len() != schema.len() {
            return Err(ConnectorError::backend(format!(
                "row has {} values but schema declares {} fields",
                values.len(),
                schema.len()
            )));
        }
        let fields = schema
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .zip(values)
            .collect();
        Ok(Self { fields })
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of the named field, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Value at the given position.
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.fields.get(index).map(|(_, v)| v)
    }

    /// Iterate over `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Render the record as a JSON object, preserving field order semantics
    /// only as far as JSON objects allow.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Consume the record, yielding its `(name, value)` pairs.
    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}
