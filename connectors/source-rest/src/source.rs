//! REST source component: cursor-token paging over a JSON API and schema
//! inference from observed values.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::{debug, info};

use tabular_connect_core::{
    resolve_connection, BoundedReader, ColumnMetadata, ConnectionHandle, ConnectorError,
    ConnectorResult, ContinuationToken, DeclaredSchema, FieldDescriptor, FieldType, Page,
    PageFetch, PagedReader, PipelineContext, Record, RowConverter, SchemaDescriptor,
    SchemaResolver, Source, SourceOrSink, ValidationResult, Value,
};

use crate::config::{QueryMode, RestConfig, RestSourceConfig};

/// One row as the backend serves it.
pub type JsonRow = serde_json::Map<String, Json>;

/// The page envelope the backend answers with.
#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    records: Vec<JsonRow>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Shared physical connection: one HTTP client bound to one endpoint.
pub struct RestClient {
    http: reqwest::Client,
    base: reqwest::Url,
    auth_token: Option<String>,
}

impl RestClient {
    async fn fetch_page(
        &self,
        mode: &QueryMode,
        limit: usize,
        cursor: Option<&str>,
    ) -> ConnectorResult<PageEnvelope> {
        let (path, query_param) = match mode {
            QueryMode::Resource { path } => (path.as_str(), None),
            QueryMode::Query { expression } => ("/query", Some(("q", expression.as_str()))),
        };

        let mut url = join_url(&self.base, path)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &limit.to_string());
            if let Some((key, value)) = query_param {
                pairs.append_pair(key, value);
            }
            if let Some(cursor) = cursor {
                pairs.append_pair("cursor", cursor);
            }
        }

        let mut request = self.http.get(url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConnectorError::backend_with_source("request failed", e))?
            .error_for_status()
            .map_err(|e| {
                ConnectorError::backend_with_source("backend returned an error status", e)
            })?;

        response
            .json::<PageEnvelope>()
            .await
            .map_err(|e| ConnectorError::backend_with_source("malformed page payload", e))
    }
}

fn join_url(base: &reqwest::Url, path: &str) -> ConnectorResult<reqwest::Url> {
    let joined = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    reqwest::Url::parse(&joined)
        .map_err(|e| ConnectorError::backend(format!("invalid request URL '{}': {}", joined, e)))
}

/// Source component paging through a JSON API with continuation cursors.
pub struct RestSource {
    config: Option<RestSourceConfig>,
    handle: Option<ConnectionHandle<RestClient>>,
}

impl RestSource {
    /// Create an uninitialized source.
    pub fn new() -> Self {
        Self {
            config: None,
            handle: None,
        }
    }

    fn bound_config(&self) -> ConnectorResult<&RestSourceConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| ConnectorError::config("component is not initialized"))
    }

    async fn connect(
        &mut self,
        ctx: Option<&PipelineContext>,
    ) -> ConnectorResult<ConnectionHandle<RestClient>> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }
        let config = self.bound_config()?.clone();
        let handle = resolve_connection(
            ctx,
            &config.core.component_name,
            config.core.referenced_component_id.as_deref(),
            Some(&config.rest),
            Some(&config.rest),
            open_client,
        )
        .await?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

impl Default for RestSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceOrSink for RestSource {
    type Config = RestSourceConfig;

    async fn initialize(
        &mut self,
        _ctx: Option<&PipelineContext>,
        config: Self::Config,
    ) -> ConnectorResult<()> {
        debug!(component = %config.core.component_name, "binding configuration");
        self.config = Some(config);
        Ok(())
    }

    async fn validate(&mut self, ctx: Option<&PipelineContext>) -> ValidationResult {
        let config = match self.bound_config() {
            Ok(config) => config,
            Err(err) => return ValidationResult::from_error(&err),
        };
        if let Err(err) = config.validate() {
            return ValidationResult::from_error(&err);
        }
        let mode = config.rest.mode.clone();

        // Reachability probe: one-row fetch
        match self.connect(ctx).await {
            Ok(handle) => match handle.connection().fetch_page(&mode, 1, None).await {
                Ok(_) => ValidationResult::Ok,
                Err(err) => {
                    ValidationResult::error(format!("reachability probe failed: {}", err))
                }
            },
            Err(err) => ValidationResult::from_error(&err),
        }
    }
}

#[async_trait]
impl Source for RestSource {
    async fn create_reader(
        &mut self,
        ctx: Option<&PipelineContext>,
    ) -> ConnectorResult<Box<dyn BoundedReader>> {
        let handle = self.connect(ctx).await?;
        let config = self.bound_config()?;

        let schema = resolve_schema(handle.connection(), config).await?;
        info!(
            component = %config.core.component_name,
            fields = schema.len(),
            "schema resolved"
        );

        let fetch = RestPageFetch {
            handle: handle.clone(),
            mode: config.rest.mode.clone(),
            page_size: config.rest.page_size.min(config.core.fetch_size),
        };
        let reader = PagedReader::new(
            config.core.component_name.clone(),
            fetch,
            Box::new(JsonRowConverter),
            schema,
            config.core.error_policy(),
        );
        Ok(Box::new(reader))
    }
}

/// Build the shared HTTP client for an endpoint.
async fn open_client(config: RestConfig) -> ConnectorResult<RestClient> {
    let base = reqwest::Url::parse(&config.endpoint).map_err(|e| {
        ConnectorError::config(format!("rest.endpoint '{}' is not a valid URL: {}", config.endpoint, e))
    })?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| ConnectorError::backend_with_source("failed to build HTTP client", e))?;
    info!("Opened HTTP client for {}", config.endpoint);
    Ok(RestClient {
        http,
        base,
        auth_token: config.auth_token,
    })
}

/// Resolve the schema: the declared descriptor when one is configured,
/// otherwise infer from a sample page of observed values.
async fn resolve_schema(
    client: &RestClient,
    config: &RestSourceConfig,
) -> ConnectorResult<SchemaDescriptor> {
    let declared = config.core.declared_schema();
    match &declared {
        DeclaredSchema::Explicit(_) => SchemaResolver::resolve(&declared, &[], &[]),
        DeclaredSchema::InferAll => {
            let sample_size = config.rest.page_size.min(25);
            let sample = client
                .fetch_page(&config.rest.mode, sample_size, None)
                .await?;
            let (columns, observed) = observe_fields(&sample.records);
            SchemaResolver::resolve(&declared, &columns, &observed)
        }
    }
}

/// Field names and first observed non-null values from a sample of rows.
///
/// JSON carries no column metadata, so every field type comes from the
/// observed-value path of the resolver, with its string fallback for fields
/// that were null throughout the sample.
fn observe_fields(rows: &[JsonRow]) -> (Vec<ColumnMetadata>, Vec<(String, Value)>) {
    let mut columns = Vec::new();
    let mut observed = Vec::new();
    let Some(first) = rows.first() else {
        return (columns, observed);
    };
    for key in first.keys() {
        columns.push(ColumnMetadata::new(key.clone()));
        let value = rows
            .iter()
            .filter_map(|row| row.get(key))
            .find(|json| !json.is_null())
            .map(probe_value)
            .unwrap_or(Value::Null);
        observed.push((key.clone(), value));
    }
    (columns, observed)
}

/// The runtime type of one observed JSON value.
fn probe_value(json: &Json) -> Value {
    match json {
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => Value::Double(n.as_f64().unwrap_or(0.0)),
        },
        Json::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Cursor-token paging over the API.
struct RestPageFetch {
    handle: ConnectionHandle<RestClient>,
    mode: QueryMode,
    page_size: usize,
}

#[async_trait]
impl PageFetch for RestPageFetch {
    type Row = JsonRow;

    async fn fetch_next(
        &mut self,
        token: Option<&ContinuationToken>,
    ) -> ConnectorResult<Page<JsonRow>> {
        let envelope = self
            .handle
            .connection()
            .fetch_page(&self.mode, self.page_size, token.map(|t| t.as_str()))
            .await?;
        Ok(Page::new(
            envelope.records,
            envelope.next_cursor.map(ContinuationToken::new),
        ))
    }
}

/// Converts JSON rows by coercing each declared field from the key it
/// reconciles with, adopting declared casing.
struct JsonRowConverter;

impl RowConverter<JsonRow> for JsonRowConverter {
    fn convert(&self, row: &JsonRow, schema: &SchemaDescriptor) -> ConnectorResult<Record> {
        let values = schema
            .fields()
            .iter()
            .map(|field| match lookup(row, &field.name) {
                Some(json) => json_to_value(field, json),
                None => Ok(Value::Null),
            })
            .collect::<ConnectorResult<Vec<_>>>()?;
        Record::new(schema, values)
    }
}

fn lookup<'a>(row: &'a JsonRow, name: &str) -> Option<&'a Json> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn json_to_value(field: &FieldDescriptor, json: &Json) -> ConnectorResult<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || {
        ConnectorError::backend(format!(
            "field '{}' does not coerce to {:?}",
            field.name, field.field_type
        ))
    };

    match field.field_type {
        FieldType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
        FieldType::Int32 => json
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::Int32)
            .ok_or_else(mismatch),
        FieldType::Int64 => json.as_i64().map(Value::Int64).ok_or_else(mismatch),
        FieldType::Float => json
            .as_f64()
            .map(|v| Value::Float(v as f32))
            .ok_or_else(mismatch),
        FieldType::Double => json.as_f64().map(Value::Double).ok_or_else(mismatch),
        FieldType::Decimal => match json {
            Json::String(s) => BigDecimal::from_str(s)
                .map(Value::Decimal)
                .map_err(|_| mismatch()),
            Json::Number(n) => BigDecimal::from_str(&n.to_string())
                .map(Value::Decimal)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::String => match json {
            Json::String(s) => Ok(Value::String(s.clone())),
            other => Ok(Value::String(other.to_string())),
        },
        FieldType::Bytes => json
            .as_str()
            .map(|s| Value::Bytes(s.as_bytes().to_vec()))
            .ok_or_else(mismatch),
        FieldType::Date => {
            let raw = json.as_str().ok_or_else(mismatch)?;
            let pattern = field.pattern.as_deref().unwrap_or("%Y-%m-%d");
            NaiveDate::parse_from_str(raw, pattern)
                .map(Value::Date)
                .map_err(|e| {
                    ConnectorError::backend(format!(
                        "field '{}' has unparseable date '{}': {}",
                        field.name, raw, e
                    ))
                })
        }
        FieldType::Timestamp => {
            let raw = json.as_str().ok_or_else(mismatch)?;
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|e| {
                    ConnectorError::backend(format!(
                        "field '{}' has unparseable timestamp '{}': {}",
                        field.name, raw, e
                    ))
                })
        }
    }
}
