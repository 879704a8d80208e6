//! PostgreSQL source component: connection handling, schema resolution and
//! paged reads.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::{debug, info, warn};

use tabular_connect_core::{
    resolve_connection, BoundedReader, ColumnMetadata, ConnectionHandle, ConnectorError,
    ConnectorResult, ContinuationToken, DeclaredSchema, FieldDescriptor, FieldType, Page,
    PageFetch, PagedReader, PipelineContext, Record, RetryConfig, RetryStrategy, RowConverter,
    SchemaDescriptor, SchemaResolver, Source, SourceOrSink, ValidationResult, Value,
};

use crate::config::{PostgresConfig, PostgresSourceConfig};

/// Source component reading a table or query result from PostgreSQL.
pub struct PostgresSource {
    config: Option<PostgresSourceConfig>,
    handle: Option<ConnectionHandle<PgPool>>,
}

impl PostgresSource {
    /// Create an uninitialized source.
    pub fn new() -> Self {
        Self {
            config: None,
            handle: None,
        }
    }

    fn bound_config(&self) -> ConnectorResult<&PostgresSourceConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| ConnectorError::config("component is not initialized"))
    }

    /// Resolve this component's connection handle, opening a pool only when no
    /// referenced component already provides one.
    async fn connect(
        &mut self,
        ctx: Option<&PipelineContext>,
    ) -> ConnectorResult<ConnectionHandle<PgPool>> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }
        let config = self.bound_config()?.clone();
        let handle = resolve_connection(
            ctx,
            &config.core.component_name,
            config.core.referenced_component_id.as_deref(),
            Some(&config.postgres),
            Some(&config.postgres),
            open_pool,
        )
        .await?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

impl Default for PostgresSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceOrSink for PostgresSource {
    type Config = PostgresSourceConfig;

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

        // Reachability probe
        match self.connect(ctx).await {
            Ok(handle) => match sqlx::query("SELECT 1").execute(handle.connection()).await {
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
impl Source for PostgresSource {
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

        let fetch = PostgresPageFetch {
            handle: handle.clone(),
            base_query: base_query(&config.postgres),
            fetch_size: config.core.fetch_size,
        };
        let reader = PagedReader::new(
            config.core.component_name.clone(),
            fetch,
            Box::new(PgRowConverter),
            schema,
            config.core.error_policy(),
        );
        Ok(Box::new(reader))
    }
}

/// Open a connection pool, retrying transient failures with backoff.
async fn open_pool(config: PostgresConfig) -> ConnectorResult<PgPool> {
    let strategy = RetryStrategy::new(RetryConfig::default());
    let url = config.connection_url();
    let mut attempt = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&url)
            .await
        {
            Ok(pool) => {
                info!(
                    "Connected to {}:{}/{}",
                    config.host, config.port, config.database
                );
                return Ok(pool);
            }
            Err(err) if strategy.should_retry(attempt) => {
                attempt += 1;
                let backoff = strategy.calculate_backoff(attempt);
                warn!(
                    "Connection attempt {} failed, retrying in {:?}: {}",
                    attempt, backoff, err
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                return Err(ConnectorError::backend_with_source(
                    "failed to open connection pool",
                    err,
                ));
            }
        }
    }
}

/// The statement all pages are windows over.
fn base_query(config: &PostgresConfig) -> String {
    match (&config.query, &config.table) {
        (Some(query), _) => query.trim().trim_end_matches(';').to_string(),
        (None, Some(table)) => {
            format!("SELECT * FROM \"{}\".\"{}\"", config.db_schema, table)
        }
        // rejected by validation before any reader exists
        (None, None) => String::new(),
    }
}

/// Resolve the schema for this component: the declared descriptor when one is
/// configured, otherwise a catalog probe (table mode) or a one-row result
/// probe (query mode).
async fn resolve_schema(
    pool: &PgPool,
    config: &PostgresSourceConfig,
) -> ConnectorResult<SchemaDescriptor> {
    let declared = config.core.declared_schema();
    match &declared {
        DeclaredSchema::Explicit(_) => SchemaResolver::resolve(&declared, &[], &[]),
        DeclaredSchema::InferAll => match &config.postgres.table {
            Some(table) => {
                let columns =
                    probe_table_columns(pool, &config.postgres.db_schema, table).await?;
                SchemaResolver::resolve(&declared, &columns, &[])
            }
            None => {
                let sql = format!(
                    "SELECT * FROM ({}) AS probe LIMIT 1",
                    base_query(&config.postgres)
                );
                let rows = sqlx::query(&sql).fetch_all(pool).await.map_err(|e| {
                    ConnectorError::backend_with_source("schema probe query failed", e)
                })?;
                let columns = rows.first().map(observe_columns).unwrap_or_default();
                SchemaResolver::resolve(&declared, &columns, &[])
            }
        },
    }
}

/// Column metadata from `information_schema`, including the precision and
/// scale the resolver needs for numeric narrowing.
async fn probe_table_columns(
    pool: &PgPool,
    db_schema: &str,
    table: &str,
) -> ConnectorResult<Vec<ColumnMetadata>> {
    let rows = sqlx::query(
        "SELECT column_name, data_type, is_nullable, numeric_precision, numeric_scale \
         FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 \
         ORDER BY ordinal_position",
    )
    .bind(db_schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| ConnectorError::backend_with_source("column metadata probe failed", e))?;

    if rows.is_empty() {
        return Err(ConnectorError::inference(format!(
            "table {}.{} does not exist or has no columns",
            db_schema, table
        )));
    }

    rows.iter()
        .map(|row| {
            let name: String = row
                .try_get("column_name")
                .map_err(|e| ConnectorError::backend_with_source("malformed catalog row", e))?;
            let data_type: String = row
                .try_get("data_type")
                .map_err(|e| ConnectorError::backend_with_source("malformed catalog row", e))?;
            let is_nullable: String = row
                .try_get("is_nullable")
                .map_err(|e| ConnectorError::backend_with_source("malformed catalog row", e))?;
            let precision: Option<i32> = row.try_get("numeric_precision").unwrap_or(None);
            let scale: Option<i32> = row.try_get("numeric_scale").unwrap_or(None);

            let mut column = ColumnMetadata::new(name).with_native_type(data_type.clone());
            if let Some(field_type) = map_catalog_type(&data_type) {
                column = column.with_field_type(field_type);
            }
            if let (Some(precision), Some(scale)) = (precision, scale) {
                column = column.with_precision(precision as u32, scale as u32);
            }
            if is_nullable == "NO" {
                column = column.required();
            }
            Ok(column)
        })
        .collect()
}

/// Column metadata observed from a live result row, for query-mode inference
/// where no catalog entry exists.
fn observe_columns(row: &PgRow) -> Vec<ColumnMetadata> {
    row.columns()
        .iter()
        .map(|column| {
            let type_name = column.type_info().name();
            let mut meta = ColumnMetadata::new(column.name())
                .with_native_type(type_name.to_lowercase());
            if let Some(field_type) = map_runtime_type(type_name) {
                meta = meta.with_field_type(field_type);
            }
            meta
        })
        .collect()
}

/// Canonical type for an `information_schema` data type name.
fn map_catalog_type(data_type: &str) -> Option<FieldType> {
    match data_type {
        "boolean" => Some(FieldType::Boolean),
        "smallint" | "integer" => Some(FieldType::Int32),
        "bigint" => Some(FieldType::Int64),
        "real" => Some(FieldType::Float),
        "double precision" => Some(FieldType::Double),
        "numeric" | "decimal" => Some(FieldType::Decimal),
        "character varying" | "character" | "text" => Some(FieldType::String),
        "bytea" => Some(FieldType::Bytes),
        "date" => Some(FieldType::Date),
        "timestamp without time zone" | "timestamp with time zone" => Some(FieldType::Timestamp),
        _ => None,
    }
}

/// Canonical type for a runtime result-column type name.
fn map_runtime_type(type_name: &str) -> Option<FieldType> {
    match type_name {
        "BOOL" => Some(FieldType::Boolean),
        "INT2" | "INT4" => Some(FieldType::Int32),
        "INT8" => Some(FieldType::Int64),
        "FLOAT4" => Some(FieldType::Float),
        "FLOAT8" => Some(FieldType::Double),
        "NUMERIC" => Some(FieldType::Decimal),
        "VARCHAR" | "TEXT" | "BPCHAR" | "CHAR" | "NAME" => Some(FieldType::String),
        "BYTEA" => Some(FieldType::Bytes),
        "DATE" => Some(FieldType::Date),
        "TIMESTAMP" | "TIMESTAMPTZ" => Some(FieldType::Timestamp),
        _ => None,
    }
}

/// Offset-window paging over the base query. The continuation token carries
/// the next row offset.
struct PostgresPageFetch {
    handle: ConnectionHandle<PgPool>,
    base_query: String,
    fetch_size: usize,
}

#[async_trait]
impl PageFetch for PostgresPageFetch {
    type Row = PgRow;

    async fn fetch_next(
        &mut self,
        token: Option<&ContinuationToken>,
    ) -> ConnectorResult<Page<PgRow>> {
        let offset: u64 = match token {
            Some(token) => token.as_str().parse().map_err(|_| {
                ConnectorError::backend(format!(
                    "malformed continuation token '{}'",
                    token.as_str()
                ))
            })?,
            None => 0,
        };

        let sql = format!(
            "SELECT * FROM ({}) AS page LIMIT {} OFFSET {}",
            self.base_query, self.fetch_size, offset
        );
        debug!(offset, "fetching page");
        let rows = sqlx::query(&sql)
            .fetch_all(self.handle.connection())
            .await
            .map_err(|e| ConnectorError::backend_with_source("page fetch failed", e))?;

        let next = next_token(offset, rows.len(), self.fetch_size);
        Ok(Page::new(rows, next))
    }
}

/// A full page means more rows may follow; a short page ends the result set.
fn next_token(offset: u64, rows: usize, fetch_size: usize) -> Option<ContinuationToken> {
    if rows == fetch_size {
        Some(ContinuationToken::new((offset + rows as u64).to_string()))
    } else {
        None
    }
}

/// Converts native rows by decoding each schema field from the row column it
/// reconciles with.
struct PgRowConverter;

impl RowConverter<PgRow> for PgRowConverter {
    fn convert(&self, row: &PgRow, schema: &SchemaDescriptor) -> ConnectorResult<Record> {
        let values = schema
            .fields()
            .iter()
            .map(|field| decode_field(row, field))
            .collect::<ConnectorResult<Vec<_>>>()?;
        Record::new(schema, values)
    }
}

fn decode_field(row: &PgRow, field: &FieldDescriptor) -> ConnectorResult<Value> {
    // Exact column name first, declared-casing reconciliation second.
    let index = row
        .columns()
        .iter()
        .position(|c| c.name() == field.name)
        .or_else(|| {
            row.columns()
                .iter()
                .position(|c| c.name().eq_ignore_ascii_case(&field.name))
        })
        .ok_or_else(|| {
            ConnectorError::backend(format!("column '{}' missing from result row", field.name))
        })?;

    let decode_err = |e: sqlx::Error| {
        ConnectorError::backend_with_source(
            format!("failed to decode column '{}'", field.name),
            e,
        )
    };
    let native = field.native_type.as_deref();

    let value = match field.field_type {
        FieldType::Boolean => row
            .try_get::<Option<bool>, _>(index)
            .map_err(decode_err)?
            .map(Value::Boolean),
        FieldType::Int32 => match native {
            // narrowed NUMERIC(p, 0) columns still arrive as decimals
            Some("numeric") | Some("decimal") => row
                .try_get::<Option<BigDecimal>, _>(index)
                .map_err(decode_err)?
                .map(|d| {
                    d.to_i32().map(Value::Int32).ok_or_else(|| {
                        ConnectorError::backend(format!(
                            "value in column '{}' overflows a 32-bit integer",
                            field.name
                        ))
                    })
                })
                .transpose()?,
            Some("smallint") | Some("int2") => row
                .try_get::<Option<i16>, _>(index)
                .map_err(decode_err)?
                .map(|v| Value::Int32(v as i32)),
            _ => row
                .try_get::<Option<i32>, _>(index)
                .map_err(decode_err)?
                .map(Value::Int32),
        },
        FieldType::Int64 => match native {
            Some("numeric") | Some("decimal") => row
                .try_get::<Option<BigDecimal>, _>(index)
                .map_err(decode_err)?
                .map(|d| {
                    d.to_i64().map(Value::Int64).ok_or_else(|| {
                        ConnectorError::backend(format!(
                            "value in column '{}' overflows a 64-bit integer",
                            field.name
                        ))
                    })
                })
                .transpose()?,
            _ => row
                .try_get::<Option<i64>, _>(index)
                .map_err(decode_err)?
                .map(Value::Int64),
        },
        FieldType::Float => row
            .try_get::<Option<f32>, _>(index)
            .map_err(decode_err)?
            .map(Value::Float),
        FieldType::Double => row
            .try_get::<Option<f64>, _>(index)
            .map_err(decode_err)?
            .map(Value::Double),
        FieldType::Decimal => row
            .try_get::<Option<BigDecimal>, _>(index)
            .map_err(decode_err)?
            .map(Value::Decimal),
        FieldType::String => row
            .try_get::<Option<String>, _>(index)
            .map_err(decode_err)?
            .map(Value::String),
        FieldType::Bytes => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map_err(decode_err)?
            .map(Value::Bytes),
        FieldType::Date => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map_err(decode_err)?
            .map(Value::Date),
        FieldType::Timestamp => match native {
            Some("timestamp without time zone") | Some("timestamp") => row
                .try_get::<Option<NaiveDateTime>, _>(index)
                .map_err(decode_err)?
                .map(|ts| Value::Timestamp(ts.and_utc())),
            _ => row
                .try_get::<Option<DateTime<Utc>>, _>(index)
                .map_err(decode_err)?
                .map(Value::Timestamp),
        },
    };

    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresSourceConfig;
    use tabular_connect_core::CoreConfig;

    fn config(table: Option<&str>, query: Option<&str>) -> PostgresConfig {
        PostgresConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "shop".to_string(),
            user: "reader".to_string(),
            password: String::new(),
            db_schema: "public".to_string(),
            table: table.map(String::from),
            query: query.map(String::from),
            max_connections: 4,
        }
    }

    #[test]
    fn test_base_query_for_table_mode() {
        assert_eq!(
            base_query(&config(Some("orders"), None)),
            "SELECT * FROM \"public\".\"orders\""
        );
    }

    #[test]
    fn test_base_query_for_query_mode() {
        assert_eq!(
            base_query(&config(None, Some("  SELECT id FROM orders; "))),
            "SELECT id FROM orders"
        );
    }

    #[test]
    fn test_catalog_type_mapping() {
        assert_eq!(map_catalog_type("integer"), Some(FieldType::Int32));
        assert_eq!(map_catalog_type("bigint"), Some(FieldType::Int64));
        assert_eq!(map_catalog_type("numeric"), Some(FieldType::Decimal));
        assert_eq!(
            map_catalog_type("character varying"),
            Some(FieldType::String)
        );
        assert_eq!(
            map_catalog_type("timestamp with time zone"),
            Some(FieldType::Timestamp)
        );
        assert_eq!(map_catalog_type("money"), None);
    }

    #[test]
    fn test_runtime_type_mapping() {
        assert_eq!(map_runtime_type("INT4"), Some(FieldType::Int32));
        assert_eq!(map_runtime_type("NUMERIC"), Some(FieldType::Decimal));
        assert_eq!(map_runtime_type("TIMESTAMPTZ"), Some(FieldType::Timestamp));
        assert_eq!(map_runtime_type("JSONB"), None);
    }

    #[test]
    fn test_next_token_windows() {
        // full page: more may follow
        let token = next_token(0, 500, 500).unwrap();
        assert_eq!(token.as_str(), "500");
        let token = next_token(500, 500, 500).unwrap();
        assert_eq!(token.as_str(), "1000");
        // short or empty page ends the chain
        assert!(next_token(1000, 137, 500).is_none());
        assert!(next_token(1000, 0, 500).is_none());
    }

    #[test]
    fn test_numeric_narrowing_through_catalog_metadata() {
        // What the catalog probe produces for NUMERIC(10,0), NUMERIC(15,0),
        // NUMERIC(25,0) columns, fed through the shared resolver.
        let columns = vec![
            ColumnMetadata::new("small_id")
                .with_native_type("numeric")
                .with_field_type(FieldType::Decimal)
                .with_precision(10, 0),
            ColumnMetadata::new("big_id")
                .with_native_type("numeric")
                .with_field_type(FieldType::Decimal)
                .with_precision(15, 0),
            ColumnMetadata::new("huge_id")
                .with_native_type("numeric")
                .with_field_type(FieldType::Decimal)
                .with_precision(25, 0),
        ];
        let schema =
            SchemaResolver::resolve(&DeclaredSchema::InferAll, &columns, &[]).unwrap();
        assert_eq!(schema.fields()[0].field_type, FieldType::Int32);
        assert_eq!(schema.fields()[1].field_type, FieldType::Int64);
        assert_eq!(schema.fields()[2].field_type, FieldType::Decimal);
        // native type survives so the row decoder knows the wire format
        assert_eq!(schema.fields()[0].native_type.as_deref(), Some("numeric"));
    }

    #[tokio::test]
    async fn test_uninitialized_component_fails_validation() {
        let mut source = PostgresSource::new();
        let result = source.validate(None).await;
        assert!(!result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_validation_without_probe() {
        let mut source = PostgresSource::new();
        let config = PostgresSourceConfig {
            core: CoreConfig::default(),
            postgres: config(None, None), // neither table nor query
        };
        source.initialize(None, config).await.unwrap();
        let result = source.validate(None).await;
        assert!(result
            .message()
            .unwrap()
            .contains("either postgres.table or postgres.query"));
    }
}
