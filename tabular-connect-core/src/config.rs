//! Configuration management for components.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::ErrorPolicy;
use crate::schema::{DeclaredSchema, SchemaDescriptor};
use crate::{ConnectorError, ConnectorResult};

/// Core configuration shared by every component, regardless of backend.
///
/// Connector crates embed this with `#[serde(flatten)]` next to their
/// backend-specific section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Component instance name (must be unique within a pipeline)
    pub component_name: String,

    /// Use the connection opened by this other component instead of opening
    /// one from local configuration
    #[serde(default)]
    pub referenced_component_id: Option<String>,

    /// Abort the pipeline stage on backend failures; when false, failures are
    /// recorded and reads degrade to empty results
    #[serde(default = "default_die_on_error")]
    pub die_on_error: bool,

    /// Number of rows requested per backend fetch
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Declared schema; absent means "include every field the backend reports"
    #[serde(default)]
    pub schema: Option<SchemaDescriptor>,

    /// Metrics export port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_die_on_error() -> bool {
    true
}

fn default_fetch_size() -> usize {
    500
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CoreConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `COMPONENT_NAME`: Required, unique component name
    /// - `REFERENCED_COMPONENT_ID`: Reuse this component's connection
    /// - `DIE_ON_ERROR`: Abort on backend failure (default: true)
    /// - `FETCH_SIZE`: Rows per backend fetch (default: 500)
    /// - `METRICS_PORT`: Metrics port (default: 9090)
    /// - `LOG_LEVEL`: Log level (default: info)
    pub fn from_env() -> ConnectorResult<Self> {
        let component_name = env::var("COMPONENT_NAME")
            .map_err(|_| ConnectorError::config("COMPONENT_NAME is required"))?;

        let referenced_component_id = env::var("REFERENCED_COMPONENT_ID").ok();

        let die_on_error = env::var("DIE_ON_ERROR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_die_on_error);

        let fetch_size = env::var("FETCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_fetch_size);

        let metrics_port = env::var("METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_metrics_port);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level());

        Ok(Self {
            component_name,
            referenced_component_id,
            die_on_error,
            fetch_size,
            schema: None,
            metrics_port,
            log_level,
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConnectorError::config(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Apply environment variable overrides to core configuration
    ///
    /// Helper for connectors to apply ENV overrides after loading from TOML.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("COMPONENT_NAME") {
            self.component_name = val;
        }
        if let Ok(val) = env::var("REFERENCED_COMPONENT_ID") {
            self.referenced_component_id = Some(val);
        }
        if let Ok(val) = env::var("DIE_ON_ERROR") {
            if let Ok(b) = val.parse() {
                self.die_on_error = b;
            }
        }
        if let Ok(val) = env::var("FETCH_SIZE") {
            if let Ok(n) = val.parse() {
                self.fetch_size = n;
            }
        }
        if let Ok(val) = env::var("METRICS_PORT") {
            if let Ok(n) = val.parse() {
                self.metrics_port = n;
            }
        }
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.log_level = val;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.component_name.is_empty() {
            return Err(ConnectorError::config("component_name cannot be empty"));
        }

        if self.component_name.len() > 64 {
            return Err(ConnectorError::config(
                "component_name too long (max 64 characters)",
            ));
        }

        if !self
            .component_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConnectorError::config(
                "component_name may only contain letters, digits, '_' and '-'",
            ));
        }

        if let Some(ref_id) = &self.referenced_component_id {
            if ref_id.is_empty() {
                return Err(ConnectorError::config(
                    "referenced_component_id cannot be empty when set",
                ));
            }
        }

        if self.fetch_size == 0 {
            return Err(ConnectorError::config("fetch_size must be > 0"));
        }

        if self.fetch_size > 10_000 {
            return Err(ConnectorError::config("fetch_size too high (max 10000)"));
        }

        if let Some(schema) = &self.schema {
            if schema.is_empty() {
                return Err(ConnectorError::config(
                    "declared schema must contain at least one field",
                ));
            }
        }

        Ok(())
    }

    /// The failure policy this component's `die_on_error` flag selects.
    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::from_die_on_error(self.die_on_error)
    }

    /// The schema declaration: explicit and locked, or the infer-all marker.
    pub fn declared_schema(&self) -> DeclaredSchema {
        match &self.schema {
            Some(schema) => DeclaredSchema::Explicit(schema.clone()),
            None => DeclaredSchema::InferAll,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            component_name: "default-component".to_string(),
            referenced_component_id: None,
            die_on_error: default_die_on_error(),
            fetch_size: default_fetch_size(),
            schema: None,
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
        }
    }
}

/// Access to the embedded [`CoreConfig`] of a connector-specific configuration.
pub trait ComponentConfig: Send + Sync {
    /// The core section shared by all components.
    fn core(&self) -> &CoreConfig;
}

impl ComponentConfig for CoreConfig {
    fn core(&self) -> &CoreConfig {
        self
    }
}
