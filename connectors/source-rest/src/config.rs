//! Configuration for the REST Source Connector

use serde::{Deserialize, Serialize};
use std::env;
use tabular_connect_core::{ComponentConfig, ConnectorError, ConnectorResult, CoreConfig};

/// Unified configuration for the REST Source Connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestSourceConfig {
    /// Core component configuration (flattened at root level)
    #[serde(flatten)]
    pub core: CoreConfig,

    /// REST-specific configuration
    pub rest: RestConfig,
}

impl RestSourceConfig {
    /// Load configuration from a single TOML file with optional ENV overrides
    ///
    /// Priority: TOML file → Environment variables
    pub fn load() -> ConnectorResult<Self> {
        let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_file(&config_file)?
        } else {
            Self::from_env()?
        };

        config.core.apply_env_overrides();
        config.rest.apply_env_overrides();

        Ok(config)
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

    /// Load configuration from environment variables
    pub fn from_env() -> ConnectorResult<Self> {
        Ok(Self {
            core: CoreConfig::from_env()?,
            rest: RestConfig::from_env()?,
        })
    }

    /// Validate all configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        self.core.validate()?;
        self.rest.validate()?;
        Ok(())
    }
}

impl ComponentConfig for RestSourceConfig {
    fn core(&self) -> &CoreConfig {
        &self.core
    }
}

/// What one read of the API asks for.
///
/// Each mode carries and validates its own required fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryMode {
    /// Page through a fixed resource collection.
    Resource {
        /// Collection path below the endpoint, e.g. `/leads`
        path: String,
    },
    /// Page through the results of a server-side query expression.
    Query {
        /// Query expression handed to the backend verbatim
        expression: String,
    },
}

impl Default for QueryMode {
    fn default() -> Self {
        Self::Resource {
            path: "/records".to_string(),
        }
    }
}

impl QueryMode {
    /// Validate the mode-dependent required fields.
    pub fn validate(&self) -> ConnectorResult<()> {
        match self {
            QueryMode::Resource { path } => {
                if path.is_empty() {
                    return Err(ConnectorError::config(
                        "rest.mode.path is required in resource mode",
                    ));
                }
                if !path.starts_with('/') {
                    return Err(ConnectorError::config("rest.mode.path must start with '/'"));
                }
                Ok(())
            }
            QueryMode::Query { expression } => {
                if expression.trim().is_empty() {
                    return Err(ConnectorError::config(
                        "rest.mode.expression is required in query mode",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// REST endpoint and paging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Base endpoint URL, e.g. `https://api.example.com/v2`
    pub endpoint: String,

    /// Bearer token for authentication (optional)
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Rows requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// What to read
    #[serde(default)]
    pub mode: QueryMode,
}

fn default_page_size() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

impl RestConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `REST_ENDPOINT`: Required, base endpoint URL
    /// - `REST_AUTH_TOKEN`: Bearer token
    /// - `REST_PAGE_SIZE`: Rows per page (default: 100)
    /// - `REST_TIMEOUT_SECS`: Request timeout (default: 30)
    /// - `REST_RESOURCE_PATH`: Collection path (resource mode)
    /// - `REST_QUERY`: Query expression (query mode, overrides resource mode)
    pub fn from_env() -> ConnectorResult<Self> {
        let endpoint = env::var("REST_ENDPOINT")
            .map_err(|_| ConnectorError::config("REST_ENDPOINT is required"))?;

        let mode = if let Ok(expression) = env::var("REST_QUERY") {
            QueryMode::Query { expression }
        } else if let Ok(path) = env::var("REST_RESOURCE_PATH") {
            QueryMode::Resource { path }
        } else {
            QueryMode::default()
        };

        let page_size = env::var("REST_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_page_size);

        let timeout_secs = env::var("REST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_timeout_secs);

        Ok(Self {
            endpoint,
            auth_token: env::var("REST_AUTH_TOKEN").ok(),
            page_size,
            timeout_secs,
            mode,
        })
    }

    /// Apply environment variable overrides after loading from TOML
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("REST_ENDPOINT") {
            self.endpoint = val;
        }
        if let Ok(val) = env::var("REST_AUTH_TOKEN") {
            self.auth_token = Some(val);
        }
        if let Ok(val) = env::var("REST_PAGE_SIZE") {
            if let Ok(n) = val.parse() {
                self.page_size = n;
            }
        }
        if let Ok(val) = env::var("REST_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.timeout_secs = n;
            }
        }
        if let Ok(expression) = env::var("REST_QUERY") {
            self.mode = QueryMode::Query { expression };
        } else if let Ok(path) = env::var("REST_RESOURCE_PATH") {
            self.mode = QueryMode::Resource { path };
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.endpoint.is_empty() {
            return Err(ConnectorError::config("rest.endpoint cannot be empty"));
        }
        if reqwest::Url::parse(&self.endpoint).is_err() {
            return Err(ConnectorError::config(format!(
                "rest.endpoint '{}' is not a valid URL",
                self.endpoint
            )));
        }

        if self.page_size == 0 || self.page_size > 1000 {
            return Err(ConnectorError::config(
                "rest.page_size must be between 1 and 1000",
            ));
        }

        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return Err(ConnectorError::config(
                "rest.timeout_secs must be between 1 and 300",
            ));
        }

        self.mode.validate()
    }
}
