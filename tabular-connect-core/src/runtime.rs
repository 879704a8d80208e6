//! Runtime driving a source component through its lifecycle.
//!
//! The runtime enforces the strict engine order:
//! `initialize → validate → create_reader → start → {advance}* → close →
//! return_values`, forwarding each record to a caller-supplied consumer and
//! handling logging, metrics and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::component::{Source, ValidationResult};
use crate::config::{ComponentConfig, CoreConfig};
use crate::metrics::ComponentMetrics;
use crate::reader::ReturnStatistics;
use crate::record::Record;
use crate::registry::PipelineContext;
use crate::{ConnectorError, ConnectorResult};

/// Runtime for source components (remote datastore → pipeline).
pub struct SourceRuntime<S: Source> {
    source: S,
    config: Option<S::Config>,
    core: CoreConfig,
    metrics: Arc<ComponentMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl<S: Source> SourceRuntime<S> {
    /// Create a runtime for `source` with its bound configuration.
    pub fn new(source: S, config: S::Config) -> ConnectorResult<Self> {
        let core = config.core().clone();
        core.validate()?;

        Self::init_tracing(&core);

        info!("Initializing Source Runtime");
        info!("Component: {}", core.component_name);

        let metrics = Arc::new(ComponentMetrics::new(&core.component_name, "source"));
        metrics.set_health(true);

        Ok(Self {
            source,
            config: Some(config),
            core,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Initialize tracing/logging
    fn init_tracing(core: &CoreConfig) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&core.log_level));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok(); // Ignore if already initialized
    }

    /// Handle for requesting a cooperative stop between records.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Spawn a ctrl-c listener that flips the shutdown flag.
    pub fn install_signal_handler(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl-c");
            info!("Received shutdown signal");
            shutdown.store(true, Ordering::Relaxed);
        });
    }

    /// Run the component to exhaustion, forwarding records to `on_record`.
    ///
    /// Returns the reader's aggregate statistics. A validation failure aborts
    /// the run as a configuration error before any reader exists.
    pub async fn run<C>(
        &mut self,
        ctx: Option<&PipelineContext>,
        on_record: C,
    ) -> ConnectorResult<ReturnStatistics>
    where
        C: FnMut(Record) -> ConnectorResult<()> + Send,
    {
        let result = self.drive(ctx, on_record).await;
        if let Err(err) = &result {
            error!("Source run failed: {}", err);
            self.metrics.record_error(err.kind());
        }
        self.metrics.set_health(false);
        result
    }

    async fn drive<C>(
        &mut self,
        ctx: Option<&PipelineContext>,
        mut on_record: C,
    ) -> ConnectorResult<ReturnStatistics>
    where
        C: FnMut(Record) -> ConnectorResult<()> + Send,
    {
        // 1. Initialize component
        info!("Initializing component {}", self.core.component_name);
        let config = self
            .config
            .take()
            .ok_or_else(|| ConnectorError::config("runtime has already been run"))?;
        self.source.initialize(ctx, config).await?;
        info!("Component initialized successfully");

        // 2. Validate
        match self.source.validate(ctx).await {
            ValidationResult::Ok => info!("Component validated successfully"),
            ValidationResult::Error(message) => {
                return Err(ConnectorError::config(message));
            }
        }

        // 3. Create reader
        let mut reader = self.source.create_reader(ctx).await?;
        debug!(fields = reader.schema().len(), "reader created");

        // 4. Main read loop
        info!("Entering main read loop");
        let mut available = reader.start().await?;
        while available {
            if self.shutdown.load(Ordering::Relaxed) {
                warn!("Shutdown requested, stopping before exhaustion");
                break;
            }

            let record = reader.get_current()?;
            self.metrics.record_received();

            let started = Instant::now();
            on_record(record)?;
            self.metrics.record_processing_time(started.elapsed());
            self.metrics.record_success();

            available = reader.advance().await?;
        }

        // 5. Close reader and surface statistics
        reader.close().await?;
        let stats = reader.return_values();
        for _ in 0..stats.reject_count {
            self.metrics.record_rejected();
        }
        info!(
            "Source drained: total={} succeeded={} rejected={}",
            stats.total_count, stats.success_count, stats.reject_count
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::SourceOrSink;
    use crate::pagination::{ContinuationToken, Page, PageFetch};
    use crate::reader::{BoundedReader, PagedReader, RowConverter};
    use crate::record::Value;
    use crate::schema::{FieldDescriptor, FieldType, SchemaDescriptor};
    use async_trait::async_trait;

    /// In-memory source usable without any backend.
    struct MemorySource {
        rows: Vec<i64>,
        page_size: usize,
        config: Option<CoreConfig>,
        fail_validation: bool,
    }

    struct MemoryFetch {
        rows: Vec<i64>,
        page_size: usize,
    }

    #[async_trait]
    impl PageFetch for MemoryFetch {
        type Row = i64;

        async fn fetch_next(
            &mut self,
            token: Option<&ContinuationToken>,
        ) -> ConnectorResult<Page<i64>> {
            let offset: usize = token.map(|t| t.as_str().parse().unwrap()).unwrap_or(0);
            let end = (offset + self.page_size).min(self.rows.len());
            let rows = self.rows[offset..end].to_vec();
            let next = if end < self.rows.len() {
                Some(ContinuationToken::new(end.to_string()))
            } else {
                None
            };
            Ok(Page::new(rows, next))
        }
    }

    #[async_trait]
    impl SourceOrSink for MemorySource {
        type Config = CoreConfig;

        async fn initialize(
            &mut self,
            _ctx: Option<&PipelineContext>,
            config: Self::Config,
        ) -> ConnectorResult<()> {
            self.config = Some(config);
            Ok(())
        }

        async fn validate(&mut self, _ctx: Option<&PipelineContext>) -> ValidationResult {
            if self.fail_validation {
                ValidationResult::error("memory backend unavailable")
            } else {
                ValidationResult::Ok
            }
        }
    }

    struct IntConverter;

    impl RowConverter<i64> for IntConverter {
        fn convert(&self, row: &i64, schema: &SchemaDescriptor) -> ConnectorResult<Record> {
            Record::new(schema, vec![Value::Int64(*row)])
        }
    }

    #[async_trait]
    impl Source for MemorySource {
        async fn create_reader(
            &mut self,
            _ctx: Option<&PipelineContext>,
        ) -> ConnectorResult<Box<dyn BoundedReader>> {
            let config = self
                .config
                .as_ref()
                .ok_or_else(|| ConnectorError::config("component not initialized"))?;
            let schema =
                SchemaDescriptor::new(vec![FieldDescriptor::new("value", FieldType::Int64)]);
            let fetch = MemoryFetch {
                rows: self.rows.clone(),
                page_size: self.page_size,
            };
            let reader = PagedReader::new(
                config.component_name.clone(),
                fetch,
                Box::new(IntConverter),
                schema,
                config.error_policy(),
            );
            Ok(Box::new(reader))
        }
    }

    fn config(name: &str) -> CoreConfig {
        CoreConfig {
            component_name: name.to_string(),
            ..CoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_runtime_drives_source_to_exhaustion() {
        let source = MemorySource {
            rows: vec![10, 20, 30, 40, 50],
            page_size: 2,
            config: None,
            fail_validation: false,
        };
        let mut runtime = SourceRuntime::new(source, config("mem_input")).unwrap();

        let mut seen = Vec::new();
        let stats = runtime
            .run(None, |record| {
                match record.at(0) {
                    Some(Value::Int64(v)) => seen.push(*v),
                    other => panic!("unexpected value {:?}", other),
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![10, 20, 30, 40, 50]);
        assert_eq!(stats.total_count, 5);
        assert_eq!(stats.success_count, 5);
        assert_eq!(stats.reject_count, 0);
    }

    #[tokio::test]
    async fn test_validation_failure_aborts_run() {
        let source = MemorySource {
            rows: vec![1],
            page_size: 1,
            config: None,
            fail_validation: true,
        };
        let mut runtime = SourceRuntime::new(source, config("mem_input")).unwrap();
        let err = runtime.run(None, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_runtime_cannot_run_twice() {
        let source = MemorySource {
            rows: vec![],
            page_size: 1,
            config: None,
            fail_validation: false,
        };
        let mut runtime = SourceRuntime::new(source, config("mem_input")).unwrap();
        runtime.run(None, |_| Ok(())).await.unwrap();
        assert!(runtime.run(None, |_| Ok(())).await.is_err());
    }

    #[test]
    fn test_runtime_rejects_invalid_core_config() {
        let source = MemorySource {
            rows: vec![],
            page_size: 1,
            config: None,
            fail_validation: false,
        };
        let mut bad = config("mem_input");
        bad.fetch_size = 0;
        assert!(SourceRuntime::new(source, bad).is_err());
    }
}
