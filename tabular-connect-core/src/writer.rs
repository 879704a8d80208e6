//! The record write protocol.
//!
//! Writers differ from readers in failure granularity: a reader rejects a
//! whole fetch, a writer may reject a single record and keep going. The same
//! `die_on_error` policy governs both.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ErrorPolicy;
use crate::reader::ReturnStatistics;
use crate::record::Record;
use crate::ConnectorResult;

/// The write abstraction the pipeline engine drives:
/// `open() → {write(record)}* → close()`.
#[async_trait]
pub trait RecordWriter: Send {
    /// Prepare the writer for accepting records.
    async fn open(&mut self) -> ConnectorResult<()>;

    /// Write one record.
    ///
    /// Under the soft policy a backend failure rejects the record (counted,
    /// message recorded) and returns `Ok`; under the fatal policy it
    /// propagates.
    async fn write(&mut self, record: Record) -> ConnectorResult<()>;

    /// Flush remaining work and release the writer's own state. Returns the
    /// aggregate statistics. The shared connection stays open.
    async fn close(&mut self) -> ConnectorResult<ReturnStatistics>;

    /// Aggregate statistics so far.
    fn return_values(&self) -> ReturnStatistics;
}

/// Backend-specific write target.
#[async_trait]
pub trait WriteSink: Send {
    /// Persist one record in the backend.
    async fn put(&mut self, record: &Record) -> ConnectorResult<()>;

    /// Flush buffered work, if the backend batches.
    async fn flush(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Generic [`RecordWriter`] applying the component failure policy per record.
pub struct SinkWriter<S: WriteSink> {
    component_name: String,
    sink: S,
    policy: ErrorPolicy,
    stats: ReturnStatistics,
}

impl<S: WriteSink> SinkWriter<S> {
    /// Create a writer delivering records to `sink`.
    pub fn new(component_name: impl Into<String>, sink: S, policy: ErrorPolicy) -> Self {
        Self {
            component_name: component_name.into(),
            sink,
            policy,
            stats: ReturnStatistics::default(),
        }
    }
}

#[async_trait]
impl<S: WriteSink> RecordWriter for SinkWriter<S> {
    async fn open(&mut self) -> ConnectorResult<()> {
        debug!(component = %self.component_name, "opening writer");
        Ok(())
    }

    async fn write(&mut self, record: Record) -> ConnectorResult<()> {
        match self.sink.put(&record).await {
            Ok(()) => {
                self.stats.record_success();
                Ok(())
            }
            Err(err) if err.is_backend() && !self.policy.is_fatal() => {
                warn!(
                    component = %self.component_name,
                    error = %err,
                    "record rejected under soft policy"
                );
                self.stats.record_rejection(err.to_string());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn close(&mut self) -> ConnectorResult<ReturnStatistics> {
        self.sink.flush().await?;
        debug!(
            component = %self.component_name,
            written = self.stats.success_count,
            rejected = self.stats.reject_count,
            "writer closed"
        );
        Ok(self.stats.clone())
    }

    fn return_values(&self) -> ReturnStatistics {
        self.stats.clone()
    }
}
