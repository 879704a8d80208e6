//! The bounded read protocol: `start` / `advance` / `get_current` / `close`.
//!
//! The pipeline engine drives a reader strictly sequentially:
//! `start() → {advance()}* → close() → return_values()`, calling
//! `get_current()` whenever the last call reported `true`. [`PagedReader`]
//! implements the protocol once over any [`PageFetch`] backend; pagination
//! boundaries are never visible to the engine.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ErrorPolicy;
use crate::pagination::{ContinuationToken, PageFetch};
use crate::record::Record;
use crate::schema::SchemaDescriptor;
use crate::{ConnectorError, ConnectorResult};

/// Aggregate counters surfaced to the pipeline after consumption completes,
/// for downstream branching ("N records rejected").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnStatistics {
    /// Operations seen: successfully read/written records plus rejected
    /// operations.
    pub total_count: u64,
    /// Records successfully read or written.
    pub success_count: u64,
    /// Operations rejected under the soft failure policy.
    pub reject_count: u64,
    /// Message of the most recent recorded failure.
    pub last_error: Option<String>,
}

impl ReturnStatistics {
    /// Count one successful record.
    pub fn record_success(&mut self) {
        self.total_count += 1;
        self.success_count += 1;
    }

    /// Count one rejected operation and remember its failure message.
    pub fn record_rejection(&mut self, message: impl Into<String>) {
        self.total_count += 1;
        self.reject_count += 1;
        self.last_error = Some(message.into());
    }
}

/// Converts backend-native rows into records conforming to a resolved schema.
pub trait RowConverter<R>: Send + Sync {
    /// Convert one native row.
    ///
    /// Conversion failures signal a disagreement between the backend row shape
    /// and the resolved schema; they always propagate, regardless of the
    /// component's failure policy.
    fn convert(&self, row: &R, schema: &SchemaDescriptor) -> ConnectorResult<Record>;
}

/// The bounded iteration abstraction over a finite remote result set.
#[async_trait]
pub trait BoundedReader: Send {
    /// Perform the first fetch. Returns `true` when a record is available.
    ///
    /// Under the soft failure policy a backend failure yields `Ok(false)`
    /// (equivalent to an empty result) with the rejection recorded; under the
    /// fatal policy it propagates.
    async fn start(&mut self) -> ConnectorResult<bool>;

    /// Move to the next record, transparently fetching further pages.
    ///
    /// Returns `false` only when the page buffer is empty and no continuation
    /// token remains; after that it keeps returning `false`.
    async fn advance(&mut self) -> ConnectorResult<bool>;

    /// The record the reader is positioned on.
    ///
    /// Fails with [`ConnectorError::NoCurrentElement`] before a successful
    /// `start`, after exhaustion, and after `close`.
    fn get_current(&self) -> ConnectorResult<Record>;

    /// Release the reader's own paging state. The underlying shared
    /// connection is not closed; its lifetime is governed by the registry.
    async fn close(&mut self) -> ConnectorResult<()>;

    /// Aggregate statistics, available after consumption.
    fn return_values(&self) -> ReturnStatistics;

    /// The schema records conform to.
    fn schema(&self) -> &SchemaDescriptor;
}

/// Generic [`BoundedReader`] over any paginated backend.
///
/// Owns the continuation cursor privately; buffers at most one page.
pub struct PagedReader<F: PageFetch> {
    component_name: String,
    fetcher: F,
    converter: Box<dyn RowConverter<F::Row>>,
    schema: SchemaDescriptor,
    policy: ErrorPolicy,
    buffer: Vec<F::Row>,
    buffer_index: usize,
    token: Option<ContinuationToken>,
    current: Option<Record>,
    started: bool,
    exhausted: bool,
    closed: bool,
    stats: ReturnStatistics,
}

impl<F: PageFetch> PagedReader<F> {
    /// Create a reader over `fetcher`, producing records against `schema`.
    pub fn new(
        component_name: impl Into<String>,
        fetcher: F,
        converter: Box<dyn RowConverter<F::Row>>,
        schema: SchemaDescriptor,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            component_name: component_name.into(),
            fetcher,
            converter,
            schema,
            policy,
            buffer: Vec::new(),
            buffer_index: 0,
            token: None,
            current: None,
            started: false,
            exhausted: false,
            closed: false,
            stats: ReturnStatistics::default(),
        }
    }

    /// Fetch pages starting from `token` until one yields rows or the
    /// continuation chain ends. Returns whether a row is buffered.
    async fn fetch_pages(&mut self, mut token: Option<ContinuationToken>) -> ConnectorResult<bool> {
        loop {
            let page = self.fetcher.fetch_next(token.as_ref()).await?;
            debug!(
                component = %self.component_name,
                rows = page.rows.len(),
                more = !page.is_final(),
                "fetched page"
            );
            self.token = page.next;
            if !page.rows.is_empty() {
                self.buffer = page.rows;
                self.buffer_index = 0;
                return Ok(true);
            }
            match self.token.take() {
                Some(next) => token = Some(next),
                None => return Ok(false),
            }
        }
    }

    fn position(&mut self) -> ConnectorResult<()> {
        let row = &self.buffer[self.buffer_index];
        let record = self.converter.convert(row, &self.schema)?;
        self.current = Some(record);
        self.stats.record_success();
        Ok(())
    }

    fn mark_exhausted(&mut self) {
        self.current = None;
        self.exhausted = true;
        self.buffer.clear();
        self.token = None;
    }

    fn handle_fetch_error(&mut self, err: ConnectorError, op: &str) -> ConnectorResult<bool> {
        if err.is_backend() && !self.policy.is_fatal() {
            warn!(
                component = %self.component_name,
                operation = op,
                error = %err,
                "backend failure rejected under soft policy"
            );
            self.stats.record_rejection(err.to_string());
            self.mark_exhausted();
            return Ok(false);
        }
        Err(err)
    }
}

#[async_trait]
impl<F: PageFetch> BoundedReader for PagedReader<F> {
    async fn start(&mut self) -> ConnectorResult<bool> {
        if self.closed || self.exhausted {
            return Ok(false);
        }
        self.started = true;
        match self.fetch_pages(None).await {
            Ok(true) => {
                self.position()?;
                Ok(true)
            }
            Ok(false) => {
                self.mark_exhausted();
                Ok(false)
            }
            Err(err) => self.handle_fetch_error(err, "start"),
        }
    }

    async fn advance(&mut self) -> ConnectorResult<bool> {
        if !self.started || self.exhausted || self.closed {
            return Ok(false);
        }
        self.buffer_index += 1;
        if self.buffer_index < self.buffer.len() {
            self.position()?;
            return Ok(true);
        }
        match self.token.take() {
            None => {
                self.mark_exhausted();
                Ok(false)
            }
            Some(token) => match self.fetch_pages(Some(token)).await {
                Ok(true) => {
                    self.position()?;
                    Ok(true)
                }
                Ok(false) => {
                    self.mark_exhausted();
                    Ok(false)
                }
                Err(err) => self.handle_fetch_error(err, "advance"),
            },
        }
    }

    fn get_current(&self) -> ConnectorResult<Record> {
        self.current.clone().ok_or(ConnectorError::NoCurrentElement)
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        debug!(component = %self.component_name, "closing reader");
        self.closed = true;
        self.current = None;
        self.buffer.clear();
        self.token = None;
        Ok(())
    }

    fn return_values(&self) -> ReturnStatistics {
        self.stats.clone()
    }

    fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::Page;
    use crate::record::Value;
    use crate::schema::{FieldDescriptor, FieldType};

    /// Scripted backend: serves fixed pages, optionally failing on the n-th
    /// fetch call. The continuation token encodes the next page index.
    struct ScriptedFetch {
        pages: Vec<Vec<i64>>,
        fail_on_call: Option<usize>,
        calls: usize,
    }

    impl ScriptedFetch {
        fn new(pages: Vec<Vec<i64>>) -> Self {
            Self {
                pages,
                fail_on_call: None,
                calls: 0,
            }
        }

        fn failing_on(mut self, call: usize) -> Self {
            self.fail_on_call = Some(call);
            self
        }
    }

    #[async_trait]
    impl PageFetch for ScriptedFetch {
        type Row = i64;

        async fn fetch_next(
            &mut self,
            token: Option<&ContinuationToken>,
        ) -> ConnectorResult<Page<i64>> {
            self.calls += 1;
            if self.fail_on_call == Some(self.calls) {
                return Err(ConnectorError::backend("connection reset by backend"));
            }
            let index: usize = token.map(|t| t.as_str().parse().unwrap()).unwrap_or(0);
            let rows = self.pages.get(index).cloned().unwrap_or_default();
            let next = if index + 1 < self.pages.len() {
                Some(ContinuationToken::new((index + 1).to_string()))
            } else {
                None
            };
            Ok(Page::new(rows, next))
        }
    }

    fn value_schema() -> SchemaDescriptor {
        SchemaDescriptor::new(vec![FieldDescriptor::new("value", FieldType::Int64)])
    }

    struct IntConverter;

    impl RowConverter<i64> for IntConverter {
        fn convert(&self, row: &i64, schema: &SchemaDescriptor) -> ConnectorResult<Record> {
            Record::new(schema, vec![Value::Int64(*row)])
        }
    }

    fn reader(fetch: ScriptedFetch, policy: ErrorPolicy) -> PagedReader<ScriptedFetch> {
        PagedReader::new("test_input", fetch, Box::new(IntConverter), value_schema(), policy)
    }

    fn current_value(reader: &PagedReader<ScriptedFetch>) -> i64 {
        match reader.get_current().unwrap().at(0).unwrap() {
            Value::Int64(v) => *v,
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_soft_policy_start_failure_returns_false() {
        let mut r = reader(
            ScriptedFetch::new(vec![vec![1]]).failing_on(1),
            ErrorPolicy::Soft,
        );
        assert!(!r.start().await.unwrap());

        let stats = r.return_values();
        assert_eq!(stats.reject_count, 1);
        assert_eq!(stats.success_count, 0);
        assert!(stats.last_error.unwrap().contains("connection reset"));

        // the reader stays exhausted afterwards
        assert!(!r.advance().await.unwrap());
    }

    #[tokio::test]
    async fn test_fatal_policy_start_failure_raises() {
        let mut r = reader(
            ScriptedFetch::new(vec![vec![1]]).failing_on(1),
            ErrorPolicy::Fatal,
        );
        let err = r.start().await.unwrap_err();
        assert!(err.is_backend());
    }

    #[tokio::test]
    async fn test_n_rows_over_arbitrary_pages() {
        // 6 rows spread over pages of uneven size, including an empty page in
        // the middle of the continuation chain.
        let pages = vec![vec![1], vec![2, 3], vec![], vec![4, 5, 6]];
        let mut r = reader(ScriptedFetch::new(pages), ErrorPolicy::Fatal);

        assert!(r.start().await.unwrap());
        let mut advances = 0;
        while r.advance().await.unwrap() {
            advances += 1;
        }
        assert_eq!(advances, 5);

        // false forever after exhaustion
        assert!(!r.advance().await.unwrap());
        assert!(!r.advance().await.unwrap());

        let stats = r.return_values();
        assert_eq!(stats.total_count, 6);
        assert_eq!(stats.success_count, 6);
        assert_eq!(stats.reject_count, 0);
    }

    #[tokio::test]
    async fn test_get_current_outside_has_current_raises() {
        let mut r = reader(ScriptedFetch::new(vec![vec![1]]), ErrorPolicy::Fatal);
        assert!(matches!(
            r.get_current(),
            Err(ConnectorError::NoCurrentElement)
        ));

        assert!(r.start().await.unwrap());
        assert!(r.get_current().is_ok());

        assert!(!r.advance().await.unwrap());
        assert!(matches!(
            r.get_current(),
            Err(ConnectorError::NoCurrentElement)
        ));
    }

    #[tokio::test]
    async fn test_three_rows_in_pages_of_two_end_to_end() {
        let mut r = reader(ScriptedFetch::new(vec![vec![1, 2], vec![3]]), ErrorPolicy::Fatal);

        assert!(r.start().await.unwrap());
        assert_eq!(current_value(&r), 1);
        assert!(r.advance().await.unwrap());
        assert_eq!(current_value(&r), 2);
        // crosses the page boundary invisibly
        assert!(r.advance().await.unwrap());
        assert_eq!(current_value(&r), 3);
        assert!(!r.advance().await.unwrap());

        r.close().await.unwrap();
        let stats = r.return_values();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.reject_count, 0);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test]
    async fn test_soft_policy_advance_failure_exhausts() {
        let mut r = reader(
            ScriptedFetch::new(vec![vec![1, 2], vec![3]]).failing_on(2),
            ErrorPolicy::Soft,
        );
        assert!(r.start().await.unwrap());
        assert!(r.advance().await.unwrap());
        // the page-2 fetch fails softly
        assert!(!r.advance().await.unwrap());
        assert!(!r.advance().await.unwrap());

        let stats = r.return_values();
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.reject_count, 1);
    }

    #[tokio::test]
    async fn test_fatal_policy_advance_failure_raises() {
        let mut r = reader(
            ScriptedFetch::new(vec![vec![1, 2], vec![3]]).failing_on(2),
            ErrorPolicy::Fatal,
        );
        assert!(r.start().await.unwrap());
        assert!(r.advance().await.unwrap());
        assert!(r.advance().await.unwrap_err().is_backend());
    }

    #[tokio::test]
    async fn test_empty_result_set() {
        let mut r = reader(ScriptedFetch::new(vec![vec![]]), ErrorPolicy::Fatal);
        assert!(!r.start().await.unwrap());
        let stats = r.return_values();
        assert_eq!(stats.total_count, 0);
    }

    #[tokio::test]
    async fn test_close_releases_reader_state_only() {
        let mut r = reader(ScriptedFetch::new(vec![vec![1, 2]]), ErrorPolicy::Fatal);
        assert!(r.start().await.unwrap());
        r.close().await.unwrap();
        assert!(matches!(
            r.get_current(),
            Err(ConnectorError::NoCurrentElement)
        ));
        assert!(!r.advance().await.unwrap());
        // closing twice is harmless
        r.close().await.unwrap();
    }

    #[test]
    fn test_statistics_counters() {
        let mut stats = ReturnStatistics::default();
        stats.record_success();
        stats.record_success();
        stats.record_rejection("page fetch failed");
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.reject_count, 1);
        assert_eq!(stats.last_error.as_deref(), Some("page fetch failed"));
    }
}
