//! Pagination over backends with heterogeneous continuation mechanisms.
//!
//! Backends resume result sets with query locators, page offsets, cursor
//! objects or opaque server tokens. A [`PageFetch`] implementation hides that
//! behind a single `fetch_next` contract, and readers never let the
//! [`ContinuationToken`] escape.

use async_trait::async_trait;

use crate::ConnectorResult;

/// Opaque backend-specific marker enabling resumption of a paginated fetch.
///
/// The token's content is meaningful only to the [`PageFetch`] implementation
/// that produced it. Offset-paging backends stringify a row offset; locator
/// backends pass their server handle through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wrap a backend continuation marker.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw marker, for the owning fetch implementation to interpret.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One fetched batch of native backend rows plus the marker for the next one.
#[derive(Debug)]
pub struct Page<R> {
    /// Rows in backend-native representation.
    pub rows: Vec<R>,
    /// Continuation marker, or `None` when no further pages exist.
    pub next: Option<ContinuationToken>,
}

impl<R> Page<R> {
    /// A page with more data expected after it.
    pub fn new(rows: Vec<R>, next: Option<ContinuationToken>) -> Self {
        Self { rows, next }
    }

    /// The final page of a result set.
    pub fn last(rows: Vec<R>) -> Self {
        Self { rows, next: None }
    }

    /// An empty final page.
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            next: None,
        }
    }

    /// Whether the page carries no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether this is the last page of the result set.
    pub fn is_final(&self) -> bool {
        self.next.is_none()
    }
}

/// Backend-specific page fetching.
///
/// `None` on input means "first fetch" (full query execution or first page);
/// `None` in [`Page::next`] means no more pages. Implementations must not
/// assume the backend can report a total row count in advance: exhaustion may
/// only become knowable after an empty batch with no continuation token.
#[async_trait]
pub trait PageFetch: Send {
    /// Backend-native row representation.
    type Row: Send;

    /// Fetch the page after `token`, or the first page when `token` is `None`.
    async fn fetch_next(
        &mut self,
        token: Option<&ContinuationToken>,
    ) -> ConnectorResult<Page<Self::Row>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_shape() {
        let page: Page<u32> = Page::new(vec![1, 2], Some(ContinuationToken::new("2")));
        assert!(!page.is_empty());
        assert!(!page.is_final());

        let page: Page<u32> = Page::empty();
        assert!(page.is_empty());
        assert!(page.is_final());
    }

    #[test]
    fn test_token_is_opaque_passthrough() {
        let token = ContinuationToken::new("locator-01g");
        assert_eq!(token.as_str(), "locator-01g");
        assert_eq!(token, ContinuationToken::new(String::from("locator-01g")));
    }
}
