//! Offset and cursor pagination walkers
//!
//! Walkers take a `fetch_page` closure so they work with any endpoint; the
//! closure receives the (clamped) page size and the position to read from.
//! Streams are pull-based: the next page is requested only after the
//! consumer has drained the current one, and dropping the stream stops the
//! walk.

use std::future::Future;

use cadenza_domain::{CursorPage, Page, PageLimits, Result};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::executor::RequestExecutor;
use super::request::ApiRequest;

/// Generic walker over paginated collections
#[derive(Debug, Clone, Copy, Default)]
pub struct PaginationEngine {
    limits: PageLimits,
}

struct OffsetWalk<F> {
    fetch: F,
    limit: u32,
    offset: u32,
    remaining: Option<usize>,
    finished: bool,
}

struct CursorWalk<F> {
    fetch: F,
    limit: u32,
    after: Option<String>,
    remaining: Option<usize>,
    finished: bool,
}

impl PaginationEngine {
    pub fn new(limits: PageLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    /// Walk an offset collection and gather up to `max_items` items.
    ///
    /// # Errors
    /// The first error returned by `fetch_page`.
    pub async fn collect_all<T, F, Fut>(&self, page_size: u32, max_items: Option<usize>, fetch_page: F) -> Result<Vec<T>>
    where
        T: Send,
        F: FnMut(u32, u32) -> Fut + Send,
        Fut: Future<Output = Result<Page<T>>> + Send,
    {
        self.stream_pages(page_size, max_items, fetch_page)
            .try_fold(Vec::new(), |mut items, page| async move {
                items.extend(page.items);
                Ok(items)
            })
            .await
    }

    /// Items of an offset collection, fetched page by page on demand.
    pub fn stream<'a, T, F, Fut>(&self, page_size: u32, max_items: Option<usize>, fetch_page: F) -> BoxStream<'a, Result<T>>
    where
        T: Send + 'a,
        F: FnMut(u32, u32) -> Fut + Send + 'a,
        Fut: Future<Output = Result<Page<T>>> + Send + 'a,
    {
        self.stream_pages(page_size, max_items, fetch_page)
            .map_ok(|page| stream::iter(page.items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Whole pages of an offset collection; the last one is truncated at
    /// `max_items`.
    pub fn stream_pages<'a, T, F, Fut>(
        &self,
        page_size: u32,
        max_items: Option<usize>,
        fetch_page: F,
    ) -> BoxStream<'a, Result<Page<T>>>
    where
        T: Send + 'a,
        F: FnMut(u32, u32) -> Fut + Send + 'a,
        Fut: Future<Output = Result<Page<T>>> + Send + 'a,
    {
        let walk = OffsetWalk {
            fetch: fetch_page,
            limit: self.limits.clamp(page_size),
            offset: 0,
            remaining: max_items,
            finished: false,
        };

        stream::try_unfold(walk, |mut walk| async move {
            if walk.finished || walk.remaining == Some(0) {
                return Ok(None);
            }

            debug!(limit = walk.limit, offset = walk.offset, "fetching offset page");
            let mut page = match (walk.fetch)(walk.limit, walk.offset).await {
                Ok(page) => page,
                Err(err) => return Err(err),
            };
            if page.items.is_empty() {
                return Ok(None);
            }

            walk.offset = page.next_offset();
            walk.finished = page.next.is_none();
            if let Some(remaining) = walk.remaining.as_mut() {
                page.items.truncate(*remaining);
                *remaining -= page.items.len();
            }
            Ok(Some((page, walk)))
        })
        .boxed()
    }

    /// Walk a cursor collection and gather up to `max_items` items.
    ///
    /// # Errors
    /// The first error returned by `fetch_page`.
    pub async fn collect_all_cursor<T, F, Fut>(
        &self,
        page_size: u32,
        max_items: Option<usize>,
        fetch_page: F,
    ) -> Result<Vec<T>>
    where
        T: Send,
        F: FnMut(u32, Option<String>) -> Fut + Send,
        Fut: Future<Output = Result<CursorPage<T>>> + Send,
    {
        self.stream_cursor_pages(page_size, max_items, fetch_page)
            .try_fold(Vec::new(), |mut items, page| async move {
                items.extend(page.items);
                Ok(items)
            })
            .await
    }

    pub fn stream_cursor<'a, T, F, Fut>(
        &self,
        page_size: u32,
        max_items: Option<usize>,
        fetch_page: F,
    ) -> BoxStream<'a, Result<T>>
    where
        T: Send + 'a,
        F: FnMut(u32, Option<String>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<CursorPage<T>>> + Send + 'a,
    {
        self.stream_cursor_pages(page_size, max_items, fetch_page)
            .map_ok(|page| stream::iter(page.items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Whole pages of a cursor collection; ends when `cursors.after` is absent.
    pub fn stream_cursor_pages<'a, T, F, Fut>(
        &self,
        page_size: u32,
        max_items: Option<usize>,
        fetch_page: F,
    ) -> BoxStream<'a, Result<CursorPage<T>>>
    where
        T: Send + 'a,
        F: FnMut(u32, Option<String>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<CursorPage<T>>> + Send + 'a,
    {
        let walk = CursorWalk {
            fetch: fetch_page,
            limit: self.limits.clamp(page_size),
            after: None,
            remaining: max_items,
            finished: false,
        };

        stream::try_unfold(walk, |mut walk| async move {
            if walk.finished || walk.remaining == Some(0) {
                return Ok(None);
            }

            debug!(limit = walk.limit, after = ?walk.after, "fetching cursor page");
            let mut page = match (walk.fetch)(walk.limit, walk.after.take()).await {
                Ok(page) => page,
                Err(err) => return Err(err),
            };
            if page.items.is_empty() {
                return Ok(None);
            }

            walk.after = page.after().map(str::to_owned);
            walk.finished = walk.after.is_none();
            if let Some(remaining) = walk.remaining.as_mut() {
                page.items.truncate(*remaining);
                *remaining -= page.items.len();
            }
            Ok(Some((page, walk)))
        })
        .boxed()
    }

    /// Continue a collection embedded in a larger resource by GETting each
    /// absolute `next` link through `executor`.
    ///
    /// # Errors
    /// The first error from the executor.
    #[instrument(skip(self, executor, first_page), fields(href = %first_page.href))]
    pub async fn follow_next<T>(
        &self,
        executor: &RequestExecutor,
        first_page: Page<T>,
        max_items: Option<usize>,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let bound = max_items.unwrap_or(usize::MAX);
        let mut next = first_page.next;
        let mut items = first_page.items;
        items.truncate(bound);

        while items.len() < bound {
            let Some(url) = next.take() else { break };
            debug!(%url, collected = items.len(), "following next link");
            let page: Page<T> = executor.fetch(ApiRequest::get(url)).await?;
            if page.items.is_empty() {
                break;
            }
            next = page.next;
            items.extend(page.items.into_iter().take(bound - items.len()));
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use cadenza_common::testing::offset_page;
    use cadenza_domain::{ApiError, Cursors};

    use super::*;

    fn letters(limit: u32, offset: u32) -> Result<Page<char>> {
        let all = ['A', 'B', 'C', 'D', 'E'];
        let start = (offset as usize).min(all.len());
        let end = (start + limit as usize).min(all.len());
        Ok(offset_page(all[start..end].to_vec(), offset, all.len() as u32, end < all.len()))
    }

    #[tokio::test]
    async fn collects_every_page_until_next_is_absent() {
        let engine = PaginationEngine::default();
        let items = engine.collect_all(2, None, |limit, offset| async move { letters(limit, offset) }).await.unwrap();
        assert_eq!(items, vec!['A', 'B', 'C', 'D', 'E']);
    }

    #[tokio::test]
    async fn truncates_at_max_items_without_fetching_further() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let engine = PaginationEngine::default();

        let items = engine
            .collect_all(2, Some(3), move |limit, offset| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { letters(limit, offset) }
            })
            .await
            .unwrap();

        assert_eq!(items, vec!['A', 'B', 'C']);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn page_size_is_clamped_before_first_use() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let engine = PaginationEngine::default();

        engine
            .collect_all(500, Some(1), move |limit, offset| {
                log.lock().push(limit);
                async move { letters(limit, offset) }
            })
            .await
            .unwrap();
        engine.collect_all(0, Some(1), |limit, offset| async move { letters(limit, offset) }).await.unwrap();

        assert_eq!(*seen.lock(), vec![50]);
        assert_eq!(engine.limits().clamp(0), 1);
    }

    #[tokio::test]
    async fn empty_page_ends_the_walk() {
        let engine = PaginationEngine::default();
        let items: Vec<u8> = engine
            .collect_all(10, None, |limit, offset| async move {
                let mut page = Page::empty(limit, offset);
                page.next = Some("https://api.example.com/v1/loop".into());
                Ok(page)
            })
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn stream_fetches_lazily_and_stops_when_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let engine = PaginationEngine::default();

        let mut stream = engine.stream(2, None, move |limit, offset| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { letters(limit, offset) }
        });

        assert_eq!(stream.next().await.unwrap().unwrap(), 'A');
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 'B');
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 'C');
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(stream);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stream_surfaces_fetch_errors_and_ends() {
        let engine = PaginationEngine::default();
        let results: Vec<Result<char>> = engine
            .stream(2, None, |limit, offset| async move {
                if offset > 0 {
                    Err(ApiError::Server { status: 502, message: "bad gateway".into() })
                } else {
                    letters(limit, offset)
                }
            })
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(results[2], Err(ApiError::Server { status: 502, .. })));
    }

    fn cursor_page(items: Vec<u32>, after: Option<&str>) -> CursorPage<u32> {
        CursorPage {
            href: String::new(),
            limit: 2,
            next: after.map(|a| format!("https://api.example.com/v1/me/following?after={a}")),
            cursors: Some(Cursors { after: after.map(str::to_owned), before: None }),
            total: None,
            items,
        }
    }

    #[tokio::test]
    async fn cursor_walk_follows_after_until_absent() {
        let cursors_seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&cursors_seen);
        let engine = PaginationEngine::default();

        let items = engine
            .collect_all_cursor(2, None, move |_limit, after: Option<String>| {
                log.lock().push(after.clone());
                async move {
                    Ok(match after.as_deref() {
                        None => cursor_page(vec![1, 2], Some("c1")),
                        Some("c1") => cursor_page(vec![3, 4], Some("c2")),
                        _ => cursor_page(vec![5], None),
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(*cursors_seen.lock(), vec![None, Some("c1".to_string()), Some("c2".to_string())]);
    }

    #[tokio::test]
    async fn cursor_stream_respects_max_items() {
        let engine = PaginationEngine::default();
        let pages: Vec<CursorPage<u32>> = engine
            .stream_cursor_pages(2, Some(3), |_limit, after: Option<String>| async move {
                Ok(match after {
                    None => cursor_page(vec![1, 2], Some("c1")),
                    Some(_) => cursor_page(vec![3, 4], Some("c2")),
                })
            })
            .try_collect()
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].items, vec![3]);
    }
}
