//! Caller-supplied data and markup seams.
//!
//! The pipeline never inspects fetched data: a `Fetcher` produces opaque bytes
//! and a `Renderer` turns them into output bytes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::context::RequestId;

/// Parameters handed to a fetch function.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Fragment that started the fetch.
    pub fragment_id: String,
    /// Cache key the result will be stored under.
    pub cache_key: String,
    /// Render that started the fetch. Coalesced subscribers from other
    /// renders share this fetch and therefore this ID.
    pub request_id: RequestId,
    /// Time budget for the fetch.
    pub timeout: Duration,
}

/// Source of raw fragment data.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the fragment's data.
    async fn fetch(&self, ctx: FetchContext) -> anyhow::Result<Bytes>;
}

/// Adapter turning an async closure into a `Fetcher`.
pub struct FnFetcher<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Fetcher for FnFetcher<F>
where
    F: Fn(FetchContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    async fn fetch(&self, ctx: FetchContext) -> anyhow::Result<Bytes> {
        (self.f)(ctx).await
    }
}

/// Build a shared `Fetcher` from an async closure.
///
/// ```ignore
/// let fetcher = fetch_fn(|ctx| async move {
///     Ok(Bytes::from(format!("data for {}", ctx.cache_key)))
/// });
/// ```
pub fn fetch_fn<F, Fut>(f: F) -> Arc<dyn Fetcher>
where
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    Arc::new(FnFetcher { f })
}

/// Turns fetched data into output bytes.
pub trait Renderer: Send + Sync {
    /// Render fetched data.
    fn render(&self, data: &Bytes) -> anyhow::Result<Bytes>;
}

impl<F> Renderer for F
where
    F: Fn(&Bytes) -> anyhow::Result<Bytes> + Send + Sync,
{
    fn render(&self, data: &Bytes) -> anyhow::Result<Bytes> {
        self(data)
    }
}

/// Renderer that emits fetched bytes unchanged.
pub fn pass_through() -> Arc<dyn Renderer> {
    Arc::new(|data: &Bytes| -> anyhow::Result<Bytes> { Ok(data.clone()) })
}
