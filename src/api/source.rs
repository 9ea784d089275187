//! The seam between the cycle orchestrator and the content API.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use super::{ApiError, FileEntry, RemoteItem, ResolvedFile};

/// Upstream listing and link resolution, as the orchestrator sees it.
///
/// [`ApiClient`](super::ApiClient) is the production implementation; tests
/// substitute scripted sources.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn ContentSource>`. Rust 2024 native async traits are not
/// object-safe.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Lazily lists every remote item, one page request at a time.
    ///
    /// Items are yielded in page order with duplicate identifiers removed.
    /// An `Err` is yielded at most once and is always the last element.
    /// The stream ends early, without an error, once `cancel` fires.
    fn fetch_all_pages(
        &self,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<RemoteItem, ApiError>>;

    /// Resolves a hoster link into a direct-access URL.
    async fn resolve(
        &self,
        entry: &FileEntry,
        cancel: &CancellationToken,
    ) -> Result<ResolvedFile, ApiError>;
}
