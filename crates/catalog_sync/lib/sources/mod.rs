//! Provider adapters: each one turns a backend into a stream of raw, provider-native batches.
//!
//! Payload types never leave an adapter except through [`IntoCatalogItem`], so the rest of the
//! pipeline only ever sees `CatalogItem`.

pub mod chat;
mod error_mapping;
pub mod xtream;

use std::sync::Arc;

use catalog_core::{IntoCatalogItem, ScanPhase};
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::sync_service::types::{FetchError, RequestHeaders};

pub use chat::{ChatHistoryClient, ChatHistorySource, HttpChatHistoryClient};
pub use xtream::{XtreamClient, XtreamCredentials, XtreamSource};

pub const XTREAM_SOURCE_KEY: &str = "xtream";
pub const CHAT_SOURCE_KEY: &str = "chat";

/// Parameters of one streaming fetch issued by a phase handler.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    pub phase: ScanPhase,
    /// Upper bound on records per yielded batch.
    pub batch_size: usize,
    /// Restricts the fetch to one provider category.
    pub category_id: Option<&'a str>,
    pub modified_since: Option<i64>,
    pub max_items: Option<usize>,
    pub headers: &'a RequestHeaders,
    pub cancel: &'a CancellationToken,
}

/// Streaming fetch primitive for one provider.
///
/// The stream ends when the provider has nothing more; a yielded `Err` is terminal for that
/// fetch. Implementations stop yielding once `request.cancel` fires.
pub trait SourceAdapter: Send + Sync + 'static {
    type Raw: IntoCatalogItem + Send + 'static;

    /// Stable key stored on every item and used in chain names.
    fn source_key(&self) -> &str;

    fn supported_phases(&self) -> &'static [ScanPhase];

    /// Rejects a category filter this source can never fetch; checked before a run starts.
    fn check_category_filter(&self, _phase: ScanPhase, _category_id: &str) -> Result<(), String> {
        Ok(())
    }

    fn stream_batches<'a>(
        &'a self,
        request: ScanRequest<'a>,
    ) -> BoxStream<'a, Result<Vec<Self::Raw>, FetchError>>;
}

impl<T> SourceAdapter for Arc<T>
where
    T: SourceAdapter + ?Sized,
{
    type Raw = T::Raw;

    fn source_key(&self) -> &str {
        (**self).source_key()
    }

    fn supported_phases(&self) -> &'static [ScanPhase] {
        (**self).supported_phases()
    }

    fn check_category_filter(&self, phase: ScanPhase, category_id: &str) -> Result<(), String> {
        (**self).check_category_filter(phase, category_id)
    }

    fn stream_batches<'a>(
        &'a self,
        request: ScanRequest<'a>,
    ) -> BoxStream<'a, Result<Vec<Self::Raw>, FetchError>> {
        (**self).stream_batches(request)
    }
}

/// Splits a fetched list into owned batches of at most `batch_size`.
pub(crate) fn into_batches<T>(records: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        batches.push(records.by_ref().take(batch_size).collect());
    }
    batches
}
