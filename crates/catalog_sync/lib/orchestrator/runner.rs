use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::sources::SourceAdapter;
use crate::sync_service::types::{RequestHeaders, SyncConfig};
use crate::sync_service::write_policy::DeviceClassProvider;
use crate::sync_service::writer::CatalogStore;
use crate::sync_service::{Error, SourceRunReport, SyncService};

/// Type-erased "run this source once" handle so the orchestrator can hold every source together.
pub trait SourceRunner: Send + Sync {
    fn source_key(&self) -> &str;

    fn run<'a>(
        &'a self,
        config: SyncConfig,
        run_id: String,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<SourceRunReport, Error>>;
}

/// Runs a [`SourceAdapter`] through a fresh [`SyncService`] per run.
pub struct ServiceRunner<St, S>
where
    St: CatalogStore + Clone + 'static,
    S: SourceAdapter,
{
    store: St,
    device_class: Arc<dyn DeviceClassProvider>,
    source: Arc<S>,
    request_headers: RequestHeaders,
}

impl<St, S> ServiceRunner<St, S>
where
    St: CatalogStore + Clone + 'static,
    S: SourceAdapter,
{
    pub fn new(store: St, device_class: Arc<dyn DeviceClassProvider>, source: Arc<S>) -> Self {
        Self {
            store,
            device_class,
            source,
            request_headers: RequestHeaders::new(),
        }
    }

    pub fn with_request_headers(mut self, headers: RequestHeaders) -> Self {
        self.request_headers = headers;
        self
    }
}

impl<St, S> SourceRunner for ServiceRunner<St, S>
where
    St: CatalogStore + Clone + 'static,
    S: SourceAdapter,
{
    fn source_key(&self) -> &str {
        self.source.source_key()
    }

    fn run<'a>(
        &'a self,
        config: SyncConfig,
        run_id: String,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<SourceRunReport, Error>> {
        Box::pin(async move {
            let service = SyncService::new(
                self.store.clone(),
                Arc::clone(&self.device_class),
                run_id,
            )
            .with_request_headers(self.request_headers.clone());
            service
                .run_source(Arc::clone(&self.source), config, cancel)
                .await
        })
    }
}
