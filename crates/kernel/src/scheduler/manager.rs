//! Registry of per-layer query handlers.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::info;

use super::handler::{DataSource, HandlerStatus, QueryHandler, SchedulerConfig};
use super::transport::{ResultSink, Transport};
use crate::compile::TemporalRange;
use crate::entry::EntryStore;
use crate::error::{EngineError, EngineResult};

/// Owns one [`QueryHandler`] per attached data source.
pub struct QueryManager {
    store: Arc<EntryStore>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ResultSink>,
    config: SchedulerConfig,
    handlers: DashMap<String, QueryHandler>,
}

impl QueryManager {
    pub fn new(
        store: Arc<EntryStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ResultSink>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            sink,
            config,
            handlers: DashMap::new(),
        })
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    /// Start scheduling a data source and queue its first refresh.
    ///
    /// Attaching a layer id that is already attached replaces its handler.
    pub fn attach(&self, source: DataSource) -> EngineResult<()> {
        let layer_id = source.layer.id.clone();
        let handler = QueryHandler::spawn(
            source,
            self.store.clone(),
            self.transport.clone(),
            self.sink.clone(),
            self.config,
        );
        handler.refresh()?;
        if let Some(previous) = self.handlers.insert(layer_id.clone(), handler) {
            previous.stop();
        }
        info!(layer = %layer_id, "data source attached");
        Ok(())
    }

    fn with_handler<T>(
        &self,
        layer_id: &str,
        f: impl FnOnce(&QueryHandler) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let handler = self
            .handlers
            .get(layer_id)
            .ok_or_else(|| EngineError::UnknownDataSource(layer_id.to_string()))?;
        f(handler.value())
    }

    pub fn set_visible(&self, layer_id: &str, visible: bool) -> EngineResult<()> {
        self.with_handler(layer_id, |h| h.set_visible(visible))
    }

    pub fn refresh(&self, layer_id: &str) -> EngineResult<()> {
        self.with_handler(layer_id, QueryHandler::refresh)
    }

    pub fn set_temporal(&self, layer_id: &str, range: Option<TemporalRange>) -> EngineResult<()> {
        self.with_handler(layer_id, |h| h.set_temporal(range))
    }

    pub fn status(&self, layer_id: &str) -> EngineResult<HandlerStatus> {
        self.with_handler(layer_id, |h| Ok(h.status()))
    }

    pub fn subscribe(&self, layer_id: &str) -> EngineResult<watch::Receiver<HandlerStatus>> {
        self.with_handler(layer_id, |h| Ok(h.subscribe()))
    }

    /// Attached layer ids, sorted.
    pub fn layer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.iter().map(|h| h.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop a layer's handler, drop its results, and remove every entry
    /// naming it. Returns the number of entries removed.
    pub async fn remove_layer(&self, layer_id: &str) -> EngineResult<usize> {
        let (_, handler) = self
            .handlers
            .remove(layer_id)
            .ok_or_else(|| EngineError::UnknownDataSource(layer_id.to_string()))?;
        handler.shutdown().await?;
        self.sink.clear(layer_id);
        let removed = self.store.remove_entries_for_layer(layer_id);
        info!(layer = %layer_id, removed, "data source removed");
        Ok(removed)
    }

    /// Stop every handler.
    pub async fn shutdown(&self) {
        for layer_id in self.layer_ids() {
            if let Some((_, handler)) = self.handlers.remove(&layer_id) {
                let _ = handler.shutdown().await;
            }
        }
    }
}
