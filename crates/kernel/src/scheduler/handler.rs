//! Per-data-source query handler.
//!
//! Each handler owns a driver task holding the debounce deadline, the
//! in-flight request, and the modifier pipeline for one layer. Change
//! notifications (store events, visibility, explicit refresh) re-arm the
//! debounce window; when it expires the layer is resolved, compiled, and
//! re-issued. At most one request is in flight per layer, and every abort
//! bumps the generation so a late completion of an aborted request is
//! dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::transport::{IssuedRequest, ResultSink, Transport};
use crate::compile::{CompileOptions, Dialect, DialectCompiler, TemporalRange, compiler_for};
use crate::entry::{EntryStore, LayerKey, ResolvedQuery, StoreEvent, resolve};
use crate::error::{Advisory, EngineError, EngineResult, TransportError};
use crate::request::{ModifierPipeline, RequestParams};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Scheduler settings shared by every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    /// Send time bounds with whole-second precision.
    pub round_time_to_seconds: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            round_time_to_seconds: false,
        }
    }
}

/// Scheduling state of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    ScheduledDebounce,
    Loading,
}

/// A queryable layer and how to talk to its backend.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub layer: LayerKey,
    pub dialect: Dialect,
    /// Issue nothing unless at least one inclusion area resolves.
    pub spatial_required: bool,
    pub visible: bool,
    /// Parameters every request starts from (type name, output format, ...).
    pub base_params: RequestParams,
    pub compile: CompileOptions,
}

impl DataSource {
    pub fn new(layer: LayerKey, dialect: Dialect) -> Self {
        Self {
            layer,
            dialect,
            spatial_required: false,
            visible: true,
            base_params: RequestParams::new(),
            compile: CompileOptions::default(),
        }
    }

    pub fn spatial_required(mut self) -> Self {
        self.spatial_required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_base_params(mut self, params: RequestParams) -> Self {
        self.base_params = params;
        self
    }

    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.compile = options;
        self
    }
}

/// Observable state of a handler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandlerStatus {
    pub state: SchedulerState,
    /// Incremented on every issue and every abort.
    pub generation: u64,
    pub visible: bool,
    /// A refresh was skipped while hidden and runs on the next show.
    pub refresh_on_visible: bool,
    pub in_flight: bool,
    /// Number of requests issued so far.
    pub issued: u64,
    pub last_request: Option<RequestParams>,
    /// Advisories of the last compilation.
    pub advisories: Vec<Advisory>,
}

enum Command {
    Refresh,
    SetVisible(bool),
    SetTemporal(Option<TemporalRange>),
    Shutdown,
}

struct Completion {
    generation: u64,
    result: Result<String, TransportError>,
}

/// Handle to a running per-layer driver.
pub struct QueryHandler {
    layer_id: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<HandlerStatus>,
    task: JoinHandle<()>,
}

impl QueryHandler {
    /// Start the driver task for a data source.
    ///
    /// The handler starts idle; nothing is issued until a change arrives or
    /// [`QueryHandler::refresh`] is called.
    pub fn spawn(
        source: DataSource,
        store: Arc<EntryStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ResultSink>,
        config: SchedulerConfig,
    ) -> Self {
        let layer_id = source.layer.id.clone();
        let events = store.subscribe();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let initial = HandlerStatus {
            visible: source.visible,
            ..HandlerStatus::default()
        };
        let (status_tx, status_rx) = watch::channel(initial.clone());

        let driver = Driver {
            compiler: compiler_for(source.dialect, source.compile.clone()),
            source,
            store,
            transport,
            sink,
            config,
            pipeline: ModifierPipeline::new(),
            temporal: None,
            deadline: None,
            in_flight: None,
            completions: completions_tx,
            status: initial,
            status_tx,
        };
        let task = tokio::spawn(driver.run(commands_rx, completions_rx, events));
        debug!(layer = %layer_id, "query handler started");

        Self {
            layer_id,
            commands: commands_tx,
            status: status_rx,
            task,
        }
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    fn send(&self, command: Command) -> EngineResult<()> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::SchedulerClosed(self.layer_id.clone()))
    }

    /// Schedule a refresh through the debounce window.
    pub fn refresh(&self) -> EngineResult<()> {
        self.send(Command::Refresh)
    }

    pub fn set_visible(&self, visible: bool) -> EngineResult<()> {
        self.send(Command::SetVisible(visible))
    }

    /// Set or clear the time window applied to the layer.
    pub fn set_temporal(&self, range: Option<TemporalRange>) -> EngineResult<()> {
        self.send(Command::SetTemporal(range))
    }

    pub fn status(&self) -> HandlerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HandlerStatus> {
        self.status.clone()
    }

    /// Ask the driver to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Stop the driver, aborting any in-flight request, and wait for it.
    pub async fn shutdown(self) -> EngineResult<()> {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(layer = %self.layer_id, error = %e, "query handler task failed");
            return Err(EngineError::SchedulerClosed(self.layer_id));
        }
        Ok(())
    }
}

struct Driver {
    source: DataSource,
    store: Arc<EntryStore>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ResultSink>,
    config: SchedulerConfig,
    compiler: Arc<dyn DialectCompiler>,
    pipeline: ModifierPipeline,
    temporal: Option<TemporalRange>,
    deadline: Option<Instant>,
    in_flight: Option<JoinHandle<()>>,
    completions: mpsc::UnboundedSender<Completion>,
    status: HandlerStatus,
    status_tx: watch::Sender<HandlerStatus>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut events: broadcast::Receiver<StoreEvent>,
    ) {
        let mut events_open = true;

        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh) => self.schedule("refresh requested"),
                    Some(Command::SetVisible(visible)) => self.set_visible(visible),
                    Some(Command::SetTemporal(range)) => {
                        self.temporal = range;
                        self.schedule("time range changed");
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(completion) = completions.recv() => self.complete(completion),
                event = events.recv(), if events_open => match event {
                    Ok(event) => {
                        if self.store.event_concerns(&event, &self.source.layer.id) {
                            self.schedule("entries changed");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(layer = %self.source.layer.id, skipped, "store events lagged");
                        self.schedule("store events lagged");
                    }
                    Err(RecvError::Closed) => events_open = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.debounce_expired();
                }
            }
        }

        self.abort_in_flight(true);
        debug!(layer = %self.source.layer.id, "query handler stopped");
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    /// (Re)start the debounce window.
    fn schedule(&mut self, reason: &str) {
        self.deadline = Some(Instant::now() + self.config.debounce);
        self.status.state = SchedulerState::ScheduledDebounce;
        debug!(layer = %self.source.layer.id, reason, "refresh scheduled");
        self.publish();
    }

    fn set_visible(&mut self, visible: bool) {
        if self.status.visible == visible {
            return;
        }
        self.source.visible = visible;
        self.status.visible = visible;
        self.schedule(if visible { "layer shown" } else { "layer hidden" });
    }

    fn debounce_expired(&mut self) {
        self.deadline = None;
        let layer = self.source.layer.id.clone();
        let resolved = resolve(&self.store.snapshot(), &self.source.layer);
        let fail_closed = self.source.spatial_required && resolved.included_areas.is_empty();

        if self.in_flight.is_some() && !fail_closed {
            self.deadline = Some(Instant::now() + self.config.debounce);
            debug!(layer = %layer, "request still loading, re-arming debounce");
            return;
        }

        if !self.status.visible {
            self.status.state = SchedulerState::Idle;
            self.status.refresh_on_visible = true;
            debug!(layer = %layer, "layer hidden, deferring refresh");
            self.publish();
            return;
        }

        self.execute(resolved);
    }

    fn execute(&mut self, resolved: ResolvedQuery) {
        let layer = self.source.layer.id.clone();

        if self.source.spatial_required && resolved.included_areas.is_empty() {
            info!(layer = %layer, "no inclusion area resolved, clearing results");
            self.abort_in_flight(false);
            self.sink.clear(&layer);
            self.status.state = SchedulerState::Idle;
            self.status.refresh_on_visible = false;
            self.status.advisories = resolved.advisories;
            self.publish();
            return;
        }

        let compiled = self.compiler.compile_query(&resolved);
        for advisory in &compiled.advisories {
            warn!(layer = %layer, advisory = %advisory, "query advisory");
        }
        self.status.advisories = compiled.advisories.clone();
        self.pipeline.install_query(
            &self.compiler,
            compiled,
            self.temporal.as_ref(),
            self.config.round_time_to_seconds,
        );
        let params = self.pipeline.apply(&self.source.base_params);

        self.abort_in_flight(false);
        self.status.generation += 1;
        let generation = self.status.generation;
        let request = IssuedRequest {
            layer_id: layer.clone(),
            generation,
            params: params.clone(),
        };

        let transport = self.transport.clone();
        let completions = self.completions.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = transport.fetch(request).await;
            let _ = completions.send(Completion { generation, result });
        }));

        self.status.state = SchedulerState::Loading;
        self.status.in_flight = true;
        self.status.refresh_on_visible = false;
        self.status.issued += 1;
        self.status.last_request = Some(params);
        info!(layer = %layer, generation, "request issued");
        self.publish();
    }

    /// Abort the in-flight request, if any, and move to a new generation.
    ///
    /// The fetch task itself is only cancelled when the driver stops;
    /// otherwise its completion still arrives and is discarded as stale.
    fn abort_in_flight(&mut self, cancel_task: bool) {
        let Some(task) = self.in_flight.take() else {
            return;
        };
        if cancel_task {
            task.abort();
        }
        self.transport
            .abort(&self.source.layer.id, self.status.generation);
        self.status.generation += 1;
        self.status.in_flight = false;
        debug!(
            layer = %self.source.layer.id,
            generation = self.status.generation,
            "aborted in-flight request"
        );
    }

    fn complete(&mut self, completion: Completion) {
        let layer = self.source.layer.id.clone();
        if self.in_flight.is_none() || completion.generation != self.status.generation {
            debug!(
                layer = %layer,
                generation = completion.generation,
                current = self.status.generation,
                "discarding stale completion"
            );
            return;
        }
        self.in_flight = None;
        self.status.in_flight = false;

        match completion.result {
            Ok(body) => {
                debug!(layer = %layer, generation = completion.generation, "results delivered");
                self.sink.deliver(&layer, completion.generation, body);
            }
            Err(TransportError::Aborted) => {
                debug!(layer = %layer, generation = completion.generation, "request aborted");
            }
            Err(e) => {
                warn!(layer = %layer, generation = completion.generation, error = %e, "request failed");
                self.sink.failed(&layer, completion.generation, &e);
            }
        }

        self.status.state = if self.deadline.is_some() {
            SchedulerState::ScheduledDebounce
        } else {
            SchedulerState::Idle
        };
        self.publish();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingTransport {
        fetched: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn fetch(&self, request: IssuedRequest) -> Result<String, TransportError> {
            self.fetched.lock().push(request.generation);
            Ok(String::new())
        }
    }

    #[derive(Default)]
    struct NullSink;

    impl ResultSink for NullSink {
        fn deliver(&self, _layer_id: &str, _generation: u64, _body: String) {}
        fn clear(&self, _layer_id: &str) {}
    }

    fn spawn(source: DataSource) -> (QueryHandler, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport::default());
        let handler = QueryHandler::spawn(
            source,
            Arc::new(EntryStore::new()),
            transport.clone(),
            Arc::new(NullSink),
            SchedulerConfig::default(),
        );
        (handler, transport)
    }

    #[test]
    fn default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert!(!config.round_time_to_seconds);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_runs_through_debounce() {
        let (handler, transport) = spawn(DataSource::new(LayerKey::new("L", "wfs"), Dialect::Ecql));
        assert_eq!(handler.status().state, SchedulerState::Idle);

        handler.refresh().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handler.status().state, SchedulerState::ScheduledDebounce);
        assert!(transport.fetched.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*transport.fetched.lock(), vec![1]);
        assert_eq!(handler.status().state, SchedulerState::Idle);
        handler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_layer_defers_until_shown() {
        let (handler, transport) =
            spawn(DataSource::new(LayerKey::new("L", "wfs"), Dialect::Ecql).hidden());

        handler.refresh().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(transport.fetched.lock().is_empty());
        let status = handler.status();
        assert_eq!(status.state, SchedulerState::Idle);
        assert!(status.refresh_on_visible);

        handler.set_visible(true).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.fetched.lock().len(), 1);
        assert!(!handler.status().refresh_on_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_handler_rejects_commands() {
        let (handler, _) = spawn(DataSource::new(LayerKey::new("L", "wfs"), Dialect::Arc));
        handler.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            handler.refresh(),
            Err(EngineError::SchedulerClosed(layer)) if layer == "L"
        ));
    }
}
