#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Scheduler integration tests.
//!
//! Every test runs on a paused clock, so debounce windows and transport
//! latency advance in virtual time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use layerquery_kernel::compile::{Dialect, TemporalRange};
use layerquery_kernel::entry::{EntryStore, LayerKey};
use layerquery_kernel::request::RequestParams;
use layerquery_kernel::scheduler::{DataSource, QueryManager, SchedulerConfig, SchedulerState};
use layerquery_kernel::{EngineError, TransportError};
use layerquery_test_utils::{
    RecordingSink, RecordingTransport, entry, equals_filter, like_filter, store_with, test_area,
};

fn source(dialect: Dialect) -> DataSource {
    DataSource::new(LayerKey::new("L", "wfs"), dialect)
}

fn linked_store() -> Arc<EntryStore> {
    store_with(
        vec![test_area("A1")],
        vec![like_filter("F1", "PROPERTY", "Aaa*")],
        vec![entry("L", "A1", "F1")],
    )
}

fn manager(
    store: Arc<EntryStore>,
    transport: Arc<RecordingTransport>,
    sink: Arc<RecordingSink>,
) -> Arc<QueryManager> {
    QueryManager::new(store, transport, sink, SchedulerConfig::default())
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// -------------------------------------------------------------------------
// Debounce
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn bursts_of_changes_issue_one_request() {
    let store = linked_store();
    let transport = RecordingTransport::new();
    let manager = manager(store.clone(), transport.clone(), RecordingSink::new());

    manager.attach(source(Dialect::Ecql)).unwrap();
    for _ in 0..5 {
        advance(100).await;
        store.add_entry(entry("L", "A1", "F1"));
    }
    assert_eq!(transport.request_count(), 0);

    advance(400).await;
    assert_eq!(transport.request_count(), 1);
    let filter = transport.requests()[0].params.get("CQL_FILTER").unwrap().to_string();
    assert!(filter.starts_with("((INTERSECTS(geom, POLYGON"));
    assert!(filter.ends_with("AND (PROPERTY ILIKE 'Aaa%'))"));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unrelated_changes_are_ignored() {
    let store = linked_store();
    let transport = RecordingTransport::new();
    let manager = manager(store.clone(), transport.clone(), RecordingSink::new());

    manager.attach(source(Dialect::Ecql)).unwrap();
    advance(300).await;
    assert_eq!(transport.request_count(), 1);

    store.add_entry(entry("M", "A1", ""));
    store.add_area(test_area("A9"));
    advance(300).await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(manager.status("L").unwrap().state, SchedulerState::Idle);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn states_follow_debounce_and_loading() {
    let transport = RecordingTransport::with_latency(Duration::from_secs(1));
    let sink = RecordingSink::new();
    let manager = manager(linked_store(), transport.clone(), sink.clone());

    manager.attach(source(Dialect::Ecql)).unwrap();
    advance(10).await;
    assert_eq!(manager.status("L").unwrap().state, SchedulerState::ScheduledDebounce);

    advance(250).await;
    let status = manager.status("L").unwrap();
    assert_eq!(status.state, SchedulerState::Loading);
    assert!(status.in_flight);
    assert_eq!(status.generation, 1);
    assert!(sink.delivered().is_empty());

    advance(1000).await;
    let status = manager.status("L").unwrap();
    assert_eq!(status.state, SchedulerState::Idle);
    assert!(!status.in_flight);
    assert_eq!(sink.delivered()[0].body, "L#1");
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn change_while_loading_waits_for_completion() {
    let store = linked_store();
    let transport = RecordingTransport::with_latency(Duration::from_millis(500));
    let sink = RecordingSink::new();
    let manager = manager(store.clone(), transport.clone(), sink.clone());

    manager.attach(source(Dialect::Ecql)).unwrap();
    advance(300).await;
    assert_eq!(manager.status("L").unwrap().state, SchedulerState::Loading);

    store.add_area(test_area("A1"));
    advance(1200).await;

    let generations: Vec<u64> = transport.requests().iter().map(|r| r.generation).collect();
    assert_eq!(generations, vec![1, 2]);
    let delivered: Vec<u64> = sink.delivered().iter().map(|d| d.generation).collect();
    assert_eq!(delivered, vec![1, 2]);
    assert!(transport.aborted().is_empty());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn removing_an_entry_reissues_without_its_filter() {
    let store = store_with(
        vec![test_area("A1")],
        vec![
            like_filter("F1", "PROPERTY", "Aaa*"),
            equals_filter("F2", "KIND", "b"),
        ],
        vec![entry("L", "A1", "F1"), entry("L", "", "F2")],
    );
    let transport = RecordingTransport::new();
    let manager = manager(store.clone(), transport.clone(), RecordingSink::new());

    manager.attach(source(Dialect::Ecql)).unwrap();
    advance(300).await;
    assert_eq!(transport.request_count(), 1);
    assert!(transport.requests()[0].params.get("CQL_FILTER").unwrap().contains("KIND"));

    assert!(store.remove_entry(&entry("L", "", "F2")));
    advance(10).await;
    assert_eq!(manager.status("L").unwrap().state, SchedulerState::ScheduledDebounce);

    advance(300).await;
    assert_eq!(transport.request_count(), 2);
    let filter = transport.requests()[1].params.get("CQL_FILTER").unwrap().to_string();
    assert!(!filter.contains("KIND"));
    assert!(filter.contains("PROPERTY ILIKE 'Aaa%'"));
    manager.shutdown().await;
}

// -------------------------------------------------------------------------
// Spatial fail-closed
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn missing_inclusion_area_issues_nothing() {
    let store = store_with(
        vec![],
        vec![like_filter("F1", "PROPERTY", "Aaa*")],
        vec![entry("L", "", "F1")],
    );
    let transport = RecordingTransport::new();
    let sink = RecordingSink::new();
    let manager = manager(store, transport.clone(), sink.clone());

    manager.attach(source(Dialect::Ecql).spatial_required()).unwrap();
    advance(300).await;

    assert_eq!(transport.request_count(), 0);
    assert_eq!(sink.cleared(), vec!["L".to_string()]);
    assert_eq!(manager.status("L").unwrap().state, SchedulerState::Idle);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn removing_last_area_clears_results() {
    let store = linked_store();
    let transport = RecordingTransport::new();
    let sink = RecordingSink::new();
    let manager = manager(store.clone(), transport.clone(), sink.clone());

    manager.attach(source(Dialect::Arc).spatial_required()).unwrap();
    advance(300).await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(sink.delivered().len(), 1);

    assert!(store.remove_area("A1"));
    advance(300).await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(sink.cleared(), vec!["L".to_string()]);
    manager.shutdown().await;
}

// -------------------------------------------------------------------------
// Aborts and removal
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn removed_layer_drops_late_results() {
    let store = linked_store();
    let transport = RecordingTransport::with_latency(Duration::from_secs(1));
    let sink = RecordingSink::new();
    let manager = manager(store.clone(), transport.clone(), sink.clone());

    manager.attach(source(Dialect::Ecql)).unwrap();
    advance(300).await;
    assert_eq!(manager.status("L").unwrap().state, SchedulerState::Loading);

    assert_eq!(manager.remove_layer("L").await.unwrap(), 1);
    advance(2000).await;

    assert_eq!(transport.aborted(), vec![1]);
    assert!(sink.delivered().is_empty());
    assert_eq!(sink.cleared(), vec!["L".to_string()]);
    assert!(store.entries_for_layer("L").is_empty());
    assert!(matches!(
        manager.refresh("L"),
        Err(EngineError::UnknownDataSource(id)) if id == "L"
    ));
}

#[tokio::test(start_paused = true)]
async fn losing_the_area_while_loading_discards_the_late_response() {
    let store = linked_store();
    // Ignores abort and still answers after its full latency.
    let transport = RecordingTransport::with_latency(Duration::from_secs(1));
    let sink = RecordingSink::new();
    let manager = manager(store.clone(), transport.clone(), sink.clone());

    manager.attach(source(Dialect::Ecql).spatial_required()).unwrap();
    advance(300).await;
    assert_eq!(manager.status("L").unwrap().generation, 1);

    assert!(store.remove_area("A1"));
    advance(300).await;
    let status = manager.status("L").unwrap();
    assert_eq!(transport.aborted(), vec![1]);
    assert_eq!(sink.cleared(), vec!["L".to_string()]);
    assert_eq!(status.generation, 2);
    assert_eq!(status.state, SchedulerState::Idle);
    assert!(!status.in_flight);

    advance(1000).await;
    let status = manager.status("L").unwrap();
    assert!(sink.delivered().is_empty());
    assert_eq!(transport.request_count(), 1);
    assert_eq!(status.generation, 2);
    assert_eq!(status.state, SchedulerState::Idle);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_layer_is_an_error() {
    let manager = manager(
        Arc::new(EntryStore::new()),
        RecordingTransport::new(),
        RecordingSink::new(),
    );
    assert!(matches!(
        manager.status("nope"),
        Err(EngineError::UnknownDataSource(_))
    ));
    assert!(manager.remove_layer("nope").await.is_err());
    assert!(manager.layer_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transport_failure_reaches_sink() {
    let transport = RecordingTransport::failing(TransportError::Failed("503".to_string()));
    let sink = RecordingSink::new();
    let manager = manager(linked_store(), transport, sink.clone());

    manager.attach(source(Dialect::Ecql)).unwrap();
    advance(300).await;

    assert_eq!(
        sink.failures(),
        vec![("L".to_string(), TransportError::Failed("503".to_string()))]
    );
    assert!(sink.delivered().is_empty());
    assert_eq!(manager.status("L").unwrap().state, SchedulerState::Idle);
    manager.shutdown().await;
}

// -------------------------------------------------------------------------
// Visibility and request parameters
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn hidden_layer_refreshes_when_shown() {
    let transport = RecordingTransport::new();
    let manager = manager(linked_store(), transport.clone(), RecordingSink::new());

    manager.attach(source(Dialect::Ecql).hidden()).unwrap();
    advance(300).await;
    assert_eq!(transport.request_count(), 0);
    assert!(manager.status("L").unwrap().refresh_on_visible);

    manager.set_visible("L", true).unwrap();
    advance(300).await;
    assert_eq!(transport.request_count(), 1);
    assert!(!manager.status("L").unwrap().refresh_on_visible);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn attribute_store_request_carries_geometry() {
    let transport = RecordingTransport::new();
    let manager = manager(linked_store(), transport.clone(), RecordingSink::new());
    let base = RequestParams::new().with("f", "json").with("outFields", "*");

    manager
        .attach(source(Dialect::Arc).with_base_params(base))
        .unwrap();
    advance(300).await;

    let params = &transport.requests()[0].params;
    assert_eq!(params.get("f"), Some("json"));
    assert_eq!(params.get("where"), Some("(UPPER(PROPERTY) like 'AAA%')"));
    assert_eq!(params.get("spatialRel"), Some("esriSpatialRelIntersects"));
    assert!(params.get("geometry").unwrap().contains("\"rings\""));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn time_window_joins_the_filter() {
    let store = store_with(
        vec![],
        vec![like_filter("F1", "NAME", "a*")],
        vec![entry("L", "", "F1")],
    );
    let transport = RecordingTransport::new();
    let config = SchedulerConfig {
        round_time_to_seconds: true,
        ..SchedulerConfig::default()
    };
    let manager = QueryManager::new(store, transport.clone(), RecordingSink::new(), config);
    let from: DateTime<Utc> = "2024-05-01T10:00:00.250Z".parse().unwrap();
    let to: DateTime<Utc> = "2024-05-01T11:00:00.250Z".parse().unwrap();

    manager.attach(source(Dialect::Ecql)).unwrap();
    manager
        .set_temporal("L", TemporalRange::new("observed", from, to))
        .unwrap();
    advance(300).await;

    assert_eq!(transport.request_count(), 1);
    assert_eq!(
        transport.requests()[0].params.get("CQL_FILTER"),
        Some(
            "((NAME ILIKE 'a%') AND (observed <= 2024-05-01T11:00:01Z) AND (observed >= 2024-05-01T10:00:00Z))"
        )
    );

    manager.set_temporal("L", None).unwrap();
    advance(300).await;
    assert_eq!(
        transport.requests()[1].params.get("CQL_FILTER"),
        Some("(NAME ILIKE 'a%')")
    );
    manager.shutdown().await;
}
