//! layerquery test utilities.
//!
//! Fixture builders for areas, filters, entries and stores, plus recording
//! doubles for the transport and result sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use layerquery_kernel::TransportError;
use layerquery_kernel::entry::{AreaEntry, EntryStore, FilterEntry, Geometry, QueryEntry, Selector};
use layerquery_kernel::filter::{FilterAst, FilterNode};
use layerquery_kernel::scheduler::{IssuedRequest, ResultSink, Transport};

/// Default filter kind used by fixtures.
pub const ENTRY_TYPE: &str = "wfs";

/// Axis-aligned square polygon with its lower-left corner at `(x, y)`.
pub fn square(x: f64, y: f64, size: f64) -> Geometry {
    Geometry::Polygon(vec![vec![
        [x, y],
        [x + size, y],
        [x + size, y + size],
        [x, y + size],
        [x, y],
    ]])
}

/// Shown unit-square area at the origin.
pub fn test_area(id: &str) -> AreaEntry {
    AreaEntry::new(id, square(0.0, 0.0, 1.0))
}

/// Shown area with the given geometry.
pub fn area_with(id: &str, geometry: Geometry) -> AreaEntry {
    AreaEntry::new(id, geometry)
}

/// Enabled filter holding one like comparison.
pub fn like_filter(id: &str, column: &str, pattern: &str) -> FilterEntry {
    FilterEntry::new(id, ENTRY_TYPE, FilterNode::like(column, pattern).into())
}

/// Enabled filter holding one equality comparison.
pub fn equals_filter(id: &str, column: &str, value: &str) -> FilterEntry {
    FilterEntry::new(id, ENTRY_TYPE, FilterNode::equals(column, value).into())
}

/// Enabled filter over several top-level nodes.
pub fn filter_of(id: &str, nodes: Vec<FilterNode>) -> FilterEntry {
    FilterEntry::new(id, ENTRY_TYPE, FilterAst::new(nodes))
}

/// Inclusion entry with AND grouping. Empty ids mean "none", `*` is the
/// wildcard.
pub fn entry(layer: &str, area: &str, filter: &str) -> QueryEntry {
    QueryEntry {
        layer: Selector::parse(layer).unwrap_or(Selector::Any),
        area: Selector::parse(area),
        filter: Selector::parse(filter),
        include_area: true,
        filter_group: true,
    }
}

/// Store pre-populated with the given content.
pub fn store_with(
    areas: Vec<AreaEntry>,
    filters: Vec<FilterEntry>,
    entries: Vec<QueryEntry>,
) -> Arc<EntryStore> {
    let store = EntryStore::new();
    for area in areas {
        store.add_area(area);
    }
    for filter in filters {
        store.add_filter(filter);
    }
    for entry in entries {
        store.add_entry(entry);
    }
    Arc::new(store)
}

/// Transport double that records every request and abort.
#[derive(Default)]
pub struct RecordingTransport {
    latency: Duration,
    failure: Option<TransportError>,
    requests: Mutex<Vec<IssuedRequest>>,
    aborted: Mutex<Vec<u64>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every fetch takes `latency` (virtual time under a paused runtime).
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    /// Every fetch fails with `error`.
    pub fn failing(error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(error),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<IssuedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Generations passed to `abort`, in order.
    pub fn aborted(&self) -> Vec<u64> {
        self.aborted.lock().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn fetch(&self, request: IssuedRequest) -> Result<String, TransportError> {
        let body = format!("{}#{}", request.layer_id, request.generation);
        self.requests.lock().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(body),
        }
    }

    fn abort(&self, _layer_id: &str, generation: u64) {
        self.aborted.lock().push(generation);
    }
}

/// One delivered result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub layer_id: String,
    pub generation: u64,
    pub body: String,
}

/// Result sink double that records what it receives.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Delivery>>,
    cleared: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, TransportError)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }

    /// Layer ids whose results were cleared, in order.
    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().clone()
    }

    pub fn failures(&self) -> Vec<(String, TransportError)> {
        self.failures.lock().clone()
    }
}

impl ResultSink for RecordingSink {
    fn deliver(&self, layer_id: &str, generation: u64, body: String) {
        self.delivered.lock().push(Delivery {
            layer_id: layer_id.to_string(),
            generation,
            body,
        });
    }

    fn clear(&self, layer_id: &str) {
        self.cleared.lock().push(layer_id.to_string());
    }

    fn failed(&self, layer_id: &str, _generation: u64, error: &TransportError) {
        self.failures
            .lock()
            .push((layer_id.to_string(), error.clone()));
    }
}

/// Workspace document fixtures.
pub mod workspaces {
    use serde_json::{Value, json};

    /// One layer, one area, one like filter, one entry linking them.
    pub fn single_like() -> Value {
        json!({
            "areas": [
                {"id": "A1", "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}}
            ],
            "filters": [
                {
                    "id": "F1",
                    "entryType": "wfs",
                    "filter": [{"type": "PropertyIsLike", "PropertyName": "PROPERTY", "Literal": "Aaa*"}]
                }
            ],
            "entries": [
                {"layerId": "L", "areaId": "A1", "filterId": "F1", "includeArea": "true", "filterGroup": "true"}
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_parses_selectors() {
        let e = entry("L", "*", "");
        assert_eq!(e.layer, Selector::id("L"));
        assert_eq!(e.area, Some(Selector::Any));
        assert_eq!(e.filter, None);
    }

    #[test]
    fn store_fixture_is_populated() {
        let store = store_with(
            vec![test_area("A1")],
            vec![like_filter("F1", "NAME", "a*")],
            vec![entry("L", "A1", "F1")],
        );
        let snapshot = store.snapshot();
        assert_eq!(snapshot.areas.len(), 1);
        assert_eq!(snapshot.filters.len(), 1);
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[test]
    fn workspace_fixture_parses() {
        let json = workspaces::single_like().to_string();
        let document = layerquery_kernel::entry::WorkspaceDocument::parse(&json);
        assert!(document.is_ok());
    }
}
