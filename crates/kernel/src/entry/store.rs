//! Entry store: the registry of areas, filters, and query entries.
//!
//! Mutations publish typed [`StoreEvent`]s on a broadcast channel; each
//! per-layer scheduler subscribes and decides whether an event concerns it.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{AreaEntry, FilterEntry, QueryEntry, Selector};

/// Capacity of the change event channel. Slow subscribers that fall behind
/// see a lag error and treat it as "something changed".
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notification published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    EntryAdded { layer: Selector },
    EntryRemoved { layer: Selector },
    /// Area added, removed, replaced, or shown/hidden.
    AreaChanged { area_id: String },
    /// Filter added, removed, replaced, or enabled/disabled.
    FilterChanged { filter_id: String },
    /// Every entry naming the layer was removed.
    LayerRemoved { layer_id: String },
}

/// Point-in-time copy of the store content.
///
/// Areas and filters are keyed by id, so wildcard expansion walks them in a
/// stable order.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub areas: BTreeMap<String, AreaEntry>,
    pub filters: BTreeMap<String, FilterEntry>,
    pub entries: Vec<QueryEntry>,
}

impl StoreSnapshot {
    /// Whether a change event can alter the compiled query of a layer.
    pub fn concerns(&self, event: &StoreEvent, layer_id: &str) -> bool {
        let mut layer_entries = self.entries.iter().filter(|e| e.layer.matches(layer_id));
        match event {
            StoreEvent::EntryAdded { layer } | StoreEvent::EntryRemoved { layer } => {
                layer.matches(layer_id)
            }
            StoreEvent::AreaChanged { area_id } => {
                layer_entries.any(|e| e.area.as_ref().is_some_and(|a| a.matches(area_id)))
            }
            StoreEvent::FilterChanged { filter_id } => {
                layer_entries.any(|e| e.filter.as_ref().is_some_and(|f| f.matches(filter_id)))
            }
            StoreEvent::LayerRemoved { layer_id: removed } => removed == layer_id,
        }
    }
}

/// Registry of areas, filters, and query entries.
pub struct EntryStore {
    inner: RwLock<StoreSnapshot>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(StoreSnapshot::default()),
            events,
        }
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine; nothing is scheduled yet.
        let _ = self.events.send(event);
    }

    /// Copy of the current content.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().clone()
    }

    /// See [`StoreSnapshot::concerns`], without copying the store.
    pub fn event_concerns(&self, event: &StoreEvent, layer_id: &str) -> bool {
        self.inner.read().concerns(event, layer_id)
    }

    /// Add or replace an area.
    pub fn add_area(&self, area: AreaEntry) {
        let area_id = area.id().to_string();
        self.inner.write().areas.insert(area_id.clone(), area);
        self.publish(StoreEvent::AreaChanged { area_id });
    }

    /// Remove an area. Entries referencing it are left in place.
    pub fn remove_area(&self, area_id: &str) -> bool {
        let removed = self.inner.write().areas.remove(area_id).is_some();
        if removed {
            self.publish(StoreEvent::AreaChanged {
                area_id: area_id.to_string(),
            });
        }
        removed
    }

    pub fn set_area_shown(&self, area_id: &str, shown: bool) -> bool {
        let changed = match self.inner.write().areas.get_mut(area_id) {
            Some(area) if area.shown != shown => {
                area.shown = shown;
                true
            }
            _ => false,
        };
        if changed {
            self.publish(StoreEvent::AreaChanged {
                area_id: area_id.to_string(),
            });
        }
        changed
    }

    /// Add or replace a filter.
    pub fn add_filter(&self, filter: FilterEntry) {
        let filter_id = filter.id.clone();
        self.inner.write().filters.insert(filter_id.clone(), filter);
        self.publish(StoreEvent::FilterChanged { filter_id });
    }

    /// Remove a filter. Entries referencing it are left in place.
    pub fn remove_filter(&self, filter_id: &str) -> bool {
        let removed = self.inner.write().filters.remove(filter_id).is_some();
        if removed {
            self.publish(StoreEvent::FilterChanged {
                filter_id: filter_id.to_string(),
            });
        }
        removed
    }

    pub fn set_filter_enabled(&self, filter_id: &str, enabled: bool) -> bool {
        let changed = match self.inner.write().filters.get_mut(filter_id) {
            Some(filter) if filter.enabled != enabled => {
                filter.enabled = enabled;
                true
            }
            _ => false,
        };
        if changed {
            self.publish(StoreEvent::FilterChanged {
                filter_id: filter_id.to_string(),
            });
        }
        changed
    }

    /// Append an entry.
    pub fn add_entry(&self, entry: QueryEntry) {
        let layer = entry.layer.clone();
        self.inner.write().entries.push(entry);
        self.publish(StoreEvent::EntryAdded { layer });
    }

    /// Remove the first entry equal to `entry`.
    pub fn remove_entry(&self, entry: &QueryEntry) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.entries.iter().position(|e| e == entry) {
                Some(index) => {
                    inner.entries.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.publish(StoreEvent::EntryRemoved {
                layer: entry.layer.clone(),
            });
        }
        removed
    }

    /// Flip an entry between inclusion and exclusion of its area.
    pub fn toggle_include_area(&self, entry: &QueryEntry) -> bool {
        let toggled = {
            let mut inner = self.inner.write();
            match inner.entries.iter_mut().find(|e| *e == entry) {
                Some(found) => {
                    found.include_area = !found.include_area;
                    true
                }
                None => false,
            }
        };
        if toggled {
            self.publish(StoreEvent::EntryAdded {
                layer: entry.layer.clone(),
            });
        }
        toggled
    }

    /// Remove every entry naming the layer explicitly. Wildcard entries
    /// belong to all layers and are kept.
    pub fn remove_entries_for_layer(&self, layer_id: &str) -> usize {
        let removed = {
            let mut inner = self.inner.write();
            let before = inner.entries.len();
            inner.entries.retain(|e| !e.names_layer(layer_id));
            before - inner.entries.len()
        };
        debug!(layer = %layer_id, removed, "removed layer entries");
        self.publish(StoreEvent::LayerRemoved {
            layer_id: layer_id.to_string(),
        });
        removed
    }

    /// Entries that apply to a layer, in insertion order.
    pub fn entries_for_layer(&self, layer_id: &str) -> Vec<QueryEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.layer.matches(layer_id))
            .cloned()
            .collect()
    }
}
