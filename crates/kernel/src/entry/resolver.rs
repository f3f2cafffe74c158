//! Combinator resolver: expands a layer's query entries into inclusion and
//! exclusion areas and grouped attribute filters.
//!
//! Resolution is a pure function of a [`StoreSnapshot`] and the layer key.
//! Dangling area or filter references are dropped silently; they are the
//! normal outcome of a deletion racing an entry update.
//!
//! The top-level operator joining the attribute filters is taken from the
//! first entry for the layer in iteration order. Later entries only decide
//! how their own filter's top-level predicates are joined.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use super::store::StoreSnapshot;
use super::types::{AreaEntry, FilterEntry, Geometry, GroupOp, QueryEntry, Selector};
use crate::error::Advisory;
use crate::filter::FilterAst;

/// Layer identity used for resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerKey {
    pub id: String,
    /// Filter kind this layer accepts for wildcard filter expansion.
    pub entry_type: String,
}

impl LayerKey {
    pub fn new(id: &str, entry_type: &str) -> Self {
        Self {
            id: id.to_string(),
            entry_type: entry_type.to_string(),
        }
    }
}

/// Area that survived resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArea {
    pub area_id: String,
    pub geometry: Geometry,
}

/// Filter that survived resolution, with its own top-level operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    pub filter_id: String,
    pub ast: FilterAst,
    pub group: GroupOp,
}

/// Resolution result for one layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedQuery {
    pub layer_id: String,
    pub included_areas: Vec<ResolvedArea>,
    pub excluded_areas: Vec<ResolvedArea>,
    pub filters: Vec<ResolvedFilter>,
    /// Operator joining the filters; from the first entry for the layer.
    pub group: Option<GroupOp>,
    pub advisories: Vec<Advisory>,
}

impl ResolvedQuery {
    /// Operator joining the layer's filters (AND when no entry exists).
    pub fn top_level_group(&self) -> GroupOp {
        self.group.unwrap_or_default()
    }

    pub fn summary(&self) -> ResolutionSummary {
        ResolutionSummary {
            layer_id: self.layer_id.clone(),
            included_areas: self.included_areas.iter().map(|a| a.area_id.clone()).collect(),
            excluded_areas: self.excluded_areas.iter().map(|a| a.area_id.clone()).collect(),
            filters: self.filters.iter().map(|f| f.filter_id.clone()).collect(),
            group: self.group,
            advisories: self.advisories.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Id-only view of a resolution, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionSummary {
    pub layer_id: String,
    pub included_areas: Vec<String>,
    pub excluded_areas: Vec<String>,
    pub filters: Vec<String>,
    pub group: Option<GroupOp>,
    pub advisories: Vec<String>,
}

/// Resolve a layer's entries against the snapshot.
pub fn resolve(snapshot: &StoreSnapshot, layer: &LayerKey) -> ResolvedQuery {
    let mut resolved = ResolvedQuery {
        layer_id: layer.id.clone(),
        ..ResolvedQuery::default()
    };
    let mut seen_included = HashSet::new();
    let mut seen_excluded = HashSet::new();
    let mut seen_filters = HashSet::new();

    for entry in snapshot.entries.iter().filter(|e| e.layer.matches(&layer.id)) {
        if resolved.group.is_none() {
            resolved.group = Some(entry.group());
        }

        for area in entry_areas(snapshot, entry) {
            let (target, seen) = if entry.include_area {
                (&mut resolved.included_areas, &mut seen_included)
            } else {
                (&mut resolved.excluded_areas, &mut seen_excluded)
            };
            if seen.insert(area.id().to_string()) {
                target.push(ResolvedArea {
                    area_id: area.id().to_string(),
                    geometry: area.geometry().clone(),
                });
            }
        }

        for filter in entry_filters(snapshot, entry, layer) {
            if !seen_filters.insert(filter.id.clone()) {
                continue;
            }
            match filter.ast() {
                Some(ast) => resolved.filters.push(ResolvedFilter {
                    filter_id: filter.id.clone(),
                    ast: ast.clone(),
                    group: entry.group(),
                }),
                None => resolved.advisories.push(Advisory::MalformedFilter {
                    filter_id: filter.id.clone(),
                    reason: filter.parse_error().unwrap_or("unreadable").to_string(),
                }),
            }
        }
    }

    resolved
}

/// Shown areas an entry selects.
fn entry_areas<'a>(snapshot: &'a StoreSnapshot, entry: &QueryEntry) -> Vec<&'a AreaEntry> {
    match &entry.area {
        None => Vec::new(),
        Some(Selector::Any) => snapshot.areas.values().filter(|a| a.shown).collect(),
        Some(Selector::Id(id)) => match snapshot.areas.get(id) {
            Some(area) if area.shown => vec![area],
            Some(_) => Vec::new(),
            None => {
                debug!(area = %id, "dropping dangling area reference");
                Vec::new()
            }
        },
    }
}

/// Enabled filters an entry selects. Wildcards only expand to filters of the
/// layer's kind; explicit ids are taken as given.
fn entry_filters<'a>(
    snapshot: &'a StoreSnapshot,
    entry: &QueryEntry,
    layer: &LayerKey,
) -> Vec<&'a FilterEntry> {
    match &entry.filter {
        None => Vec::new(),
        Some(Selector::Any) => snapshot
            .filters
            .values()
            .filter(|f| f.enabled && f.entry_type == layer.entry_type)
            .collect(),
        Some(Selector::Id(id)) => match snapshot.filters.get(id) {
            Some(filter) if filter.enabled => vec![filter],
            Some(_) => Vec::new(),
            None => {
                debug!(filter = %id, "dropping dangling filter reference");
                Vec::new()
            }
        },
    }
}
