//! Persisted forms of entries, filters, and whole workspaces.
//!
//! Entries persist as flat records with string booleans:
//! `{layerId, areaId, filterId, includeArea: "true", filterGroup: "false"}`.
//! Legacy records carrying `negate="true"` are disabled and skipped on load,
//! as are records with an unreadable flag or an empty layer id.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::EntryStore;
use super::types::{AreaEntry, FilterEntry, QueryEntry, Selector};
use crate::error::{EngineError, EngineResult};
use crate::filter::FilterAst;

/// Boolean stored either as `"true"`/`"false"` or as a JSON bool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn parse(&self, field: &str) -> EngineResult<bool> {
        match self {
            Flag::Bool(b) => Ok(*b),
            Flag::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Flag::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            Flag::Text(s) => Err(EngineError::InvalidEntry(format!(
                "{field} must be \"true\" or \"false\", got {s:?}"
            ))),
        }
    }

    fn text(value: bool) -> Self {
        Flag::Text(value.to_string())
    }
}

fn default_flag() -> Flag {
    Flag::text(true)
}

/// One persisted query entry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    layer_id: String,
    #[serde(default)]
    area_id: String,
    #[serde(default)]
    filter_id: String,
    #[serde(default = "default_flag")]
    include_area: Flag,
    #[serde(default = "default_flag")]
    filter_group: Flag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    negate: Option<Flag>,
}

impl PersistedEntry {
    /// Whether the record is a disabled legacy record.
    fn is_negated(&self) -> EngineResult<bool> {
        match &self.negate {
            Some(flag) => flag.parse("negate"),
            None => Ok(false),
        }
    }

    fn into_entry(self) -> EngineResult<QueryEntry> {
        let layer = Selector::parse(&self.layer_id)
            .ok_or_else(|| EngineError::InvalidEntry("layerId is empty".to_string()))?;
        Ok(QueryEntry {
            layer,
            area: Selector::parse(&self.area_id),
            filter: Selector::parse(&self.filter_id),
            include_area: self.include_area.parse("includeArea")?,
            filter_group: self.filter_group.parse("filterGroup")?,
        })
    }
}

impl From<&QueryEntry> for PersistedEntry {
    fn from(entry: &QueryEntry) -> Self {
        Self {
            layer_id: entry.layer.to_string(),
            area_id: entry
                .area
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            filter_id: entry
                .filter
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            include_area: Flag::text(entry.include_area),
            filter_group: Flag::text(entry.filter_group),
            negate: None,
        }
    }
}

/// Convert persisted records, skipping legacy disabled ones and any record
/// that cannot be read.
pub fn entries_from_records(records: Vec<PersistedEntry>) -> Vec<QueryEntry> {
    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let layer = record.layer_id.clone();
        let negated = match record.is_negated() {
            Ok(negated) => negated,
            Err(e) => {
                warn!(layer = %layer, error = %e, "skipping unreadable entry record");
                continue;
            }
        };
        if negated {
            debug!(layer = %layer, "skipping negated legacy entry");
            continue;
        }
        match record.into_entry() {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(layer = %layer, error = %e, "skipping unreadable entry record"),
        }
    }
    entries
}

/// Load entries from their persisted JSON list.
pub fn load_entries(json: &str) -> EngineResult<Vec<QueryEntry>> {
    let records: Vec<PersistedEntry> = serde_json::from_str(json)?;
    Ok(entries_from_records(records))
}

/// Serialize entries to their persisted JSON list.
pub fn save_entries(entries: &[QueryEntry]) -> EngineResult<String> {
    let records: Vec<PersistedEntry> = entries.iter().map(PersistedEntry::from).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

/// Persisted filter with its stored expression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFilter {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub entry_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    pub filter: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl StoredFilter {
    /// Parse the stored tree once.
    ///
    /// An unreadable tree keeps the filter (so entries referencing it stay
    /// valid) but leaves it without an expression.
    pub fn into_entry(self) -> FilterEntry {
        let entry = match FilterAst::from_value(self.filter) {
            Ok(ast) => FilterEntry::new(&self.id, &self.entry_type, ast),
            Err(e) => {
                warn!(filter = %self.id, error = %e, "stored filter is unreadable");
                FilterEntry::unreadable(&self.id, &self.entry_type, e.to_string())
            }
        };
        let title = if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        };
        let mut entry = entry.with_title(title);
        if !self.enabled {
            entry = entry.disabled();
        }
        entry.description = self.description;
        entry.is_default = self.is_default;
        entry
    }
}

impl From<&FilterEntry> for StoredFilter {
    fn from(entry: &FilterEntry) -> Self {
        Self {
            id: entry.id.clone(),
            title: entry.title.clone(),
            description: entry.description.clone(),
            entry_type: entry.entry_type.clone(),
            enabled: entry.enabled,
            is_default: entry.is_default,
            filter: entry
                .ast()
                .and_then(|ast| serde_json::to_value(ast).ok())
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// A complete saved workspace: areas, filters, and entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceDocument {
    #[serde(default)]
    pub areas: Vec<AreaEntry>,
    #[serde(default)]
    pub filters: Vec<StoredFilter>,
    #[serde(default)]
    pub entries: Vec<PersistedEntry>,
}

impl WorkspaceDocument {
    pub fn parse(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Capture the current content of a store.
    pub fn from_store(store: &EntryStore) -> Self {
        let snapshot = store.snapshot();
        Self {
            areas: snapshot.areas.values().cloned().collect(),
            filters: snapshot.filters.values().map(StoredFilter::from).collect(),
            entries: snapshot.entries.iter().map(PersistedEntry::from).collect(),
        }
    }

    /// Build a populated store. Unreadable entry records are skipped.
    pub fn into_store(self) -> EntryStore {
        let store = EntryStore::new();
        for area in self.areas {
            store.add_area(area);
        }
        for filter in self.filters {
            store.add_filter(filter.into_entry());
        }
        for entry in entries_from_records(self.entries) {
            store.add_entry(entry);
        }
        store
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entry::GroupOp;

    #[test]
    fn loads_string_flags_and_wildcards() {
        let json = r#"[
            {"layerId": "L", "areaId": "*", "filterId": "F1", "includeArea": "true", "filterGroup": "false"},
            {"layerId": "*", "areaId": "A1", "filterId": "", "includeArea": "false", "filterGroup": "true"}
        ]"#;
        let entries = load_entries(json).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].area, Some(Selector::Any));
        assert_eq!(entries[0].group(), GroupOp::Or);
        assert!(entries[1].layer.is_wildcard());
        assert_eq!(entries[1].filter, None);
        assert!(!entries[1].include_area);
    }

    #[test]
    fn negated_legacy_records_are_skipped() {
        let json = r#"[
            {"layerId": "L", "areaId": "A1", "filterId": "", "includeArea": "true", "filterGroup": "true", "negate": "true"},
            {"layerId": "L", "areaId": "A2", "filterId": "", "includeArea": "true", "filterGroup": "true", "negate": "false"}
        ]"#;
        let entries = load_entries(json).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].area, Some(Selector::id("A2")));
    }

    #[test]
    fn unreadable_records_are_skipped() {
        let json = r#"[
            {"layerId": "L", "areaId": "A1", "includeArea": "maybe"},
            {"layerId": "", "areaId": "A2"},
            {"layerId": "L", "areaId": "A3", "negate": "sometimes"},
            {"layerId": "L", "areaId": "A4", "includeArea": "true"}
        ]"#;
        let entries = load_entries(json).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].area, Some(Selector::id("A4")));
    }

    #[test]
    fn malformed_json_is_still_an_error() {
        assert!(matches!(load_entries("{not json"), Err(EngineError::Persistence(_))));
    }

    #[test]
    fn disabled_filter_keeps_its_title() {
        let stored = StoredFilter {
            id: "F".to_string(),
            title: "Reefs".to_string(),
            description: String::new(),
            entry_type: "wfs".to_string(),
            enabled: false,
            is_default: false,
            filter: serde_json::json!([]),
        };
        let entry = stored.into_entry();

        assert_eq!(entry.title, "Reefs");
        assert!(!entry.enabled);
    }

    #[test]
    fn save_then_load_preserves_entries() {
        let entries = vec![
            QueryEntry::new(Selector::id("L"))
                .with_area(Selector::Any)
                .with_filter(Selector::id("F"))
                .excluding(),
            QueryEntry::new(Selector::Any).with_group(GroupOp::Or),
        ];
        let json = save_entries(&entries).unwrap();
        assert!(json.contains("\"includeArea\": \"false\""));
        assert_eq!(load_entries(&json).unwrap(), entries);
    }

    #[test]
    fn unreadable_filter_is_kept_without_ast() {
        let stored = StoredFilter {
            id: "F".to_string(),
            title: String::new(),
            description: String::new(),
            entry_type: "wfs".to_string(),
            enabled: true,
            is_default: false,
            filter: serde_json::json!("not a tree"),
        };
        let entry = stored.into_entry();

        assert_eq!(entry.title, "F");
        assert!(entry.ast().is_none());
        assert!(entry.parse_error().is_some());
    }
}
