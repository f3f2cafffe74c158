//! Entry model: areas, filters, and the query entries linking them to layers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filter::FilterAst;

/// Wildcard selector value.
pub const WILDCARD: &str = "*";

/// Spatial reference all area geometry is expressed in.
pub const REFERENCE_SRID: u32 = 4326;

/// Target of a query entry field: one id or every instance of the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Any,
    Id(String),
}

impl Selector {
    /// Parse a persisted selector. Empty means "none".
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "" => None,
            WILDCARD => Some(Selector::Any),
            id => Some(Selector::Id(id.to_string())),
        }
    }

    pub fn id(id: &str) -> Self {
        Selector::Id(id.to_string())
    }

    pub fn matches(&self, id: &str) -> bool {
        match self {
            Selector::Any => true,
            Selector::Id(own) => own == id,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Selector::Any)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Selector::Any => WILDCARD,
            Selector::Id(id) => id,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean operator joining sibling predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOp {
    #[default]
    And,
    Or,
}

impl GroupOp {
    /// `filterGroup = true` means AND.
    pub fn from_filter_group(filter_group: bool) -> Self {
        if filter_group { GroupOp::And } else { GroupOp::Or }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            GroupOp::And => "AND",
            GroupOp::Or => "OR",
        }
    }
}

/// Closed or open ring of `[x, y]` positions.
pub type Ring = Vec<[f64; 2]>;

/// Area geometry in the reference frame; the first ring of a polygon is its
/// exterior, the rest are holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    /// Polygons of the geometry, each a list of rings.
    pub fn polygons(&self) -> &[Vec<Ring>] {
        match self {
            Geometry::Polygon(rings) => std::slice::from_ref(rings),
            Geometry::MultiPolygon(polygons) => polygons,
        }
    }
}

/// A drawn or imported area.
///
/// Geometry never changes once created; editing an area replaces the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaEntry {
    id: String,
    geometry: Geometry,
    #[serde(default = "default_true")]
    pub shown: bool,
}

fn default_true() -> bool {
    true
}

impl AreaEntry {
    pub fn new(id: &str, geometry: Geometry) -> Self {
        Self {
            id: id.to_string(),
            geometry,
            shown: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

/// A named attribute filter owned by one layer type.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Layer type / dialect family the filter was authored for.
    pub entry_type: String,
    pub enabled: bool,
    pub is_default: bool,
    /// Parsed once from the stored form. `None` when the stored form was
    /// unreadable.
    ast: Option<FilterAst>,
    parse_error: Option<String>,
}

impl FilterEntry {
    pub fn new(id: &str, entry_type: &str, ast: FilterAst) -> Self {
        Self {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            entry_type: entry_type.to_string(),
            enabled: true,
            is_default: false,
            ast: Some(ast),
            parse_error: None,
        }
    }

    /// Filter whose stored form could not be parsed.
    pub fn unreadable(id: &str, entry_type: &str, error: String) -> Self {
        Self {
            ast: None,
            parse_error: Some(error),
            ..Self::new(id, entry_type, FilterAst::default())
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn ast(&self) -> Option<&FilterAst> {
        self.ast.as_ref()
    }

    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }
}

/// Links a layer to an area and/or a filter.
///
/// Any of the three selectors may be the wildcard. Areas and filters are
/// referenced by id only; a reference to a deleted area or filter is simply
/// ignored during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEntry {
    pub layer: Selector,
    pub area: Option<Selector>,
    pub filter: Option<Selector>,
    /// `false` makes the area an exclusion area.
    pub include_area: bool,
    /// `true` ANDs the filter's top-level predicates, `false` ORs them.
    pub filter_group: bool,
}

impl QueryEntry {
    pub fn new(layer: Selector) -> Self {
        Self {
            layer,
            area: None,
            filter: None,
            include_area: true,
            filter_group: true,
        }
    }

    pub fn with_area(mut self, area: Selector) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_filter(mut self, filter: Selector) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn excluding(mut self) -> Self {
        self.include_area = false;
        self
    }

    pub fn with_group(mut self, group: GroupOp) -> Self {
        self.filter_group = group == GroupOp::And;
        self
    }

    pub fn group(&self) -> GroupOp {
        GroupOp::from_filter_group(self.filter_group)
    }

    /// Whether this entry names the layer explicitly (wildcards excluded).
    pub fn names_layer(&self, layer_id: &str) -> bool {
        matches!(&self.layer, Selector::Id(id) if id == layer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parsing() {
        assert_eq!(Selector::parse(""), None);
        assert_eq!(Selector::parse("*"), Some(Selector::Any));
        assert_eq!(Selector::parse(" a1 "), Some(Selector::id("a1")));
        assert!(Selector::Any.matches("anything"));
        assert!(!Selector::id("a").matches("b"));
    }

    #[test]
    fn filter_group_flag_maps_to_operator() {
        assert_eq!(GroupOp::from_filter_group(true), GroupOp::And);
        assert_eq!(GroupOp::from_filter_group(false), GroupOp::Or);
        let entry = QueryEntry::new(Selector::id("L")).with_group(GroupOp::Or);
        assert!(!entry.filter_group);
        assert_eq!(entry.group(), GroupOp::Or);
    }

    #[test]
    fn multipolygon_lists_every_polygon() {
        let ring: Ring = vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        let single = Geometry::Polygon(vec![ring.clone()]);
        let multi = Geometry::MultiPolygon(vec![vec![ring.clone()], vec![ring]]);
        assert_eq!(single.polygons().len(), 1);
        assert_eq!(multi.polygons().len(), 2);
    }

    #[test]
    fn geometry_uses_geojson_shape() {
        let json = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}"#;
        let geometry: Geometry = serde_json::from_str(json).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(geometry.polygons()[0][0].len(), 4);
    }
}
