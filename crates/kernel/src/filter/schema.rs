//! Column discovery input and filter validation against it.
//!
//! Column lists come from the data source's schema description (for WFS,
//! `DescribeFeatureType`). Time is never filtered through attribute filters;
//! date columns are handled by the temporal fragment only.

use serde::{Deserialize, Serialize};

use super::types::FilterAst;

/// Broad column type used for filterability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    Geometry,
    Other,
}

impl ColumnType {
    /// Map a schema type name (`xsd:int`, `dateTime`, `gml:MultiPolygonPropertyType`, ...).
    pub fn from_type_name(name: &str) -> Self {
        let local = name.rsplit(':').next().unwrap_or(name).to_ascii_lowercase();
        if local.ends_with("propertytype") || local == "geometry" {
            return ColumnType::Geometry;
        }
        match local.as_str() {
            "string" | "text" | "varchar" => ColumnType::String,
            "int" | "integer" | "long" | "short" | "byte" => ColumnType::Integer,
            "double" | "float" | "decimal" | "number" => ColumnType::Double,
            "boolean" | "bool" => ColumnType::Boolean,
            "date" | "datetime" | "time" | "timestamp" => ColumnType::Date,
            _ => ColumnType::Other,
        }
    }

    /// Whether attribute filters may reference a column of this type.
    pub fn is_filterable(self) -> bool {
        !matches!(self, ColumnType::Date | ColumnType::Geometry)
    }
}

/// One discovered column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

/// Why a filter was rejected for a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRejection {
    Unknown,
    DateColumn,
    GeometryColumn,
}

impl std::fmt::Display for ColumnRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnRejection::Unknown => f.write_str("column does not exist"),
            ColumnRejection::DateColumn => {
                f.write_str("date columns are only filtered through the time range")
            }
            ColumnRejection::GeometryColumn => f.write_str("geometry columns are not filterable"),
        }
    }
}

/// Discovered columns of one data source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSchema {
    columns: Vec<ColumnInfo>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    /// Case-insensitive lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Check every column a filter references.
    ///
    /// Returns the first offending column and the reason.
    pub fn check(&self, ast: &FilterAst) -> Result<(), (String, ColumnRejection)> {
        for column in ast.columns() {
            let rejection = match self.column(column) {
                None => ColumnRejection::Unknown,
                Some(info) if info.column_type.is_filterable() => continue,
                Some(info) if info.column_type == ColumnType::Date => ColumnRejection::DateColumn,
                Some(_) => ColumnRejection::GeometryColumn,
            };
            return Err((column.to_string(), rejection));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterNode;

    fn schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnInfo::new("NAME", ColumnType::String),
            ColumnInfo::new("depth", ColumnType::Double),
            ColumnInfo::new("observed", ColumnType::Date),
            ColumnInfo::new("geom", ColumnType::Geometry),
        ])
    }

    #[test]
    fn type_names_map_to_broad_types() {
        assert_eq!(ColumnType::from_type_name("xsd:string"), ColumnType::String);
        assert_eq!(ColumnType::from_type_name("xsd:int"), ColumnType::Integer);
        assert_eq!(ColumnType::from_type_name("dateTime"), ColumnType::Date);
        assert_eq!(
            ColumnType::from_type_name("gml:MultiPolygonPropertyType"),
            ColumnType::Geometry
        );
        assert_eq!(ColumnType::from_type_name("xsd:hexBinary"), ColumnType::Other);
        assert!(!ColumnType::Date.is_filterable());
        assert!(ColumnType::Other.is_filterable());
    }

    #[test]
    fn accepts_known_filterable_columns() {
        let ast = FilterAst::new(vec![FilterNode::and(vec![
            FilterNode::like("name", "a*"),
            FilterNode::equals("DEPTH", 3_i64),
        ])]);
        assert_eq!(schema().check(&ast), Ok(()));
    }

    #[test]
    fn rejects_date_and_unknown_columns() {
        let dated = FilterAst::from(FilterNode::equals("observed", "2020-01-01"));
        assert_eq!(
            schema().check(&dated),
            Err(("observed".to_string(), ColumnRejection::DateColumn))
        );

        let shape = FilterAst::from(FilterNode::is_null("GEOM"));
        assert_eq!(
            schema().check(&shape),
            Err(("GEOM".to_string(), ColumnRejection::GeometryColumn))
        );

        let unknown = FilterAst::from(FilterNode::is_null("missing"));
        assert_eq!(
            schema().check(&unknown),
            Err(("missing".to_string(), ColumnRejection::Unknown))
        );
    }
}
