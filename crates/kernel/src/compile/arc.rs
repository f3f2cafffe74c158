//! Attribute-store WHERE clause compiler.
//!
//! Like comparisons are case-insensitive through `UPPER(column)` with the
//! value upper-cased; a pattern without wildcards becomes a contains match.
//! Spatial inclusion travels as a separate Esri JSON `geometry` parameter;
//! exclusion areas have no native expression.

use tracing::{debug, warn};

use super::escape::{quote, translate_like};
use super::geometry::to_esri_polygon;
use super::grouping::group_fragments;
use super::temporal::{TemporalFragment, TemporalRange, arc_parameter};
use super::{CompileOptions, Dialect, DialectCompiler, SpatialPart, join_children};
use crate::entry::{GroupOp, REFERENCE_SRID, ResolvedQuery};
use crate::error::Advisory;
use crate::filter::{CompareOp, Comparison, FilterNode, Literal, LiteralClass};

/// WHERE clause that matches everything.
const MATCH_ALL: &str = "1=1";

/// Compiles to the attribute store's `where` parameter.
pub struct ArcCompiler {
    options: CompileOptions,
}

impl ArcCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    fn literal(literal: &Literal) -> String {
        match literal.classify() {
            LiteralClass::Number(n) => n,
            LiteralClass::Bool(b) => u8::from(b).to_string(),
            LiteralClass::Text(s) => quote(s),
        }
    }

    fn like(c: &Comparison, literal: &Literal) -> String {
        let pattern = translate_like(&literal.as_text(), &c.pattern);
        let value = pattern.text.to_uppercase();
        let value = if pattern.has_wildcard {
            value
        } else {
            format!("%{value}%")
        };
        let keyword = if c.op == CompareOp::NotLike {
            "not like"
        } else {
            "like"
        };
        format!("(UPPER({}) {keyword} {})", c.column, quote(&value))
    }

    fn comparison(c: &Comparison) -> String {
        let column = &c.column;
        let symbol = match c.op {
            CompareOp::IsNull => return format!("({column} is null)"),
            CompareOp::IsNotNull => return format!("({column} is not null)"),
            CompareOp::Equals => "=",
            CompareOp::NotEquals => "<>",
            CompareOp::LessThan => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterOrEqual => ">=",
            CompareOp::Like | CompareOp::NotLike => "",
        };
        match &c.literal {
            None => String::new(),
            Some(literal) if c.op.is_like() => Self::like(c, literal),
            Some(literal) => format!("({column} {symbol} {})", Self::literal(literal)),
        }
    }
}

impl DialectCompiler for ArcCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::Arc
    }

    fn options(&self) -> &CompileOptions {
        &self.options
    }

    fn write_node(&self, node: &FilterNode) -> String {
        match node {
            FilterNode::And(children) => {
                join_children(children.iter().map(|c| self.write_node(c)).collect(), "AND")
            }
            FilterNode::Or(children) => {
                join_children(children.iter().map(|c| self.write_node(c)).collect(), "OR")
            }
            FilterNode::Not(child) => {
                let inner = self.write_node(child);
                if inner.is_empty() {
                    inner
                } else {
                    format!("(NOT {inner})")
                }
            }
            FilterNode::Compare(c) => Self::comparison(c),
            FilterNode::Between(b) => format!(
                "({} BETWEEN {} AND {})",
                b.column,
                Self::literal(&b.lower),
                Self::literal(&b.upper)
            ),
            FilterNode::FeatureId(ids) if ids.is_empty() => String::new(),
            FilterNode::FeatureId(ids) => {
                let ids: Vec<String> = ids
                    .iter()
                    .map(|id| Self::literal(&Literal::from(id.as_str())))
                    .collect();
                format!("({} IN ({}))", self.options.arc_id_field, ids.join(", "))
            }
            FilterNode::Invalid(reason) => {
                debug!(reason = %reason, "dropping malformed node");
                String::new()
            }
        }
    }

    fn group(&self, fragments: &[String], op: GroupOp) -> String {
        group_fragments(fragments, op)
    }

    fn spatial(&self, resolved: &ResolvedQuery) -> SpatialPart {
        let mut part = SpatialPart::default();

        if !resolved.included_areas.is_empty() {
            let geometry = to_esri_polygon(resolved.included_areas.iter().map(|a| &a.geometry));
            part.params = vec![
                ("geometry".to_string(), geometry),
                ("geometryType".to_string(), "esriGeometryPolygon".to_string()),
                ("spatialRel".to_string(), "esriSpatialRelIntersects".to_string()),
                ("inSR".to_string(), REFERENCE_SRID.to_string()),
            ];
        }

        if !resolved.excluded_areas.is_empty() {
            warn!(
                layer = %resolved.layer_id,
                count = resolved.excluded_areas.len(),
                "exclusion areas are not supported by the attribute store"
            );
            part.advisories.push(Advisory::UnsupportedExclusion {
                layer_id: resolved.layer_id.clone(),
                count: resolved.excluded_areas.len(),
            });
        }

        part
    }

    fn temporal(&self, range: &TemporalRange, whole_seconds: bool) -> TemporalFragment {
        arc_parameter(range, whole_seconds)
    }

    fn filter_param(&self) -> &'static str {
        "where"
    }

    fn finish(&self, predicate: String) -> Option<String> {
        if predicate.is_empty() {
            Some(MATCH_ALL.to_string())
        } else {
            Some(predicate)
        }
    }

    fn combine_predicates(&self, existing: &str, addition: &str) -> String {
        let existing = if existing == MATCH_ALL { "" } else { existing };
        let merged = group_fragments(&[existing, addition], GroupOp::And);
        self.finish(merged).unwrap_or_default()
    }
}
