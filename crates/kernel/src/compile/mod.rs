//! Dialect compilers.
//!
//! Each backend grammar implements [`DialectCompiler`]; the scheduler picks
//! one per data source from its declared [`Dialect`]. Compilation is a pure
//! function of the resolved query and the compiler's options. Problems with
//! individual filters degrade to [`Advisory`] values and the filter
//! contributes nothing.

mod arc;
mod ecql;
mod encoding;
pub mod escape;
pub mod geometry;
pub mod grouping;
pub mod temporal;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entry::{GroupOp, ResolvedQuery};
use crate::error::Advisory;
use crate::filter::{ColumnSchema, FilterAst, FilterNode};

pub use arc::ArcCompiler;
pub use ecql::EcqlCompiler;
pub use encoding::FilterEncodingCompiler;
pub use temporal::{TemporalFragment, TemporalRange};

/// Native query grammar of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// OGC filter encoding XML.
    FilterEncoding,
    /// ECQL text.
    Ecql,
    /// Attribute-store WHERE clause.
    Arc,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::FilterEncoding => "filter-encoding",
            Dialect::Ecql => "ecql",
            Dialect::Arc => "arc",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filter-encoding" | "fes" | "ogc" => Ok(Dialect::FilterEncoding),
            "ecql" | "cql" => Ok(Dialect::Ecql),
            "arc" | "esri" => Ok(Dialect::Arc),
            other => Err(format!(
                "unknown dialect '{other}' (expected ecql, arc or filter-encoding)"
            )),
        }
    }
}

/// Per-source compiler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Geometry column used by spatial predicates.
    pub geometry_column: String,
    /// Object id field used for identifier reachback in the attribute store.
    pub arc_id_field: String,
    /// Discovered columns; when present, filters are validated against it.
    pub schema: Option<ColumnSchema>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            geometry_column: "geom".to_string(),
            arc_id_field: "OBJECTID".to_string(),
            schema: None,
        }
    }
}

/// Spatial contribution of a dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpatialPart {
    /// Predicates ANDed with the attribute filter.
    pub predicates: Vec<String>,
    /// Extra request parameters.
    pub params: Vec<(String, String)>,
    pub advisories: Vec<Advisory>,
}

/// Compiled composite for one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub layer_id: String,
    pub dialect: Dialect,
    /// Request parameter carrying the filter.
    pub filter_param: &'static str,
    /// Final filter value; `None` when nothing constrains the request.
    pub filter: Option<String>,
    /// Extra parameters (spatial geometry for the attribute store).
    pub params: Vec<(String, String)>,
    pub advisories: Vec<Advisory>,
}

/// Join compiled children under a text keyword, dropping empty ones and
/// wrapping only when more than one remains.
pub(crate) fn join_children(children: Vec<String>, keyword: &str) -> String {
    let mut children: Vec<String> = children.into_iter().filter(|c| !c.is_empty()).collect();
    match children.len() {
        0 => String::new(),
        1 => children.swap_remove(0),
        _ => format!("({})", children.join(&format!(" {keyword} "))),
    }
}

/// Whether an identifier filter is the whole composite: the only filter,
/// one top-level identifier node, and no areas.
fn is_standalone_selection(resolved: &ResolvedQuery, ast: &FilterAst) -> bool {
    resolved.filters.len() == 1
        && ast.is_feature_id_selection()
        && resolved.included_areas.is_empty()
        && resolved.excluded_areas.is_empty()
}

/// One implementation per backend grammar.
pub trait DialectCompiler: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn options(&self) -> &CompileOptions;

    /// Compile one node. Malformed nodes compile to an empty string.
    fn write_node(&self, node: &FilterNode) -> String;

    /// Merge independently compiled fragments under one operator.
    fn group(&self, fragments: &[String], op: GroupOp) -> String;

    /// Spatial predicates and parameters for the resolved areas.
    fn spatial(&self, resolved: &ResolvedQuery) -> SpatialPart;

    /// Time-range fragment for this grammar.
    fn temporal(&self, range: &TemporalRange, whole_seconds: bool) -> TemporalFragment;

    /// Request parameter carrying the filter.
    fn filter_param(&self) -> &'static str;

    /// Whether identifier selections must stand alone in the composite.
    fn feature_ids_standalone(&self) -> bool {
        false
    }

    /// Parameter value for a composite predicate.
    fn finish(&self, predicate: String) -> Option<String> {
        (!predicate.is_empty()).then_some(predicate)
    }

    /// Add a predicate to an already finished parameter value.
    ///
    /// Both sides go through [`grouping::group_fragments`], so a bare
    /// `A OR B` already in the parameter is wrapped before the AND.
    fn combine_predicates(&self, existing: &str, addition: &str) -> String {
        grouping::group_fragments(&[existing, addition], GroupOp::And)
    }

    /// Compile a stored filter's top-level nodes under one operator, with
    /// literal parentheses still shielded.
    fn compile_fragment(&self, ast: &FilterAst, op: GroupOp) -> String {
        let fragments: Vec<String> = ast.nodes().iter().map(|n| self.write_node(n)).collect();
        self.group(&fragments, op)
    }

    /// Compile a stored filter to its final text.
    fn compile_filter(&self, ast: &FilterAst, op: GroupOp) -> String {
        escape::restore_parens(&self.compile_fragment(ast, op))
    }

    /// Compile a layer's resolved query into request parameter values.
    fn compile_query(&self, resolved: &ResolvedQuery) -> CompiledQuery {
        let mut advisories = resolved.advisories.clone();
        let mut fragments = Vec::with_capacity(resolved.filters.len());

        for filter in &resolved.filters {
            if let Some(schema) = &self.options().schema
                && let Err((column, reason)) = schema.check(&filter.ast)
            {
                warn!(
                    layer = %resolved.layer_id,
                    filter = %filter.filter_id,
                    column = %column,
                    reason = %reason,
                    "filter rejected for layer"
                );
                advisories.push(Advisory::RejectedColumn {
                    filter_id: filter.filter_id.clone(),
                    column,
                    reason,
                });
                continue;
            }

            if self.feature_ids_standalone()
                && filter.ast.contains_feature_id()
                && !is_standalone_selection(resolved, &filter.ast)
            {
                warn!(
                    layer = %resolved.layer_id,
                    filter = %filter.filter_id,
                    "feature ids cannot be combined with other predicates"
                );
                advisories.push(Advisory::UnsupportedFeatureId {
                    filter_id: filter.filter_id.clone(),
                });
                continue;
            }

            if let Some(reason) = filter.ast.nodes().iter().find_map(FilterNode::first_invalid) {
                warn!(
                    layer = %resolved.layer_id,
                    filter = %filter.filter_id,
                    reason = %reason,
                    "filter contains malformed nodes"
                );
                advisories.push(Advisory::MalformedFilter {
                    filter_id: filter.filter_id.clone(),
                    reason: reason.to_string(),
                });
            }

            let fragment = self.compile_fragment(&filter.ast, filter.group);
            if fragment.is_empty() {
                advisories.push(Advisory::EmptyFilter {
                    filter_id: filter.filter_id.clone(),
                });
                continue;
            }
            fragments.push(fragment);
        }

        let attribute = self.group(&fragments, resolved.top_level_group());
        let spatial = self.spatial(resolved);
        advisories.extend(spatial.advisories);

        let mut parts = spatial.predicates;
        parts.push(attribute);
        let predicate = escape::restore_parens(&self.group(&parts, GroupOp::And));

        CompiledQuery {
            layer_id: resolved.layer_id.clone(),
            dialect: self.dialect(),
            filter_param: self.filter_param(),
            filter: self.finish(predicate),
            params: spatial.params,
            advisories,
        }
    }
}

/// Compiler for a dialect.
pub fn compiler_for(dialect: Dialect, options: CompileOptions) -> Arc<dyn DialectCompiler> {
    match dialect {
        Dialect::FilterEncoding => Arc::new(FilterEncodingCompiler::new(options)),
        Dialect::Ecql => Arc::new(EcqlCompiler::new(options)),
        Dialect::Arc => Arc::new(ArcCompiler::new(options)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_names() {
        for dialect in [Dialect::FilterEncoding, Dialect::Ecql, Dialect::Arc] {
            assert_eq!(dialect.as_str().parse::<Dialect>(), Ok(dialect));
        }
        assert!("sql".parse::<Dialect>().is_err());
    }

    #[test]
    fn children_wrap_only_when_plural() {
        assert_eq!(join_children(vec![], "AND"), "");
        assert_eq!(join_children(vec!["(a)".into(), String::new()], "AND"), "(a)");
        assert_eq!(join_children(vec!["(a)".into(), "(b)".into()], "OR"), "((a) OR (b))");
    }
}
