//! ECQL text compiler.

use tracing::trace;

use super::escape::{quote, translate_like};
use super::geometry::to_wkt;
use super::grouping::group_fragments;
use super::temporal::{TemporalFragment, TemporalRange, ecql_predicate};
use super::{CompileOptions, Dialect, DialectCompiler, SpatialPart, join_children};
use crate::entry::{GroupOp, ResolvedQuery};
use crate::filter::{CompareOp, Comparison, FilterNode, Literal, LiteralClass};

/// Compiles to the `CQL_FILTER` text grammar.
pub struct EcqlCompiler {
    options: CompileOptions,
}

impl EcqlCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    fn literal(literal: &Literal) -> String {
        match literal.classify() {
            LiteralClass::Number(n) => n,
            LiteralClass::Bool(true) => "TRUE".to_string(),
            LiteralClass::Bool(false) => "FALSE".to_string(),
            LiteralClass::Text(s) => quote(s),
        }
    }

    fn comparison(c: &Comparison) -> String {
        let column = &c.column;
        let symbol = match c.op {
            CompareOp::IsNull => return format!("({column} IS NULL)"),
            CompareOp::IsNotNull => return format!("({column} IS NOT NULL)"),
            CompareOp::Equals => "=",
            CompareOp::NotEquals => "<>",
            CompareOp::LessThan => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterOrEqual => ">=",
            CompareOp::Like => "ILIKE",
            CompareOp::NotLike => "NOT ILIKE",
        };
        let Some(literal) = &c.literal else {
            return String::new();
        };
        let value = if c.op.is_like() {
            quote(&translate_like(&literal.as_text(), &c.pattern).text)
        } else {
            Self::literal(literal)
        };
        format!("({column} {symbol} {value})")
    }
}

impl DialectCompiler for EcqlCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::Ecql
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
                let ids: Vec<String> = ids.iter().map(|id| quote(id)).collect();
                format!("(IN ({}))", ids.join(", "))
            }
            FilterNode::Invalid(reason) => {
                trace!(reason = %reason, "skipping malformed node");
                String::new()
            }
        }
    }

    fn group(&self, fragments: &[String], op: GroupOp) -> String {
        group_fragments(fragments, op)
    }

    fn spatial(&self, resolved: &ResolvedQuery) -> SpatialPart {
        let column = &self.options.geometry_column;
        let included: Vec<String> = resolved
            .included_areas
            .iter()
            .map(|a| format!("(INTERSECTS({column}, {}))", to_wkt(&a.geometry)))
            .collect();

        let mut predicates = vec![group_fragments(&included, GroupOp::Or)];
        predicates.extend(
            resolved
                .excluded_areas
                .iter()
                .map(|a| format!("(NOT INTERSECTS({column}, {}))", to_wkt(&a.geometry))),
        );

        SpatialPart {
            predicates,
            ..SpatialPart::default()
        }
    }

    fn temporal(&self, range: &TemporalRange, whole_seconds: bool) -> TemporalFragment {
        TemporalFragment::Predicate(ecql_predicate(range, whole_seconds))
    }

    fn filter_param(&self) -> &'static str {
        "CQL_FILTER"
    }
}
