//! OGC filter encoding compiler.
//!
//! The stored tree already follows this grammar, so compilation is a direct
//! rendering of each node as an `ogc:` element. The composite is sent as one
//! `<ogc:Filter>` document in the `FILTER` parameter.
//!
//! `<ogc:FeatureId>` elements are only valid as direct children of the
//! filter document, so an identifier selection is compiled only when it is
//! the whole composite and is never merged with another predicate.

use tracing::warn;

use super::escape::xml_escape;
use super::geometry::to_gml;
use super::temporal::{TemporalFragment, TemporalRange, encoding_predicate};
use super::{CompileOptions, Dialect, DialectCompiler, SpatialPart};
use crate::entry::{GroupOp, ResolvedQuery};
use crate::filter::{CompareOp, Comparison, FilterNode, Literal};

const FILTER_OPEN: &str = "<ogc:Filter xmlns:ogc=\"http://www.opengis.net/ogc\" xmlns:gml=\"http://www.opengis.net/gml\">";
const FILTER_CLOSE: &str = "</ogc:Filter>";

fn element(name: &str, children: &[String]) -> String {
    let mut children = children.iter().filter(|c| !c.is_empty()).peekable();
    if children.peek().is_none() {
        return String::new();
    }
    let body: String = children.map(String::as_str).collect();
    format!("<ogc:{name}>{body}</ogc:{name}>")
}

fn property(column: &str) -> String {
    format!("<ogc:PropertyName>{}</ogc:PropertyName>", xml_escape(column))
}

fn literal(literal: &Literal) -> String {
    format!("<ogc:Literal>{}</ogc:Literal>", xml_escape(&literal.as_text()))
}

/// Join sibling elements under `ogc:And`/`ogc:Or`; a lone element is
/// returned as-is.
fn join(children: Vec<String>, op: GroupOp) -> String {
    let mut children: Vec<String> = children.into_iter().filter(|c| !c.is_empty()).collect();
    match children.len() {
        0 => String::new(),
        1 => children.swap_remove(0),
        _ => element(
            match op {
                GroupOp::And => "And",
                GroupOp::Or => "Or",
            },
            &children,
        ),
    }
}

/// Inner content of a document produced by [`DialectCompiler::finish`].
fn unwrap_document(document: &str) -> &str {
    document
        .strip_prefix(FILTER_OPEN)
        .and_then(|rest| rest.strip_suffix(FILTER_CLOSE))
        .unwrap_or(document)
}

/// Compiles to `<ogc:Filter>` documents.
pub struct FilterEncodingCompiler {
    options: CompileOptions,
}

impl FilterEncodingCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    fn comparison(c: &Comparison) -> String {
        let column = property(&c.column);
        match (c.op, &c.literal) {
            (CompareOp::IsNull, _) => format!(
                "<ogc:PropertyIsNull>{column}</ogc:PropertyIsNull>"
            ),
            (CompareOp::IsNotNull, _) => format!(
                "<ogc:Not><ogc:PropertyIsNull>{column}</ogc:PropertyIsNull></ogc:Not>"
            ),
            (_, None) => String::new(),
            (CompareOp::Like | CompareOp::NotLike, Some(value)) => {
                let like = format!(
                    "<ogc:PropertyIsLike wildCard=\"{}\" singleChar=\"{}\" escapeChar=\"{}\">{column}{}</ogc:PropertyIsLike>",
                    xml_escape(&c.pattern.wild_card.to_string()),
                    xml_escape(&c.pattern.single_char.to_string()),
                    xml_escape(&c.pattern.escape_char.to_string()),
                    literal(value)
                );
                if c.op == CompareOp::NotLike {
                    format!("<ogc:Not>{like}</ogc:Not>")
                } else {
                    like
                }
            }
            (op, Some(value)) => {
                let tag = op.tag();
                format!("<ogc:{tag}>{column}{}</ogc:{tag}>", literal(value))
            }
        }
    }
}

impl DialectCompiler for FilterEncodingCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::FilterEncoding
    }

    fn options(&self) -> &CompileOptions {
        &self.options
    }

    fn write_node(&self, node: &FilterNode) -> String {
        match node {
            FilterNode::And(children) => join(
                children.iter().map(|c| self.write_node(c)).collect(),
                GroupOp::And,
            ),
            FilterNode::Or(children) => join(
                children.iter().map(|c| self.write_node(c)).collect(),
                GroupOp::Or,
            ),
            FilterNode::Not(child) => element("Not", &[self.write_node(child)]),
            FilterNode::Compare(c) => Self::comparison(c),
            FilterNode::Between(b) => format!(
                "<ogc:PropertyIsBetween>{}<ogc:LowerBoundary>{}</ogc:LowerBoundary><ogc:UpperBoundary>{}</ogc:UpperBoundary></ogc:PropertyIsBetween>",
                property(&b.column),
                literal(&b.lower),
                literal(&b.upper)
            ),
            FilterNode::FeatureId(ids) => ids
                .iter()
                .map(|id| format!("<ogc:FeatureId fid=\"{}\"/>", xml_escape(id)))
                .collect(),
            FilterNode::Invalid(_) => String::new(),
        }
    }

    fn group(&self, fragments: &[String], op: GroupOp) -> String {
        join(fragments.to_vec(), op)
    }

    fn spatial(&self, resolved: &ResolvedQuery) -> SpatialPart {
        let column = property(&self.options.geometry_column);
        let intersects =
            |gml: String| format!("<ogc:Intersects>{column}{gml}</ogc:Intersects>");

        let included: Vec<String> = resolved
            .included_areas
            .iter()
            .map(|a| intersects(to_gml(&a.geometry)))
            .collect();
        let mut predicates = vec![join(included, GroupOp::Or)];
        predicates.extend(
            resolved
                .excluded_areas
                .iter()
                .map(|a| format!("<ogc:Not>{}</ogc:Not>", intersects(to_gml(&a.geometry)))),
        );

        SpatialPart {
            predicates,
            ..SpatialPart::default()
        }
    }

    fn temporal(&self, range: &TemporalRange, whole_seconds: bool) -> TemporalFragment {
        TemporalFragment::Predicate(encoding_predicate(range, whole_seconds))
    }

    fn filter_param(&self) -> &'static str {
        "FILTER"
    }

    fn feature_ids_standalone(&self) -> bool {
        true
    }

    fn finish(&self, predicate: String) -> Option<String> {
        (!predicate.is_empty()).then(|| format!("{FILTER_OPEN}{predicate}{FILTER_CLOSE}"))
    }

    fn combine_predicates(&self, existing: &str, addition: &str) -> String {
        if [existing, addition].iter().any(|d| d.contains("<ogc:FeatureId")) {
            warn!("feature id selection cannot be combined, keeping the existing filter");
            return existing.to_string();
        }
        let merged = join(
            vec![
                unwrap_document(existing).to_string(),
                unwrap_document(addition).to_string(),
            ],
            GroupOp::And,
        );
        self.finish(merged).unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::Advisory;
    use crate::filter::FilterAst;

    fn compiler() -> FilterEncodingCompiler {
        FilterEncodingCompiler::new(CompileOptions::default())
    }

    #[test]
    fn comparisons_render_as_elements() {
        let c = compiler();
        assert_eq!(
            c.write_node(&FilterNode::equals("NAME", "a<b")),
            "<ogc:PropertyIsEqualTo><ogc:PropertyName>NAME</ogc:PropertyName><ogc:Literal>a&lt;b</ogc:Literal></ogc:PropertyIsEqualTo>"
        );
        assert_eq!(
            c.write_node(&FilterNode::is_not_null("X")),
            "<ogc:Not><ogc:PropertyIsNull><ogc:PropertyName>X</ogc:PropertyName></ogc:PropertyIsNull></ogc:Not>"
        );
        assert!(
            c.write_node(&FilterNode::like("NAME", "A*"))
                .starts_with("<ogc:PropertyIsLike wildCard=\"*\" singleChar=\".\" escapeChar=\"!\">")
        );
    }

    #[test]
    fn groups_nest_as_elements() {
        let ast = FilterAst::new(vec![
            FilterNode::is_null("A"),
            FilterNode::Invalid("bad".into()),
            FilterNode::is_null("B"),
        ]);
        let xml = compiler().compile_filter(&ast, GroupOp::Or);
        assert!(xml.starts_with("<ogc:Or><ogc:PropertyIsNull>"));
        assert!(xml.ends_with("</ogc:PropertyIsNull></ogc:Or>"));
        assert_eq!(xml.matches("PropertyIsNull>").count(), 4);
    }

    #[test]
    fn combining_merges_documents() {
        let c = compiler();
        let a = c.finish("<ogc:PropertyIsNull><ogc:PropertyName>A</ogc:PropertyName></ogc:PropertyIsNull>".to_string());
        let combined = c.combine_predicates(a.as_deref().unwrap_or_default(), "<x/>");
        assert!(combined.starts_with(FILTER_OPEN));
        assert!(combined.contains("<ogc:And><ogc:PropertyIsNull>"));
        assert!(combined.ends_with("<x/></ogc:And></ogc:Filter>"));
    }

    fn resolved(filters: Vec<(&str, FilterAst)>, with_area: bool) -> ResolvedQuery {
        use crate::entry::{Geometry, ResolvedArea, ResolvedFilter};
        ResolvedQuery {
            layer_id: "L".to_string(),
            included_areas: if with_area {
                vec![ResolvedArea {
                    area_id: "A1".to_string(),
                    geometry: Geometry::Polygon(vec![vec![
                        [0.0, 0.0],
                        [1.0, 0.0],
                        [1.0, 1.0],
                        [0.0, 0.0],
                    ]]),
                }]
            } else {
                Vec::new()
            },
            filters: filters
                .into_iter()
                .map(|(id, ast)| ResolvedFilter {
                    filter_id: id.to_string(),
                    ast,
                    group: GroupOp::And,
                })
                .collect(),
            group: Some(GroupOp::And),
            ..ResolvedQuery::default()
        }
    }

    fn ids() -> FilterAst {
        FilterNode::FeatureId(vec!["reefs.1".into(), "reefs.2".into()]).into()
    }

    #[test]
    fn lone_feature_ids_sit_directly_in_the_document() {
        let compiled = compiler().compile_query(&resolved(vec![("F1", ids())], false));
        let expected = format!(
            "{FILTER_OPEN}<ogc:FeatureId fid=\"reefs.1\"/><ogc:FeatureId fid=\"reefs.2\"/>{FILTER_CLOSE}"
        );
        assert_eq!(compiled.filter, Some(expected));
        assert!(compiled.advisories.is_empty());
    }

    #[test]
    fn feature_ids_beside_other_predicates_are_dropped() {
        let nested = FilterAst::from(FilterNode::or(vec![
            FilterNode::is_null("A"),
            FilterNode::FeatureId(vec!["reefs.1".into()]),
        ]));
        let compiled = compiler().compile_query(&resolved(
            vec![("F1", nested), ("F2", FilterNode::is_null("B").into())],
            false,
        ));
        let filter = compiled.filter.unwrap();
        assert!(!filter.contains("FeatureId"));
        assert!(filter.contains("<ogc:PropertyName>B</ogc:PropertyName>"));
        assert_eq!(
            compiled.advisories,
            vec![Advisory::UnsupportedFeatureId {
                filter_id: "F1".to_string()
            }]
        );

        let with_area = compiler().compile_query(&resolved(vec![("F1", ids())], true));
        assert!(!with_area.filter.unwrap().contains("FeatureId"));
        assert_eq!(with_area.advisories.len(), 1);
    }

    #[test]
    fn feature_id_document_is_not_merged() {
        let c = compiler();
        let selection = c
            .finish("<ogc:FeatureId fid=\"reefs.1\"/>".to_string())
            .unwrap();
        assert_eq!(c.combine_predicates(&selection, "<x/>"), selection);
    }

    #[test]
    fn empty_composite_sends_no_filter() {
        assert_eq!(compiler().compile_query(&ResolvedQuery::default()).filter, None);
    }
}
