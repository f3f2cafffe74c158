//! Filter expression tree.
//!
//! Stored filters are a JSON rendition of an OGC Filter Encoding tree: every
//! node is an object tagged by `type` (`And`, `Or`, `Not`,
//! `PropertyIsEqualTo`, `PropertyIsLike`, ...) with `PropertyName`/`Literal`
//! children. The in-memory [`FilterNode`] is the normalized form every
//! dialect compiler walks. Nodes that are not well formed (unknown tag,
//! missing column or literal) become [`FilterNode::Invalid`] so a single bad
//! node never poisons the rest of the tree.

use serde::{Deserialize, Serialize};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

impl CompareOp {
    /// Whether the operator compares against a literal value.
    pub fn takes_literal(self) -> bool {
        !matches!(self, CompareOp::IsNull | CompareOp::IsNotNull)
    }

    /// Whether the literal is a wildcard pattern.
    pub fn is_like(self) -> bool {
        matches!(self, CompareOp::Like | CompareOp::NotLike)
    }

    /// Element name in the stored tree.
    pub fn tag(self) -> &'static str {
        match self {
            CompareOp::Equals => "PropertyIsEqualTo",
            CompareOp::NotEquals => "PropertyIsNotEqualTo",
            CompareOp::LessThan => "PropertyIsLessThan",
            CompareOp::LessOrEqual => "PropertyIsLessThanOrEqualTo",
            CompareOp::GreaterThan => "PropertyIsGreaterThan",
            CompareOp::GreaterOrEqual => "PropertyIsGreaterThanOrEqualTo",
            CompareOp::Like => "PropertyIsLike",
            CompareOp::NotLike => "PropertyIsNotLike",
            CompareOp::IsNull => "PropertyIsNull",
            CompareOp::IsNotNull => "PropertyIsNotNull",
        }
    }
}

/// Literal value of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// How a literal renders in text dialects.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralClass<'a> {
    /// Renders unquoted.
    Number(String),
    /// Renders as a boolean keyword.
    Bool(bool),
    /// Renders as a quoted string.
    Text(&'a str),
}

impl Literal {
    /// Classify for rendering.
    ///
    /// Text that parses as a finite float is treated as a number and keeps
    /// its original spelling; `true`/`false` text is treated as a boolean.
    pub fn classify(&self) -> LiteralClass<'_> {
        match self {
            Literal::Bool(b) => LiteralClass::Bool(*b),
            Literal::Number(n) => LiteralClass::Number(format_number(*n)),
            Literal::Text(s) => {
                if s.parse::<f64>().is_ok_and(f64::is_finite) {
                    LiteralClass::Number(s.clone())
                } else if s.eq_ignore_ascii_case("true") {
                    LiteralClass::Bool(true)
                } else if s.eq_ignore_ascii_case("false") {
                    LiteralClass::Bool(false)
                } else {
                    LiteralClass::Text(s)
                }
            }
        }
    }

    /// Raw text of the literal, without quoting.
    pub fn as_text(&self) -> String {
        match self {
            Literal::Bool(b) => b.to_string(),
            Literal::Number(n) => format_number(*n),
            Literal::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Number(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Number(value as f64)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

/// Integral floats render without a fractional part.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Wildcard characters of a like pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSyntax {
    /// Matches any run of characters.
    pub wild_card: char,
    /// Matches exactly one character.
    pub single_char: char,
    /// Makes the following character literal.
    pub escape_char: char,
}

impl Default for PatternSyntax {
    fn default() -> Self {
        Self {
            wild_card: '*',
            single_char: '.',
            escape_char: '!',
        }
    }
}

/// A column compared against an optional literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: CompareOp,
    pub column: String,
    /// Always `Some` for operators that take a literal.
    pub literal: Option<Literal>,
    /// Only meaningful for like operators.
    pub pattern: PatternSyntax,
}

/// Inclusive range check.
#[derive(Debug, Clone, PartialEq)]
pub struct Between {
    pub column: String,
    pub lower: Literal,
    pub upper: Literal,
}

/// Normalized filter node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredNode", into = "StoredNode")]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Compare(Comparison),
    Between(Between),
    /// Identifier reachback: matches the listed feature ids.
    FeatureId(Vec<String>),
    /// Node that could not be understood; contributes nothing.
    Invalid(String),
}

impl FilterNode {
    pub fn and(children: Vec<FilterNode>) -> Self {
        FilterNode::And(children)
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        FilterNode::Or(children)
    }

    pub fn not(child: FilterNode) -> Self {
        FilterNode::Not(Box::new(child))
    }

    /// Comparison against a literal. Null checks ignore the literal.
    pub fn compare(op: CompareOp, column: &str, literal: impl Into<Literal>) -> Self {
        FilterNode::Compare(Comparison {
            op,
            column: column.to_string(),
            literal: op.takes_literal().then(|| literal.into()),
            pattern: PatternSyntax::default(),
        })
    }

    pub fn equals(column: &str, literal: impl Into<Literal>) -> Self {
        Self::compare(CompareOp::Equals, column, literal)
    }

    /// Like with the default pattern syntax (`*`, `.`, `!`).
    pub fn like(column: &str, pattern: &str) -> Self {
        Self::compare(CompareOp::Like, column, pattern)
    }

    pub fn is_null(column: &str) -> Self {
        FilterNode::Compare(Comparison {
            op: CompareOp::IsNull,
            column: column.to_string(),
            literal: None,
            pattern: PatternSyntax::default(),
        })
    }

    pub fn is_not_null(column: &str) -> Self {
        FilterNode::Compare(Comparison {
            op: CompareOp::IsNotNull,
            column: column.to_string(),
            literal: None,
            pattern: PatternSyntax::default(),
        })
    }

    pub fn between(column: &str, lower: impl Into<Literal>, upper: impl Into<Literal>) -> Self {
        FilterNode::Between(Between {
            column: column.to_string(),
            lower: lower.into(),
            upper: upper.into(),
        })
    }

    /// Collect every column name referenced below this node.
    pub fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterNode::And(children) | FilterNode::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            FilterNode::Not(child) => child.collect_columns(out),
            FilterNode::Compare(c) => out.push(&c.column),
            FilterNode::Between(b) => out.push(&b.column),
            FilterNode::FeatureId(_) | FilterNode::Invalid(_) => {}
        }
    }

    /// Whether an identifier node appears anywhere in this tree.
    pub fn contains_feature_id(&self) -> bool {
        match self {
            FilterNode::FeatureId(_) => true,
            FilterNode::And(children) | FilterNode::Or(children) => {
                children.iter().any(FilterNode::contains_feature_id)
            }
            FilterNode::Not(child) => child.contains_feature_id(),
            _ => false,
        }
    }

    /// First reason this tree is malformed, if any.
    pub fn first_invalid(&self) -> Option<&str> {
        match self {
            FilterNode::Invalid(reason) => Some(reason),
            FilterNode::And(children) | FilterNode::Or(children) => {
                children.iter().find_map(FilterNode::first_invalid)
            }
            FilterNode::Not(child) => child.first_invalid(),
            _ => None,
        }
    }
}

/// A stored filter: the top-level nodes of the filter element.
///
/// The owning query entry decides whether top-level nodes are ANDed or ORed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterAst {
    nodes: Vec<FilterNode>,
}

impl FilterAst {
    pub fn new(nodes: Vec<FilterNode>) -> Self {
        Self { nodes }
    }

    /// Parse the stored JSON form. A single node object is accepted as a
    /// one-element list.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_object() {
            let node: FilterNode = serde_json::from_value(value)?;
            return Ok(Self::new(vec![node]));
        }
        serde_json::from_value(value)
    }

    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_feature_id(&self) -> bool {
        self.nodes.iter().any(FilterNode::contains_feature_id)
    }

    /// Whether the filter is exactly one top-level identifier node.
    pub fn is_feature_id_selection(&self) -> bool {
        matches!(self.nodes.as_slice(), [FilterNode::FeatureId(_)])
    }

    /// Every column referenced by the filter, in tree order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.collect_columns(&mut out);
        }
        out
    }
}

impl From<FilterNode> for FilterAst {
    fn from(node: FilterNode) -> Self {
        Self::new(vec![node])
    }
}

// ---------------------------------------------------------------------------
// Stored (wire) form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredComparison {
    #[serde(rename = "PropertyName", default, skip_serializing_if = "Option::is_none")]
    property_name: Option<String>,
    #[serde(rename = "Literal", default, skip_serializing_if = "Option::is_none")]
    literal: Option<Literal>,
    #[serde(rename = "wildCard", default, skip_serializing_if = "Option::is_none")]
    wild_card: Option<char>,
    #[serde(rename = "singleChar", default, skip_serializing_if = "Option::is_none")]
    single_char: Option<char>,
    #[serde(rename = "escapeChar", default, skip_serializing_if = "Option::is_none")]
    escape_char: Option<char>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredBetween {
    #[serde(rename = "PropertyName", default)]
    property_name: Option<String>,
    #[serde(rename = "LowerBoundary", default)]
    lower: Option<Literal>,
    #[serde(rename = "UpperBoundary", default)]
    upper: Option<Literal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum StoredNode {
    And {
        #[serde(default)]
        children: Vec<FilterNode>,
    },
    Or {
        #[serde(default)]
        children: Vec<FilterNode>,
    },
    Not {
        #[serde(default)]
        child: Option<Box<FilterNode>>,
    },
    PropertyIsEqualTo(StoredComparison),
    PropertyIsNotEqualTo(StoredComparison),
    PropertyIsLessThan(StoredComparison),
    PropertyIsLessThanOrEqualTo(StoredComparison),
    PropertyIsGreaterThan(StoredComparison),
    PropertyIsGreaterThanOrEqualTo(StoredComparison),
    PropertyIsLike(StoredComparison),
    PropertyIsNotLike(StoredComparison),
    PropertyIsNull(StoredComparison),
    PropertyIsNotNull(StoredComparison),
    PropertyIsBetween(StoredBetween),
    FeatureId {
        #[serde(default)]
        fids: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

fn normalize_comparison(op: CompareOp, stored: StoredComparison) -> FilterNode {
    let Some(column) = stored.property_name.filter(|name| !name.trim().is_empty()) else {
        return FilterNode::Invalid(format!("{} without PropertyName", op.tag()));
    };
    if op.takes_literal() && stored.literal.is_none() {
        return FilterNode::Invalid(format!("{} on {column} without Literal", op.tag()));
    }
    let defaults = PatternSyntax::default();
    FilterNode::Compare(Comparison {
        op,
        column,
        literal: if op.takes_literal() {
            stored.literal
        } else {
            None
        },
        pattern: PatternSyntax {
            wild_card: stored.wild_card.unwrap_or(defaults.wild_card),
            single_char: stored.single_char.unwrap_or(defaults.single_char),
            escape_char: stored.escape_char.unwrap_or(defaults.escape_char),
        },
    })
}

impl From<StoredNode> for FilterNode {
    fn from(stored: StoredNode) -> Self {
        match stored {
            StoredNode::And { children } => FilterNode::And(children),
            StoredNode::Or { children } => FilterNode::Or(children),
            StoredNode::Not { child } => match child {
                Some(child) => FilterNode::Not(child),
                None => FilterNode::Invalid("Not without child".to_string()),
            },
            StoredNode::PropertyIsEqualTo(c) => normalize_comparison(CompareOp::Equals, c),
            StoredNode::PropertyIsNotEqualTo(c) => normalize_comparison(CompareOp::NotEquals, c),
            StoredNode::PropertyIsLessThan(c) => normalize_comparison(CompareOp::LessThan, c),
            StoredNode::PropertyIsLessThanOrEqualTo(c) => {
                normalize_comparison(CompareOp::LessOrEqual, c)
            }
            StoredNode::PropertyIsGreaterThan(c) => {
                normalize_comparison(CompareOp::GreaterThan, c)
            }
            StoredNode::PropertyIsGreaterThanOrEqualTo(c) => {
                normalize_comparison(CompareOp::GreaterOrEqual, c)
            }
            StoredNode::PropertyIsLike(c) => normalize_comparison(CompareOp::Like, c),
            StoredNode::PropertyIsNotLike(c) => normalize_comparison(CompareOp::NotLike, c),
            StoredNode::PropertyIsNull(c) => normalize_comparison(CompareOp::IsNull, c),
            StoredNode::PropertyIsNotNull(c) => normalize_comparison(CompareOp::IsNotNull, c),
            StoredNode::PropertyIsBetween(b) => match (b.property_name, b.lower, b.upper) {
                (Some(column), Some(lower), Some(upper)) if !column.trim().is_empty() => {
                    FilterNode::Between(Between {
                        column,
                        lower,
                        upper,
                    })
                }
                _ => FilterNode::Invalid("PropertyIsBetween is incomplete".to_string()),
            },
            StoredNode::FeatureId { fids } => FilterNode::FeatureId(fids),
            StoredNode::Unknown => FilterNode::Invalid("unknown filter element".to_string()),
        }
    }
}

impl From<FilterNode> for StoredNode {
    fn from(node: FilterNode) -> Self {
        match node {
            FilterNode::And(children) => StoredNode::And { children },
            FilterNode::Or(children) => StoredNode::Or { children },
            FilterNode::Not(child) => StoredNode::Not { child: Some(child) },
            FilterNode::Compare(c) => {
                let like = c.op.is_like();
                let stored = StoredComparison {
                    property_name: Some(c.column),
                    literal: c.literal,
                    wild_card: like.then_some(c.pattern.wild_card),
                    single_char: like.then_some(c.pattern.single_char),
                    escape_char: like.then_some(c.pattern.escape_char),
                };
                match c.op {
                    CompareOp::Equals => StoredNode::PropertyIsEqualTo(stored),
                    CompareOp::NotEquals => StoredNode::PropertyIsNotEqualTo(stored),
                    CompareOp::LessThan => StoredNode::PropertyIsLessThan(stored),
                    CompareOp::LessOrEqual => StoredNode::PropertyIsLessThanOrEqualTo(stored),
                    CompareOp::GreaterThan => StoredNode::PropertyIsGreaterThan(stored),
                    CompareOp::GreaterOrEqual => {
                        StoredNode::PropertyIsGreaterThanOrEqualTo(stored)
                    }
                    CompareOp::Like => StoredNode::PropertyIsLike(stored),
                    CompareOp::NotLike => StoredNode::PropertyIsNotLike(stored),
                    CompareOp::IsNull => StoredNode::PropertyIsNull(stored),
                    CompareOp::IsNotNull => StoredNode::PropertyIsNotNull(stored),
                }
            }
            FilterNode::Between(b) => StoredNode::PropertyIsBetween(StoredBetween {
                property_name: Some(b.column),
                lower: Some(b.lower),
                upper: Some(b.upper),
            }),
            FilterNode::FeatureId(fids) => StoredNode::FeatureId { fids },
            FilterNode::Invalid(_) => StoredNode::Unknown,
        }
    }
}
