//! Time-range fragment, compiled independently of the attribute filter.
//!
//! A feature matches when its validity interval overlaps the range:
//! `start <= to AND end >= from`. Layers with a single time column use it as
//! both ends.

use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};

use super::escape::xml_escape;

/// Requested time window and the columns it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalRange {
    pub start_column: String,
    pub end_column: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Output of the temporal compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemporalFragment {
    /// Predicate merged into the dialect's filter parameter.
    Predicate(String),
    /// Native request parameter.
    Parameter { name: String, value: String },
}

impl TemporalRange {
    /// Range over one column. Returns `None` for an inverted range.
    pub fn new(start_column: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Self> {
        (from <= to).then(|| Self {
            start_column: start_column.to_string(),
            end_column: None,
            from,
            to,
        })
    }

    pub fn with_end_column(mut self, end_column: &str) -> Self {
        self.end_column = Some(end_column.to_string());
        self
    }

    pub fn end_column(&self) -> &str {
        self.end_column.as_deref().unwrap_or(&self.start_column)
    }

    /// Bounds as sent; whole-second mode widens the window outward.
    pub fn bounds(&self, whole_seconds: bool) -> (DateTime<Utc>, DateTime<Utc>) {
        if !whole_seconds {
            return (self.from, self.to);
        }
        let from = self.from.trunc_subsecs(0);
        let truncated = self.to.trunc_subsecs(0);
        let to = if truncated < self.to {
            truncated + TimeDelta::seconds(1)
        } else {
            truncated
        };
        (from, to)
    }
}

fn timestamp(at: DateTime<Utc>, whole_seconds: bool) -> String {
    let format = if whole_seconds {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Millis
    };
    at.to_rfc3339_opts(format, true)
}

/// `((start <= TO) AND (end >= FROM))` with ISO-8601 UTC literals.
pub fn ecql_predicate(range: &TemporalRange, whole_seconds: bool) -> String {
    let (from, to) = range.bounds(whole_seconds);
    format!(
        "(({} <= {}) AND ({} >= {}))",
        range.start_column,
        timestamp(to, whole_seconds),
        range.end_column(),
        timestamp(from, whole_seconds)
    )
}

/// `ogc:And` of the two bound comparisons.
pub fn encoding_predicate(range: &TemporalRange, whole_seconds: bool) -> String {
    let (from, to) = range.bounds(whole_seconds);
    format!(
        "<ogc:And>\
         <ogc:PropertyIsLessThanOrEqualTo><ogc:PropertyName>{}</ogc:PropertyName><ogc:Literal>{}</ogc:Literal></ogc:PropertyIsLessThanOrEqualTo>\
         <ogc:PropertyIsGreaterThanOrEqualTo><ogc:PropertyName>{}</ogc:PropertyName><ogc:Literal>{}</ogc:Literal></ogc:PropertyIsGreaterThanOrEqualTo>\
         </ogc:And>",
        xml_escape(&range.start_column),
        timestamp(to, whole_seconds),
        xml_escape(range.end_column()),
        timestamp(from, whole_seconds)
    )
}

/// Native `time=<fromMillis>,<toMillis>` parameter. The attribute store
/// applies it to the layer's configured time fields.
pub fn arc_parameter(range: &TemporalRange, whole_seconds: bool) -> TemporalFragment {
    let (from, to) = range.bounds(whole_seconds);
    TemporalFragment::Parameter {
        name: "time".to_string(),
        value: format!("{},{}", from.timestamp_millis(), to.timestamp_millis()),
    }
}
