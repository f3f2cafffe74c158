//! Engine error and advisory types.

use thiserror::Error;

use crate::filter::ColumnRejection;

/// Engine errors.
///
/// Data-shape problems (bad filters, dangling references) are not errors;
/// they degrade to [`Advisory`] values. These variants cover persistence
/// input and programming invariants.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("persistence error: {0}")]
    Persistence(#[from] serde_json::Error),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("scheduler for {0} is no longer running")]
    SchedulerClosed(String),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request aborted")]
    Aborted,

    #[error("request failed: {0}")]
    Failed(String),
}

/// Non-fatal problem found while resolving or compiling a layer's query.
///
/// Surfaced to users as an alert; never blocks the rest of the composite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Advisory {
    #[error("filter {filter_id} is malformed: {reason}")]
    MalformedFilter { filter_id: String, reason: String },

    #[error("filter {filter_id} references column {column}: {reason}")]
    RejectedColumn {
        filter_id: String,
        column: String,
        reason: ColumnRejection,
    },

    #[error("filter {filter_id} contributed no predicate")]
    EmptyFilter { filter_id: String },

    #[error("filter {filter_id} selects feature ids alongside other predicates")]
    UnsupportedFeatureId { filter_id: String },

    #[error("{count} exclusion area(s) cannot be expressed for layer {layer_id}")]
    UnsupportedExclusion { layer_id: String, count: usize },
}
