//! Backend-agnostic filter expressions.
//!
//! This module provides:
//! - FilterNode / FilterAst: the normalized boolean expression tree
//! - Literal: comparison values and their rendering class
//! - ColumnSchema: column discovery input used to validate filters

mod schema;
mod types;

pub use schema::{ColumnInfo, ColumnRejection, ColumnSchema, ColumnType};
pub use types::{
    Between, CompareOp, Comparison, FilterAst, FilterNode, Literal, LiteralClass, PatternSyntax,
};
