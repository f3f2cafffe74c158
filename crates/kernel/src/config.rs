//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::compile::CompileOptions;
use crate::scheduler::SchedulerConfig;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Debounce window in milliseconds (default: 250).
    pub debounce_ms: u64,

    /// Send time bounds with whole-second precision (default: false).
    pub round_time_to_seconds: bool,

    /// Geometry column used by spatial predicates (default: geom).
    pub geometry_column: String,

    /// Object id field for attribute-store reachback (default: OBJECTID).
    pub arc_id_field: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let debounce_ms = lookup("LAYERQUERY_DEBOUNCE_MS")
            .unwrap_or_else(|| "250".to_string())
            .parse()
            .context("LAYERQUERY_DEBOUNCE_MS must be a valid u64")?;

        let round_time_to_seconds = lookup("LAYERQUERY_ROUND_TIME_TO_SECONDS")
            .unwrap_or_else(|| "false".to_string())
            .parse()
            .context("LAYERQUERY_ROUND_TIME_TO_SECONDS must be true or false")?;

        let geometry_column =
            lookup("LAYERQUERY_GEOMETRY_COLUMN").unwrap_or_else(|| "geom".to_string());

        let arc_id_field =
            lookup("LAYERQUERY_ARC_ID_FIELD").unwrap_or_else(|| "OBJECTID".to_string());

        Ok(Self {
            debounce_ms,
            round_time_to_seconds,
            geometry_column,
            arc_id_field,
        })
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            round_time_to_seconds: self.round_time_to_seconds,
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            geometry_column: self.geometry_column.clone(),
            arc_id_field: self.arc_id_field.clone(),
            schema: None,
        }
    }
}
