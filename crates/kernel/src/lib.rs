//! Layer query composition and filter compilation engine.
//!
//! Independently authored areas and attribute filters are linked to layers
//! through query entries, resolved per layer, compiled into the layer's
//! backend dialect, and (re)issued by a debounced per-layer scheduler.
//! The `layerquery` binary is a small command-line front end over a saved
//! workspace document.

pub mod compile;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod request;
pub mod scheduler;

pub use error::{Advisory, EngineError, EngineResult, TransportError};
