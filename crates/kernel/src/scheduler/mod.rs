//! Reactive query scheduling: one debounced handler per data source.

mod handler;
mod manager;
mod transport;

pub use handler::{
    DEFAULT_DEBOUNCE, DataSource, HandlerStatus, QueryHandler, SchedulerConfig, SchedulerState,
};
pub use manager::QueryManager;
pub use transport::{IssuedRequest, ResultSink, Transport};
