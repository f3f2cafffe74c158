//! Entry model, persistence, change-notifying store, and resolution.

mod persist;
mod resolver;
mod store;
mod types;

pub use persist::{
    PersistedEntry, StoredFilter, WorkspaceDocument, entries_from_records, load_entries,
    save_entries,
};
pub use resolver::{
    LayerKey, ResolutionSummary, ResolvedArea, ResolvedFilter, ResolvedQuery, resolve,
};
pub use store::{EntryStore, StoreEvent, StoreSnapshot};
pub use types::{
    AreaEntry, FilterEntry, Geometry, GroupOp, QueryEntry, REFERENCE_SRID, Ring, Selector,
    WILDCARD,
};
