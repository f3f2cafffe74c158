//! Outgoing request assembly: ordered parameters and the modifier pipeline.

mod modifier;
mod params;

pub use modifier::{
    FILTER_MODIFIER_ID, FilterModifier, ModifierPipeline, RequestModifier, TEMPORAL_MODIFIER_ID,
    TemporalModifier,
};
pub use params::RequestParams;
