//! Request modifier pipeline.
//!
//! The compiled layer filter and the temporal fragment are each one named
//! modifier. Modifiers run in registration order; re-registering an id keeps
//! its original position.

use std::sync::Arc;

use super::params::RequestParams;
use crate::compile::{CompiledQuery, DialectCompiler, TemporalFragment, TemporalRange};

/// Id of the compiled layer filter modifier.
pub const FILTER_MODIFIER_ID: &str = "layer-filter";

/// Id of the temporal modifier.
pub const TEMPORAL_MODIFIER_ID: &str = "temporal";

/// Named transformation of outgoing request parameters.
pub trait RequestModifier: Send + Sync {
    fn id(&self) -> &str;

    fn apply(&self, params: RequestParams) -> RequestParams;
}

/// Ordered set of modifiers, unique by id.
#[derive(Clone, Default)]
pub struct ModifierPipeline {
    modifiers: Vec<Arc<dyn RequestModifier>>,
}

impl ModifierPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a modifier. An existing modifier with the same id is
    /// replaced in place.
    pub fn register(&mut self, modifier: Arc<dyn RequestModifier>) {
        match self.modifiers.iter().position(|m| m.id() == modifier.id()) {
            Some(index) => self.modifiers[index] = modifier,
            None => self.modifiers.push(modifier),
        }
    }

    pub fn deregister(&mut self, id: &str) -> bool {
        let before = self.modifiers.len();
        self.modifiers.retain(|m| m.id() != id);
        self.modifiers.len() != before
    }

    pub fn ids(&self) -> Vec<&str> {
        self.modifiers.iter().map(|m| m.id()).collect()
    }

    /// Apply every modifier to a copy of the base parameters.
    pub fn apply(&self, base: &RequestParams) -> RequestParams {
        self.modifiers
            .iter()
            .fold(base.clone(), |params, modifier| modifier.apply(params))
    }

    /// Install the modifiers for a freshly compiled query, removing the
    /// temporal modifier when no range is set.
    pub fn install_query(
        &mut self,
        compiler: &Arc<dyn DialectCompiler>,
        compiled: CompiledQuery,
        temporal: Option<&TemporalRange>,
        whole_seconds: bool,
    ) {
        self.register(Arc::new(FilterModifier::new(compiler.clone(), compiled)));
        match temporal {
            Some(range) => self.register(Arc::new(TemporalModifier::new(
                compiler.clone(),
                compiler.temporal(range, whole_seconds),
            ))),
            None => {
                self.deregister(TEMPORAL_MODIFIER_ID);
            }
        }
    }
}

/// Merge a predicate into the filter parameter, combining with whatever an
/// earlier modifier or the base parameters put there.
fn merge_filter(
    compiler: &dyn DialectCompiler,
    params: &mut RequestParams,
    finished: String,
    raw: &str,
) {
    let param = compiler.filter_param();
    let value = match params.get(param) {
        Some(existing) if !existing.is_empty() => compiler.combine_predicates(existing, raw),
        _ => finished,
    };
    params.set(param, value);
}

/// Applies a compiled layer query.
pub struct FilterModifier {
    compiler: Arc<dyn DialectCompiler>,
    compiled: CompiledQuery,
}

impl FilterModifier {
    pub fn new(compiler: Arc<dyn DialectCompiler>, compiled: CompiledQuery) -> Self {
        Self { compiler, compiled }
    }
}

impl RequestModifier for FilterModifier {
    fn id(&self) -> &str {
        FILTER_MODIFIER_ID
    }

    fn apply(&self, mut params: RequestParams) -> RequestParams {
        for (key, value) in &self.compiled.params {
            params.set(key, value.as_str());
        }
        if let Some(filter) = &self.compiled.filter {
            merge_filter(self.compiler.as_ref(), &mut params, filter.clone(), filter);
        }
        params
    }
}

/// Applies a temporal fragment.
pub struct TemporalModifier {
    compiler: Arc<dyn DialectCompiler>,
    fragment: TemporalFragment,
}

impl TemporalModifier {
    pub fn new(compiler: Arc<dyn DialectCompiler>, fragment: TemporalFragment) -> Self {
        Self { compiler, fragment }
    }
}

impl RequestModifier for TemporalModifier {
    fn id(&self) -> &str {
        TEMPORAL_MODIFIER_ID
    }

    fn apply(&self, mut params: RequestParams) -> RequestParams {
        match &self.fragment {
            TemporalFragment::Predicate(predicate) => {
                let finished = self
                    .compiler
                    .finish(predicate.clone())
                    .unwrap_or_default();
                merge_filter(self.compiler.as_ref(), &mut params, finished, predicate);
            }
            TemporalFragment::Parameter { name, value } => params.set(name, value.as_str()),
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompileOptions, Dialect, compiler_for};
    use chrono::{TimeZone, Utc};

    struct Tag(&'static str, &'static str);

    impl RequestModifier for Tag {
        fn id(&self) -> &str {
            self.0
        }

        fn apply(&self, params: RequestParams) -> RequestParams {
            params.with(self.0, self.1)
        }
    }

    fn compiled(dialect: Dialect, filter: Option<&str>) -> CompiledQuery {
        CompiledQuery {
            layer_id: "L".to_string(),
            dialect,
            filter_param: compiler_for(dialect, CompileOptions::default()).filter_param(),
            filter: filter.map(str::to_string),
            params: Vec::new(),
            advisories: Vec::new(),
        }
    }

    fn range() -> TemporalRange {
        let from = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
        let to = Utc.timestamp_opt(60, 0).single().unwrap_or_default();
        TemporalRange::new("t", from, to).unwrap_or_else(|| panic!())
    }

    #[test]
    fn reregistering_keeps_position() {
        let mut pipeline = ModifierPipeline::new();
        pipeline.register(Arc::new(Tag("a", "1")));
        pipeline.register(Arc::new(Tag("b", "2")));
        pipeline.register(Arc::new(Tag("a", "3")));

        assert_eq!(pipeline.ids(), vec!["a", "b"]);
        let params = pipeline.apply(&RequestParams::new());
        assert_eq!(params.get("a"), Some("3"));
        assert!(pipeline.deregister("a"));
        assert!(!pipeline.deregister("a"));
    }

    #[test]
    fn temporal_predicate_joins_layer_filter() {
        let compiler = compiler_for(Dialect::Ecql, CompileOptions::default());
        let mut pipeline = ModifierPipeline::new();
        pipeline.install_query(
            &compiler,
            compiled(Dialect::Ecql, Some("(A = 1)")),
            Some(&range()),
            true,
        );
        let params = pipeline.apply(&RequestParams::new().with("typeName", "reefs"));

        assert_eq!(
            params.get("CQL_FILTER"),
            Some("((A = 1) AND (t <= 1970-01-01T00:01:00Z) AND (t >= 1970-01-01T00:00:00Z))")
        );
        assert_eq!(pipeline.ids(), vec![FILTER_MODIFIER_ID, TEMPORAL_MODIFIER_ID]);
    }

    #[test]
    fn clearing_the_range_removes_the_modifier() {
        let compiler = compiler_for(Dialect::Arc, CompileOptions::default());
        let mut pipeline = ModifierPipeline::new();
        pipeline.install_query(&compiler, compiled(Dialect::Arc, Some("1=1")), Some(&range()), false);
        assert_eq!(
            pipeline.apply(&RequestParams::new()).get("time"),
            Some("0,60000")
        );

        pipeline.install_query(&compiler, compiled(Dialect::Arc, Some("1=1")), None, false);
        assert_eq!(pipeline.ids(), vec![FILTER_MODIFIER_ID]);
        let params = pipeline.apply(&RequestParams::new());
        assert_eq!(params.get("time"), None);
        assert_eq!(params.get("where"), Some("1=1"));
    }

    #[test]
    fn base_filter_is_preserved() {
        let compiler = compiler_for(Dialect::Ecql, CompileOptions::default());
        let mut pipeline = ModifierPipeline::new();
        pipeline.install_query(&compiler, compiled(Dialect::Ecql, Some("(A = 1)")), None, false);
        let params = pipeline.apply(&RequestParams::new().with("CQL_FILTER", "(B = 2)"));
        assert_eq!(params.get("CQL_FILTER"), Some("((B = 2) AND (A = 1))"));
    }

    #[test]
    fn bare_base_filter_keeps_its_precedence() {
        let compiler = compiler_for(Dialect::Ecql, CompileOptions::default());
        let mut pipeline = ModifierPipeline::new();
        pipeline.install_query(&compiler, compiled(Dialect::Ecql, Some("(C = 3)")), None, false);
        let params = pipeline.apply(&RequestParams::new().with("CQL_FILTER", "A = 1 OR B = 2"));
        assert_eq!(
            params.get("CQL_FILTER"),
            Some("((A = 1 OR B = 2) AND (C = 3))")
        );
    }
}
