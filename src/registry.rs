//! Mapping Registry
//!
//! The ordered list of topic → filter bindings, built once from the
//! configuration and never modified afterwards. Mappings are handed out as
//! `Arc<Mapping>` so every subscription handler owns its own reference.

use std::sync::Arc;

use tracing::warn;

use crate::config::MappingConfig;
use crate::filter::{Decision, FieldFilter, Filter, FilterError};
use crate::topic::topic_matches_filter;

/// One topic filter bound to one filter rule
#[derive(Debug)]
pub struct Mapping {
    index: usize,
    topic: String,
    filter: Filter,
}

impl Mapping {
    pub fn new(index: usize, topic: impl Into<String>, filter: Filter) -> Self {
        Self {
            index,
            topic: topic.into(),
            filter,
        }
    }

    /// Build a mapping from its configuration. A script, when present,
    /// governs the mapping and any field rules are ignored.
    pub fn from_config(index: usize, config: &MappingConfig) -> Self {
        let filter = if let Some(path) = config.script_path() {
            if config.has_shadowed_filter() {
                warn!(
                    "Mapping #{} ({}): lua_file is set, field filter is ignored",
                    index, config.topic
                );
            }
            Filter::Script(config.engine.predicate(path))
        } else if config.filter.is_empty() {
            Filter::PassThrough
        } else {
            Filter::Fields(FieldFilter::new(config.filter.clone(), config.invert))
        };

        Self::new(index, config.topic.clone(), filter)
    }

    /// Position in the registry
    pub fn index(&self) -> usize {
        self.index
    }

    /// Topic filter this mapping subscribes to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Whether a publish on `topic` belongs to this mapping's subscription
    pub fn matches(&self, topic: &str) -> bool {
        topic_matches_filter(topic, &self.topic)
    }

    pub fn evaluate(&self, payload: &[u8]) -> Result<Decision, FilterError> {
        self.filter.evaluate(payload)
    }
}

/// Ordered, read-only collection of mappings
#[derive(Debug, Default)]
pub struct MappingRegistry {
    mappings: Vec<Arc<Mapping>>,
}

impl MappingRegistry {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        Self {
            mappings: mappings.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_configs(configs: &[MappingConfig]) -> Self {
        Self::new(
            configs
                .iter()
                .enumerate()
                .map(|(index, config)| Mapping::from_config(index, config))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Mapping>> {
        self.mappings.get(index)
    }

    /// Mappings in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mapping>> {
        self.mappings.iter()
    }

    /// Mappings whose topic filter matches `topic`, in declaration order
    pub fn matching<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Arc<Mapping>> {
        self.mappings.iter().filter(move |m| m.matches(topic))
    }
}
