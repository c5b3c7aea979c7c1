//! Mapping Configuration
//!
//! A mapping binds one topic filter to one filter rule:
//!
//! ```toml
//! [[mapping]]
//! topic = "sensors/+/alarm"
//! invert = false
//! filter = [{ severity = "high", site = "north" }]
//!
//! [[mapping]]
//! topic = "events/#"
//! lua_file = "filters/events.lua"
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use crate::filter::ScriptEngine;
use crate::topic::validate_topic_filter;

/// Topic → filter binding as written in the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingConfig {
    /// Topic filter to subscribe to (wildcards allowed)
    pub topic: String,

    /// Lua predicate script; takes precedence over `filter` when set
    #[serde(default, alias = "script")]
    pub lua_file: Option<String>,

    /// Engine used to run `lua_file`
    #[serde(default)]
    pub engine: ScriptEngine,

    /// Field-equality constraint groups, evaluated in order
    #[serde(default)]
    pub filter: Vec<HashMap<String, String>>,

    /// Invert the field-equality decision
    #[serde(default)]
    pub invert: bool,
}

impl MappingConfig {
    /// Script path, if one is configured. An empty string counts as unset.
    pub fn script_path(&self) -> Option<&str> {
        self.lua_file.as_deref().filter(|path| !path.is_empty())
    }

    /// Both a script and field rules are configured; the script wins.
    pub fn has_shadowed_filter(&self) -> bool {
        self.script_path().is_some() && !self.filter.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        validate_topic_filter(&self.topic).map_err(str::to_string)
    }
}
