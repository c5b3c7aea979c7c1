//! Script predicates
//!
//! A predicate script exposes a global `match(payload)` function. The message
//! is kept when it returns `true`; any other return value, or a script that
//! does not define `match`, discards it.
//!
//! Every evaluation reads the file again and runs it in a fresh interpreter,
//! so no state survives between messages.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlua::{Lua, LuaSerdeExt, Table, Value};
use serde::Deserialize;
use tracing::warn;

/// Name of the function a predicate script must define
pub const MATCH_FUNCTION: &str = "match";

/// Error raised while loading or running a predicate script
#[derive(Debug)]
pub enum ScriptError {
    /// The script file could not be read
    Io { path: String, source: std::io::Error },
    /// The interpreter reported an error (syntax, runtime, or raised by `match`)
    Runtime { path: String, message: String },
    /// The evaluation task did not complete
    Aborted(String),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Io { path, source } => {
                write!(f, "cannot read script {}: {}", path, source)
            }
            ScriptError::Runtime { path, message } => {
                write!(f, "script {} failed: {}", path, message)
            }
            ScriptError::Aborted(msg) => write!(f, "script evaluation aborted: {}", msg),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A keep/skip predicate backed by an external script
pub trait ScriptPredicate: fmt::Debug + Send + Sync {
    /// Path of the script, for logging
    fn path(&self) -> &Path;

    /// Returns `true` when the payload should be kept. The payload bytes are
    /// handed to the script unchanged, whatever their encoding.
    fn evaluate(&self, payload: &[u8]) -> Result<bool, ScriptError>;
}

/// Supported scripting engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptEngine {
    #[default]
    Lua,
}

impl ScriptEngine {
    /// Build a predicate for the script at `path`. The file is not read yet.
    pub fn predicate(self, path: impl Into<PathBuf>) -> Arc<dyn ScriptPredicate> {
        match self {
            ScriptEngine::Lua => Arc::new(LuaScript::new(path)),
        }
    }
}

/// Lua predicate script
#[derive(Debug, Clone)]
pub struct LuaScript {
    path: PathBuf,
}

impl LuaScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn runtime_error(&self, e: mlua::Error) -> ScriptError {
        ScriptError::Runtime {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }
}

impl ScriptPredicate for LuaScript {
    fn path(&self) -> &Path {
        &self.path
    }

    fn evaluate(&self, payload: &[u8]) -> Result<bool, ScriptError> {
        let source = std::fs::read(&self.path).map_err(|e| ScriptError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;

        let lua = Lua::new();
        preload_json(&lua).map_err(|e| self.runtime_error(e))?;

        lua.load(&source[..])
            .set_name(format!("@{}", self.path.display()))
            .exec()
            .map_err(|e| self.runtime_error(e))?;

        let matcher: Value = lua
            .globals()
            .get(MATCH_FUNCTION)
            .map_err(|e| self.runtime_error(e))?;

        let Value::Function(matcher) = matcher else {
            warn!(
                "Script {} does not define a '{}' function; discarding message",
                self.path.display(),
                MATCH_FUNCTION
            );
            return Ok(false);
        };

        let payload = lua
            .create_string(payload)
            .map_err(|e| self.runtime_error(e))?;
        let result: Value = matcher.call(payload).map_err(|e| self.runtime_error(e))?;
        Ok(matches!(result, Value::Boolean(true)))
    }
}

/// Make `require("json")` available to scripts, with `decode` and `encode`.
fn preload_json(lua: &Lua) -> mlua::Result<()> {
    let loader = lua.create_function(|lua, ()| {
        let module = lua.create_table()?;
        module.set(
            "decode",
            lua.create_function(|lua, text: mlua::String| {
                let bytes = text.as_bytes();
                let value: serde_json::Value =
                    serde_json::from_slice(&bytes).map_err(mlua::Error::external)?;
                lua.to_value(&value)
            })?,
        )?;
        module.set(
            "encode",
            lua.create_function(|lua, value: Value| {
                let value: serde_json::Value = lua.from_value(value)?;
                serde_json::to_string(&value).map_err(mlua::Error::external)
            })?,
        )?;
        Ok(module)
    })?;

    let package: Table = lua.globals().get("package")?;
    let preload: Table = package.get("preload")?;
    preload.set("json", loader)
}
