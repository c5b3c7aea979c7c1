//! Filter Evaluator
//!
//! Decides, for one message and the mapping that received it, whether the
//! message is forwarded. A mapping uses exactly one of:
//! - a predicate script, which takes precedence when configured,
//! - field-equality constraint groups over a JSON object payload,
//! - nothing, in which case every message is kept.

mod fields;
pub mod script;

use std::fmt;
use std::sync::Arc;

pub use fields::{ConstraintGroup, FieldFilter};
pub use script::{LuaScript, ScriptEngine, ScriptError, ScriptPredicate};

/// Outcome of evaluating a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Forward the message
    Keep,
    /// Discard the message
    Skip,
}

impl Decision {
    pub fn from_skip(skip: bool) -> Self {
        if skip {
            Decision::Skip
        } else {
            Decision::Keep
        }
    }

    pub fn is_keep(self) -> bool {
        self == Decision::Keep
    }
}

/// Error evaluating a filter
#[derive(Debug)]
pub enum FilterError {
    /// Payload is not a JSON object (field-equality mode)
    Payload(String),
    /// Predicate script could not be loaded or raised an error
    Script(ScriptError),
}

impl FilterError {
    /// Script faults end the process; payload errors only discard the message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FilterError::Script(_))
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Payload(msg) => write!(f, "payload is not a JSON object: {}", msg),
            FilterError::Script(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FilterError::Script(e) => Some(e),
            FilterError::Payload(_) => None,
        }
    }
}

impl From<ScriptError> for FilterError {
    fn from(e: ScriptError) -> Self {
        FilterError::Script(e)
    }
}

/// The filter rule of one mapping
#[derive(Debug, Clone)]
pub enum Filter {
    /// Keep everything
    PassThrough,
    /// Field-equality constraint groups
    Fields(FieldFilter),
    /// External predicate script
    Script(Arc<dyn ScriptPredicate>),
}

impl Filter {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Filter::PassThrough => "pass-through",
            Filter::Fields(_) => "fields",
            Filter::Script(_) => "script",
        }
    }

    /// Evaluation does file I/O and runs an interpreter
    pub fn is_blocking(&self) -> bool {
        matches!(self, Filter::Script(_))
    }

    /// Decide whether `payload` is forwarded.
    pub fn evaluate(&self, payload: &[u8]) -> Result<Decision, FilterError> {
        match self {
            Filter::PassThrough => Ok(Decision::Keep),
            Filter::Fields(fields) => fields.evaluate(payload),
            Filter::Script(predicate) => {
                let keep = predicate.evaluate(payload)?;
                Ok(Decision::from_skip(!keep))
            }
        }
    }
}
