//! Error types for the spec engine

use thiserror::Error;

use crate::ident::Ident;
use crate::value::Value;

/// Result type for spec operations
pub type Result<T> = std::result::Result<T, SpecError>;

/// Spec engine errors
///
/// Non-conformance of a value is never an error: `conform` reports it as
/// [`crate::conform::ConformResult::Invalid`]. The variants here cover
/// construction-time shape violations, registry misses, generator-path
/// failures, and instrumentation contract breaches.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("malformed spec: {0}")]
    MalformedSpec(String),

    #[error("unknown spec: {0}")]
    UnknownSpec(Ident),

    #[error("unknown function: {0}")]
    UnknownFn(Ident),

    #[error("no generator derivable for `{0}`")]
    Ungeneratable(String),

    #[error("generator retry budget ({budget}) exhausted for `{spec}`")]
    GeneratorExhausted { spec: String, budget: usize },

    #[error("generator override for `{spec}` produced a non-conforming value: {value}")]
    GeneratorContractViolation { spec: String, value: Value },

    #[error("arguments do not conform to the args spec:\n{report}")]
    ArgsInvalid { report: String },

    #[error("return value does not conform to the ret spec:\n{report}")]
    RetInvalid { report: String },

    #[error("args/ret relation does not hold:\n{report}")]
    FnInvalid { report: String },
}

impl SpecError {
    /// Short constructor for construction-time shape violations
    pub fn malformed(msg: impl Into<String>) -> Self {
        SpecError::MalformedSpec(msg.into())
    }
}
