//! Pluggable payload validation.
//!
//! The engine never binds to a schema library. Input, result, suspend, and
//! resume payloads are checked through the [`Validator`] capability: a
//! function from a raw [`Value`] to a typed (possibly normalized) value or a
//! structured error. Callers plug in whatever schema machinery they like;
//! the engine only cares about the contract.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// A payload failed validation against a declared schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Validates a raw value, returning the typed value or a structured error.
///
/// Implementations may normalize the value (defaults, coercions); the
/// returned value is what the engine threads forward.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<Value, ValidationError>;
}

/// Shared handle to a validator, as stored on a workflow definition.
pub type SharedValidator = Arc<dyn Validator>;

/// Accepts any value unchanged.
pub struct AnyValidator;

impl Validator for AnyValidator {
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        Ok(value.clone())
    }
}

/// Wraps a plain function or closure as a [`Validator`].
pub struct FnValidator<F>(F);

impl<F> FnValidator<F>
where
    F: Fn(&Value) -> Result<Value, ValidationError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value) -> Result<Value, ValidationError> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        (self.0)(value)
    }
}

/// Validator requiring a JSON object carrying the given fields.
///
/// Covers the common case of workflows whose payloads are flat objects
/// without pulling in a schema library.
pub struct ObjectFields {
    required: Vec<String>,
}

impl ObjectFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for ObjectFields {
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ValidationError::new("expected an object"))?;
        for field in &self.required {
            if !obj.contains_key(field) {
                return Err(ValidationError::new(format!("missing field: {field}")));
            }
        }
        Ok(value.clone())
    }
}
