//! # Call Arguments
//!
//! Every call carries positional and keyword arguments as JSON values.
//! On the wire they are folded into one object: positional arguments live
//! under the empty key, every other key is a keyword argument.
//!
//! ```text
//! {"": [6, 7], "verbose": true}
//! ```

use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;

use crate::method::CallError;

/// Key that holds the positional arguments inside a call body.
pub const POSITIONAL_KEY: &str = "";

/// Positional and keyword arguments of a single call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets a keyword argument, replacing any previous value.
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Parses a call body. Anything that is not an object means "no arguments",
    /// and a non-array positional entry is dropped.
    pub fn from_body(body: Value) -> Self {
        let Value::Object(mut keyword) = body else {
            return Self::default();
        };

        let positional = match keyword.remove(POSITIONAL_KEY) {
            Some(Value::Array(values)) => values,
            _ => Vec::new(),
        };

        Self { positional, keyword }
    }

    /// Parses raw request bytes, treating malformed or empty JSON as no arguments.
    pub fn from_slice(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes)
            .map(Self::from_body)
            .unwrap_or_default()
    }

    /// Folds the arguments back into the wire object.
    pub fn into_body(self) -> Value {
        let mut body = self.keyword;
        if !self.positional.is_empty() {
            body.insert(POSITIONAL_KEY.to_string(), Value::Array(self.positional));
        }
        Value::Object(body)
    }

    /// Looks up a parameter the way a call binds it: by position first, then by name.
    pub fn value(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keyword.get(name))
    }

    /// Binds and deserializes a required parameter.
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, CallError> {
        let value = self
            .value(index, name)
            .ok_or_else(|| CallError::Application(format!("missing required argument '{}'", name)))?;

        serde_json::from_value(value.clone())
            .map_err(|e| CallError::Application(format!("invalid argument '{}': {}", name, e)))
    }

    /// Binds an optional parameter, falling back to `default` when it is absent.
    pub fn get_or<T: DeserializeOwned>(&self, index: usize, name: &str, default: T) -> Result<T, CallError> {
        match self.value(index, name) {
            None => Ok(default),
            Some(_) => self.get(index, name),
        }
    }
}
