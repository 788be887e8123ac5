//! # Parameter binding.
//!
//! A worker function receives its input one of two ways, fixed at registration:
//!
//! ```text
//! Binding::Envelope        f(&TaskEnvelope)
//! Binding::Named([a, b])   f(Args { a: input["a"] | default | null,
//!                                   b: input["b"] | default | null })
//! ```
//!
//! Typed access goes through [`Args::get`], which reconstructs any
//! `DeserializeOwned` type from the bound JSON value.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::TaskError;
use crate::model::TaskEnvelope;

/// One declared parameter of a named-binding worker.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    /// Used when the input map has no value under `name`.
    pub default: Option<Value>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

impl From<&str> for Param {
    fn from(name: &str) -> Self {
        Param::new(name)
    }
}

/// How a worker's input is built from the envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    /// Pass the whole envelope.
    Envelope,
    /// Bind declared parameters from the input map by name.
    Named(Vec<Param>),
}

impl Binding {
    /// Builds the argument set for a named binding.
    pub fn bind(params: &[Param], task: &TaskEnvelope) -> Args {
        let values = params
            .iter()
            .map(|p| {
                let value = task
                    .input(&p.name)
                    .cloned()
                    .or_else(|| p.default.clone())
                    .unwrap_or(Value::Null);
                (p.name.clone(), value)
            })
            .collect();
        Args {
            task_id: task.task_id.clone(),
            values,
        }
    }
}

/// Values bound to declared parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Args {
    task_id: String,
    values: Map<String, Value>,
}

impl Args {
    /// Id of the task these arguments came from.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Raw bound value (`Null` for undeclared names).
    pub fn raw(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&Value::Null)
    }

    /// Bound value coerced to `T`.
    ///
    /// Scalars pass through; structs are rebuilt field by field. A missing value is
    /// `null`, so `Option<T>` parameters read as `None`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, TaskError> {
        serde_json::from_value(self.raw(name).clone()).map_err(|e| {
            TaskError::failed(format!("parameter '{name}' has unexpected shape: {e}"))
        })
    }
}
