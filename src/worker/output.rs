//! # Return-value normalization.
//!
//! Every worker invocation ends in exactly one [`TaskOutcome`]:
//!
//! ```text
//! Err(NonRetryable{message})     → FAILED_WITH_TERMINAL_ERROR, reason = message
//! Err(Failed{message, trace})    → FAILED, reason = message, one log line (trace or message)
//! Ok(Outcome(o))                 → o (status/output/reason passed through)
//! Ok(InProgress(p))              → IN_PROGRESS, callback = p.callback_after (≥ 1s)
//! Ok(Output(Object))             → COMPLETED, output = object
//! Ok(Output(Null))               → COMPLETED, empty output
//! Ok(Output(other))              → COMPLETED, output = {"result": other}
//! Ok(Unrepresentable{..})        → COMPLETED, output = {"result": repr, "_serialization_error": msg}
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::TaskError;
use crate::model::{TaskEnvelope, TaskInProgress, TaskOutcome};

/// Output key used when a return value is not a map.
pub const RESULT_KEY: &str = "result";
/// Diagnostic key attached when a return value could not be serialized.
pub const SERIALIZATION_ERROR_KEY: &str = "_serialization_error";

/// What a worker function produced.
#[derive(Clone, Debug, PartialEq)]
pub enum UserReturn {
    /// Plain success value.
    Output(Value),
    /// Success value that could not be represented as JSON.
    Unrepresentable {
        /// Best-effort description of the value.
        repr: String,
        /// Serialization failure.
        error: String,
    },
    /// Fully shaped outcome.
    Outcome(TaskOutcome),
    /// Needs more time.
    InProgress(TaskInProgress),
}

/// Result type of worker functions after conversion.
pub type WorkerResult = Result<UserReturn, TaskError>;

impl UserReturn {
    /// Serializes any value; failures degrade to [`UserReturn::Unrepresentable`].
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => UserReturn::Output(v),
            Err(e) => UserReturn::Unrepresentable {
                repr: std::any::type_name::<T>().to_string(),
                error: e.to_string(),
            },
        }
    }
}

impl From<Value> for UserReturn {
    fn from(value: Value) -> Self {
        UserReturn::Output(value)
    }
}

impl From<Map<String, Value>> for UserReturn {
    fn from(map: Map<String, Value>) -> Self {
        UserReturn::Output(Value::Object(map))
    }
}

impl From<()> for UserReturn {
    fn from(_: ()) -> Self {
        UserReturn::Output(Value::Null)
    }
}

impl From<TaskOutcome> for UserReturn {
    fn from(outcome: TaskOutcome) -> Self {
        UserReturn::Outcome(outcome)
    }
}

impl From<TaskInProgress> for UserReturn {
    fn from(marker: TaskInProgress) -> Self {
        UserReturn::InProgress(marker)
    }
}

macro_rules! scalar_return {
    ($($t:ty),*) => {
        $(impl From<$t> for UserReturn {
            fn from(v: $t) -> Self {
                UserReturn::Output(Value::from(v))
            }
        })*
    };
}

scalar_return!(bool, i32, i64, u32, u64, f64, String, &str);

/// Turns one invocation result into the outcome reported for `task`.
///
/// Pure apart from the warning logged for unrepresentable values; normalizing the
/// same input twice yields the same outcome (log timestamps aside).
pub fn normalize(task: &TaskEnvelope, result: WorkerResult, worker_id: &str) -> TaskOutcome {
    let outcome = match result {
        Err(TaskError::NonRetryable { message }) => TaskOutcome::failed_terminal(message),
        Err(TaskError::Failed { message, trace }) => {
            let log = trace.unwrap_or_else(|| message.clone());
            TaskOutcome::failed(message).with_log(log)
        }
        Ok(UserReturn::Outcome(outcome)) => outcome,
        Ok(UserReturn::InProgress(marker)) => {
            TaskOutcome::in_progress(marker.callback_after, marker.output)
        }
        Ok(UserReturn::Output(value)) => TaskOutcome::completed(output_map(value)),
        Ok(UserReturn::Unrepresentable { repr, error }) => {
            warn!(
                task_type = %task.task_type,
                task_id = %task.task_id,
                %error,
                "task output is not serializable; reporting a string fallback"
            );
            let mut output = Map::new();
            output.insert(RESULT_KEY.into(), Value::String(repr));
            output.insert(SERIALIZATION_ERROR_KEY.into(), Value::String(error));
            TaskOutcome::completed(output)
        }
    };
    outcome.for_task(task, worker_id).enforce_callback_invariant()
}

fn output_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert(RESULT_KEY.into(), other);
            map
        }
    }
}
