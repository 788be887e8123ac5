//! # Task envelope handed out by the server on poll.
//!
//! [`TaskEnvelope`] is the runtime's read-only view of a polled task. Only the
//! fields the runner acts on are typed; everything else the server sends is kept
//! verbatim in [`TaskEnvelope::extra`] so nothing is lost when user code wants it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A task instance assigned to this worker by the server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    /// Server-assigned task instance id.
    #[serde(default)]
    pub task_id: String,
    /// Workflow instance this task belongs to.
    #[serde(default)]
    pub workflow_instance_id: String,
    /// Task type name (the queue this task was polled from).
    #[serde(default)]
    pub task_type: String,
    /// Task definition name; usually equal to `task_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_def_name: Option<String>,
    /// Reference name of the task inside its workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_task_name: Option<String>,
    /// Heterogeneous input values.
    #[serde(default)]
    pub input_data: Map<String, Value>,
    /// Seconds the server waits for an update before re-queueing the task (0 = none).
    #[serde(default)]
    pub response_timeout_seconds: u64,
    /// How many times this task instance has been handed to a worker.
    #[serde(default)]
    pub poll_count: u32,
    /// Server-side retry counter.
    #[serde(default)]
    pub retry_count: u32,
    /// Domain the task was polled from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Any remaining fields sent by the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskEnvelope {
    /// Creates an envelope with identifiers only (mostly useful in tests and demos).
    pub fn new(
        task_id: impl Into<String>,
        workflow_instance_id: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            workflow_instance_id: workflow_instance_id.into(),
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    /// Adds one input value.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_data.insert(key.into(), value.into());
        self
    }

    /// Sets the response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_seconds = timeout.as_secs();
        self
    }

    /// Returns one input value, if present.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.input_data.get(key)
    }

    /// Response timeout as a `Duration`; `None` when the server did not set one.
    pub fn response_timeout(&self) -> Option<Duration> {
        match self.response_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_server_payload_and_keeps_unknown_fields() {
        let raw = json!({
            "taskId": "t-1",
            "workflowInstanceId": "wf-9",
            "taskType": "orders",
            "inputData": { "orderId": 42 },
            "responseTimeoutSeconds": 30,
            "pollCount": 2,
            "status": "IN_PROGRESS",
            "seq": 7
        });

        let task: TaskEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(task.task_id, "t-1");
        assert_eq!(task.input("orderId"), Some(&json!(42)));
        assert_eq!(task.poll_count, 2);
        assert_eq!(task.response_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(task.extra.get("status"), Some(&json!("IN_PROGRESS")));
        assert_eq!(task.extra.get("seq"), Some(&json!(7)));
    }

    #[test]
    fn missing_fields_default() {
        let task: TaskEnvelope = serde_json::from_value(json!({ "taskId": "x" })).unwrap();
        assert!(task.input_data.is_empty());
        assert_eq!(task.response_timeout(), None);
    }
}
