//! # Task outcome reported back to the server.
//!
//! [`TaskOutcome`] is the wire body of `POST tasks`. Its [`TaskStatus`] is a
//! closed set; the constructors here keep the one invariant the server relies
//! on: an `IN_PROGRESS` outcome always carries a positive callback delay.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::TaskEnvelope;

/// Smallest callback delay the runtime will send for `IN_PROGRESS`.
pub const MIN_CALLBACK_AFTER: Duration = Duration::from_secs(1);

/// Status of a reported task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Finished successfully.
    Completed,
    /// Failed; the server may retry per the task definition.
    Failed,
    /// Failed and must never be retried.
    FailedWithTerminalError,
    /// Still running; the server re-offers the task after `callbackAfterSeconds`.
    InProgress,
}

impl TaskStatus {
    /// Stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::FailedWithTerminalError => "failed_with_terminal_error",
            TaskStatus::InProgress => "in_progress",
        }
    }
}

/// One log line attached to an outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecLog {
    pub log: String,
    pub task_id: String,
    /// Epoch milliseconds.
    pub created_time: u64,
}

impl TaskExecLog {
    pub fn new(task_id: impl Into<String>, log: impl Into<String>) -> Self {
        let created_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            log: log.into(),
            task_id: task_id.into(),
            created_time,
        }
    }
}

/// Result of one task execution, ready to be sent to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub workflow_instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub output_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskExecLog>,
    /// Only meaningful for `IN_PROGRESS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_after_seconds: Option<u64>,
    /// Lease-extension marker; carries no output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extend_lease: bool,
}

impl TaskOutcome {
    /// Bare outcome with the given status and no identifiers.
    ///
    /// User code returns these through [`UserReturn::Outcome`](crate::UserReturn::Outcome);
    /// the runtime fills in task and workflow ids before reporting.
    pub fn new(status: TaskStatus) -> Self {
        Self {
            task_id: String::new(),
            workflow_instance_id: String::new(),
            worker_id: None,
            status,
            output_data: Map::new(),
            reason_for_incompletion: None,
            logs: Vec::new(),
            callback_after_seconds: None,
            extend_lease: false,
        }
    }

    pub fn completed(output: Map<String, Value>) -> Self {
        Self::new(TaskStatus::Completed).with_output(output)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(TaskStatus::Failed).with_reason(reason)
    }

    pub fn failed_terminal(reason: impl Into<String>) -> Self {
        Self::new(TaskStatus::FailedWithTerminalError).with_reason(reason)
    }

    /// `IN_PROGRESS` outcome; `callback_after` is clamped to [`MIN_CALLBACK_AFTER`].
    pub fn in_progress(callback_after: Duration, output: Map<String, Value>) -> Self {
        let mut outcome = Self::new(TaskStatus::InProgress).with_output(output);
        outcome.callback_after_seconds = Some(callback_after.max(MIN_CALLBACK_AFTER).as_secs());
        outcome
    }

    /// Lease-extension update for a still-running task.
    pub fn extend_lease(task: &TaskEnvelope, worker_id: &str) -> Self {
        let mut outcome = Self::new(TaskStatus::InProgress).for_task(task, worker_id);
        outcome.extend_lease = true;
        outcome
    }

    pub fn with_output(mut self, output: Map<String, Value>) -> Self {
        self.output_data = output;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason_for_incompletion = Some(reason.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        let log = TaskExecLog::new(self.task_id.clone(), log);
        self.logs.push(log);
        self
    }

    /// Binds the outcome to a task and worker, rewriting log task ids as well.
    pub fn for_task(mut self, task: &TaskEnvelope, worker_id: &str) -> Self {
        self.task_id = task.task_id.clone();
        self.workflow_instance_id = task.workflow_instance_id.clone();
        self.worker_id = Some(worker_id.to_string());
        for log in &mut self.logs {
            log.task_id = task.task_id.clone();
        }
        self
    }

    /// Re-establishes the `IN_PROGRESS` callback invariant on outcomes built elsewhere.
    pub(crate) fn enforce_callback_invariant(mut self) -> Self {
        if self.status == TaskStatus::InProgress && !self.extend_lease {
            let secs = self.callback_after_seconds.unwrap_or(0);
            self.callback_after_seconds = Some(secs.max(MIN_CALLBACK_AFTER.as_secs()));
        } else if self.status != TaskStatus::InProgress {
            self.callback_after_seconds = None;
        }
        self
    }
}

/// "Not done yet" marker returned by user code.
///
/// Becomes an `IN_PROGRESS` outcome carrying `output` and asking the server to
/// re-offer the task after `callback_after`.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskInProgress {
    pub callback_after: Duration,
    pub output: Map<String, Value>,
}

impl TaskInProgress {
    pub fn new(callback_after: Duration) -> Self {
        Self {
            callback_after,
            output: Map::new(),
        }
    }

    pub fn with_output(mut self, output: Map<String, Value>) -> Self {
        self.output = output;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_uses_server_spelling() {
        let v = serde_json::to_value(TaskStatus::FailedWithTerminalError).unwrap();
        assert_eq!(v, json!("FAILED_WITH_TERMINAL_ERROR"));
        let s: TaskStatus = serde_json::from_value(json!("IN_PROGRESS")).unwrap();
        assert_eq!(s, TaskStatus::InProgress);
    }

    #[test]
    fn in_progress_never_carries_zero_delay() {
        let outcome = TaskOutcome::in_progress(Duration::ZERO, Map::new());
        assert_eq!(outcome.callback_after_seconds, Some(1));

        let passthrough = TaskOutcome::new(TaskStatus::InProgress).enforce_callback_invariant();
        assert_eq!(passthrough.callback_after_seconds, Some(1));
    }

    #[test]
    fn completed_drops_stray_callback() {
        let mut outcome = TaskOutcome::completed(Map::new());
        outcome.callback_after_seconds = Some(30);
        assert_eq!(outcome.enforce_callback_invariant().callback_after_seconds, None);
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let task = TaskEnvelope::new("t-1", "wf-1", "orders");
        let outcome = TaskOutcome::failed("boom")
            .with_log("trace")
            .for_task(&task, "host-a");
        let v = serde_json::to_value(&outcome).unwrap();

        assert_eq!(v["taskId"], json!("t-1"));
        assert_eq!(v["workflowInstanceId"], json!("wf-1"));
        assert_eq!(v["workerId"], json!("host-a"));
        assert_eq!(v["status"], json!("FAILED"));
        assert_eq!(v["reasonForIncompletion"], json!("boom"));
        assert_eq!(v["logs"][0]["taskId"], json!("t-1"));
        assert!(v.get("extendLease").is_none());
        assert!(v.get("callbackAfterSeconds").is_none());
    }

    #[test]
    fn lease_extension_is_marked_and_empty() {
        let task = TaskEnvelope::new("t-2", "wf-2", "orders");
        let v = serde_json::to_value(TaskOutcome::extend_lease(&task, "w")).unwrap();
        assert_eq!(v["extendLease"], json!(true));
        assert_eq!(v["outputData"], json!({}));
    }
}
