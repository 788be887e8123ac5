//! Minimal task definition used for auto-registration.

use serde::{Deserialize, Serialize};

/// Task definition payload for `POST metadata/taskdefs`.
///
/// Only the fields a worker can sensibly default are carried; anything richer
/// belongs to the workflow author, not the worker runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub retry_count: u32,
    pub timeout_seconds: u64,
    pub response_timeout_seconds: u64,
    pub owner_email: Option<String>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            retry_count: 3,
            timeout_seconds: 3600,
            response_timeout_seconds: 600,
            owner_email: None,
        }
    }
}
