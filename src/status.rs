//! Instance and task status as reported by the platform.
//!
//! Status values are never mutated locally: every value a caller sees was
//! returned by a fresh platform read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tunnel::Column;

/// Lifecycle status of an instance (a session or a statement).
///
/// `Created → Running → Terminated` is driven exclusively by the platform.
/// Once an instance reports `Terminated` it never reports anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Created,
    Running,
    Suspended,
    Terminated,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Created => "Created",
            InstanceStatus::Running => "Running",
            InstanceStatus::Suspended => "Suspended",
            InstanceStatus::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(InstanceStatus::Created),
            "running" => Ok(InstanceStatus::Running),
            "suspended" => Ok(InstanceStatus::Suspended),
            "terminated" => Ok(InstanceStatus::Terminated),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// Status of one task inside an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Waiting,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "Waiting",
            TaskStatus::Running => "Running",
            TaskStatus::Success => "Success",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(TaskStatus::Waiting),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Result of one task as returned by the platform.
///
/// `schema` is present only when the task produced tabular output; `result`
/// then holds that output as CSV text (header row first, `\N` for nulls).
/// For tasks without tabular output `result` carries free-form diagnostic
/// text, which is empty on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    pub status: TaskStatus,
    pub result: String,
    pub schema: Option<Vec<Column>>,
}

impl TaskResult {
    pub fn has_tabular_output(&self) -> bool {
        self.schema.is_some()
    }
}
