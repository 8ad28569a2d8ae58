use std::fmt;

use serde::{Deserialize, Serialize};

/// https://redfish.dmtf.org/schemas/v1/Task.v1_7_1.json
/// An asynchronous job on the BMC, as seen by one poll.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(rename = "@odata.id", default)]
    pub odata_id: String,
    #[serde(default)]
    pub id: String,
    pub task_state: TaskState,
    pub task_status: String,
    pub percent_complete: u32,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub payload: TaskPayload,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct TaskPayload {
    pub target_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum TaskState {
    New,
    Starting,
    Running,
    Suspended,
    Interrupted,
    Pending,
    Stopping,
    Completed,
    Killed,
    Exception,
    Service,
    Cancelling,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Task {
    /// Once the state leaves Running the task will not change again.
    pub fn is_terminal(&self) -> bool {
        self.task_state != TaskState::Running
    }

    pub fn is_success(&self) -> bool {
        self.task_state == TaskState::Completed
            && self.task_status == "OK"
            && self.percent_complete == 100
    }

    /// All messages flattened into one string, for marker matching.
    pub fn message_text(&self) -> String {
        serde_json::Value::Array(self.messages.clone()).to_string()
    }

    /// The human readable part of the messages, falling back to the raw JSON.
    pub fn summary(&self) -> String {
        let texts: Vec<&str> = self
            .messages
            .iter()
            .filter_map(|m| m.get("Message").and_then(|v| v.as_str()))
            .collect();
        if texts.is_empty() {
            self.message_text()
        } else {
            texts.join("; ")
        }
    }
}
