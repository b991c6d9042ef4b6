//! Inbound task requests and the outbound completion payload.

use codegen::AttachmentRef;
use serde::{Deserialize, Serialize};

fn default_round() -> u32 {
    1
}

/// One accepted task. `task` doubles as the repository name and is used
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Empty when absent; the inbound layer rejects it after the secret check.
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_round")]
    pub round: u32,
    #[serde(default)]
    pub brief: String,
    /// Advisory acceptance criteria, passed to generation only.
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub evaluation_url: Option<String>,
    /// Echoed back verbatim in the notification.
    #[serde(default)]
    pub nonce: String,
}

/// Completion report sent to the evaluation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: Option<String>,
    pub pages_url: String,
}
