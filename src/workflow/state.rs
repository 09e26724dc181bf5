use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::{Evaluations, Variant};

/// The phases of a prompt workflow.
///
/// idle → clarifying → (generating | evaluating)* → completed, with `error`
/// reachable from any active phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Idle,
    Clarifying,
    Generating,
    Evaluating,
    Completed,
    Error,
}

impl WorkflowStatus {
    /// Map a server phase label from a `status` event.
    pub fn from_server_phase(label: &str) -> Self {
        match label {
            "generate" => WorkflowStatus::Generating,
            "evaluate" => WorkflowStatus::Evaluating,
            _ => WorkflowStatus::Clarifying,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Idle => write!(f, "idle"),
            WorkflowStatus::Clarifying => write!(f, "clarifying"),
            WorkflowStatus::Generating => write!(f, "generating"),
            WorkflowStatus::Evaluating => write!(f, "evaluating"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Which view the presentation layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveTab {
    #[default]
    Chat,
    Arena,
}

/// Everything a reader may observe. Published as a whole on every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub thread_id: Option<String>,
    pub status: WorkflowStatus,
    pub messages: Vec<Message>,
    pub variants: Vec<Variant>,
    pub evaluations: Evaluations,
    pub questions: Vec<String>,
    pub streaming_buffer: String,
    pub error: Option<String>,
    pub active_tab: ActiveTab,
    pub test_results: BTreeMap<String, String>,
    pub is_testing: bool,
    pub is_refining: bool,
    pub is_streaming: bool,
}

impl WorkflowSnapshot {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
