use serde::Deserialize;

use crate::api::{Evaluations, Variant};

use super::StreamError;
use super::sse::SseFrame;

/// A decoded workflow event. The set is closed: frames with other event
/// names are skipped by [`WorkflowEvent::decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// Session identity assigned by the server.
    Metadata { thread_id: String },
    /// Fragment of the in-flight assistant message.
    Token { content: String },
    /// Coarse server phase label (`clarify`, `generate`, `evaluate`, ...).
    Status { status: String },
    /// End of the current turn.
    Update(UpdatePayload),
    /// Server-reported failure of the turn.
    Error { detail: String },
}

/// Payload of an `update` event. Absent fields leave prior values untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdatePayload {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub questions: Option<Vec<String>>,
    #[serde(default)]
    pub variants: Option<Vec<Variant>>,
    #[serde(default)]
    pub evaluations: Option<Evaluations>,
}

impl UpdatePayload {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

#[derive(Deserialize)]
struct MetadataPayload {
    thread_id: String,
}

#[derive(Deserialize)]
struct TokenPayload {
    content: String,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    detail: Option<String>,
}

impl WorkflowEvent {
    /// Decode one SSE frame.
    ///
    /// Returns `Ok(None)` for event names outside the workflow protocol and
    /// `StreamError::Malformed` when a known event carries a bad payload.
    pub fn decode(frame: &SseFrame) -> Result<Option<Self>, StreamError> {
        let event = match frame.event.as_str() {
            "metadata" => {
                let p: MetadataPayload = parse(frame)?;
                WorkflowEvent::Metadata {
                    thread_id: p.thread_id,
                }
            }
            "token" => {
                let p: TokenPayload = parse(frame)?;
                WorkflowEvent::Token { content: p.content }
            }
            "status" => {
                let p: StatusPayload = parse(frame)?;
                WorkflowEvent::Status { status: p.status }
            }
            "update" => WorkflowEvent::Update(parse(frame)?),
            "error" => {
                let p: ErrorPayload = parse(frame)?;
                WorkflowEvent::Error {
                    detail: p.detail.unwrap_or_else(|| "Unknown error".to_string()),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::Metadata { .. } => "metadata",
            WorkflowEvent::Token { .. } => "token",
            WorkflowEvent::Status { .. } => "status",
            WorkflowEvent::Update(_) => "update",
            WorkflowEvent::Error { .. } => "error",
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(frame: &SseFrame) -> Result<T, StreamError> {
    serde_json::from_str(&frame.data).map_err(|e| StreamError::Malformed {
        event: frame.event.clone(),
        reason: e.to_string(),
    })
}
