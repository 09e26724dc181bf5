//! Event stream consumer: SSE decoding, typed workflow events, and the
//! cancellable delivery task.

pub mod consumer;
pub mod event;
pub mod sse;

use thiserror::Error;

use crate::api::ApiError;

pub use consumer::{StreamMessage, SubscriptionHandle, subscribe};
pub use event::{UpdatePayload, WorkflowEvent};
pub use sse::{SseDecoder, SseFrame};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(#[from] ApiError),

    #[error("malformed `{event}` payload: {reason}")]
    Malformed { event: String, reason: String },

    #[error("invalid UTF-8 in event stream")]
    InvalidUtf8,
}
