//! Incremental decoder for `text/event-stream` bodies.
//!
//! Chunks arrive with arbitrary boundaries, so the decoder keeps the partial
//! line as raw bytes and only converts complete lines to UTF-8.

use super::StreamError;

const DEFAULT_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk and return every frame it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, StreamError> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8(line).map_err(|_| StreamError::InvalidUtf8)?;
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        Ok(frames)
    }

    /// True when bytes or fields are buffered that no blank line has dispatched.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.event.is_some() || !self.data.is_empty()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // `id` and `retry` only matter for browser reconnection.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
        })
    }
}
