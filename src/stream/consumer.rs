use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::ByteStream;

use super::StreamError;
use super::event::WorkflowEvent;
use super::sse::SseDecoder;

/// What a subscription hands to its handler.
#[derive(Debug)]
pub enum StreamMessage {
    Event(WorkflowEvent),
    /// The stream failed. Sent at most once and always last.
    Failed(StreamError),
    /// The server closed the stream normally.
    Closed,
}

/// Owner side of a running subscription. Dropping it cancels delivery.
#[derive(Debug)]
pub struct SubscriptionHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stop delivery. A handler call already running finishes; no further
    /// call starts.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the delivery task to exit.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "event stream task ended abnormally");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn a task that decodes `source` and feeds `handler` in delivery order.
///
/// The handler runs on the task, one message at a time. Cancellation is
/// checked before every call.
pub fn subscribe<H>(source: ByteStream, handler: H) -> SubscriptionHandle
where
    H: FnMut(StreamMessage) + Send + 'static,
{
    let token = CancellationToken::new();
    let task = tokio::spawn(pump(source, handler, token.clone()));
    SubscriptionHandle {
        token,
        task: Some(task),
    }
}

async fn pump<H>(mut source: ByteStream, mut handler: H, token: CancellationToken)
where
    H: FnMut(StreamMessage),
{
    let mut decoder = SseDecoder::new();
    let mut delivered: usize = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(delivered, "event stream cancelled");
                return;
            }
            chunk = source.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                if !token.is_cancelled() {
                    handler(StreamMessage::Failed(StreamError::Transport(e)));
                }
                return;
            }
            None => {
                if decoder.has_pending() {
                    debug!("event stream ended with an undispatched frame");
                }
                if !token.is_cancelled() {
                    debug!(delivered, "event stream closed");
                    handler(StreamMessage::Closed);
                }
                return;
            }
        };

        let frames = match decoder.feed(&bytes) {
            Ok(frames) => frames,
            Err(e) => {
                if !token.is_cancelled() {
                    handler(StreamMessage::Failed(e));
                }
                return;
            }
        };

        for frame in frames {
            if token.is_cancelled() {
                return;
            }
            match WorkflowEvent::decode(&frame) {
                Ok(Some(event)) => {
                    delivered += 1;
                    handler(StreamMessage::Event(event));
                }
                Ok(None) => debug!(event = %frame.event, "skipping unknown event"),
                Err(e) => {
                    handler(StreamMessage::Failed(e));
                    return;
                }
            }
        }
    }
}
