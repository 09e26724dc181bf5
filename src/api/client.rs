use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::debug;

use super::error::ApiError;
use super::types::{
    AnswerRequest, ErrorBody, RefineRequest, RefineResponse, StartRequest, TestRequest,
    TestResponse,
};

/// Where the service listens when nothing else is configured.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// Raw body chunks of a streaming response, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// Which streaming turn to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    /// Begin a new workflow from free-text input.
    Start { user_input: String },
    /// Continue an existing workflow with an answer.
    Continue { thread_id: String, answer: String },
}

impl StreamRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamRequest::Start { .. } => "start",
            StreamRequest::Continue { .. } => "continue",
        }
    }
}

/// The remote service as seen by the workflow engine.
///
/// `ArenaClient` is the HTTP implementation; tests substitute in-memory fakes.
pub trait WorkflowBackend: Send + Sync + 'static {
    /// Open a streaming turn and hand back its body as a byte stream.
    fn open_stream(
        &self,
        request: StreamRequest,
    ) -> impl Future<Output = Result<ByteStream, ApiError>> + Send;

    /// Run a prompt against a test input.
    fn execute_test(
        &self,
        request: &TestRequest,
    ) -> impl Future<Output = Result<TestResponse, ApiError>> + Send;

    /// Ask the server to refine one variant of the given workflow.
    fn refine_variant(
        &self,
        thread_id: &str,
        request: &RefineRequest,
    ) -> impl Future<Output = Result<RefineResponse, ApiError>> + Send;
}

pub struct ArenaClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl ArenaClient {
    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(base_url: String) -> Result<Self, ApiError> {
        Self::with_timeouts(base_url, Duration::from_secs(10), Duration::from_secs(120))
    }

    /// Streaming calls are long-lived, so the client itself carries only a
    /// connect timeout and `request_timeout` is applied per request-style call.
    pub fn with_timeouts(
        base_url: String,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn stream_url(&self, request: &StreamRequest) -> String {
        match request {
            StreamRequest::Start { .. } => format!("{}/workflow/stream/start", self.base_url),
            StreamRequest::Continue { thread_id, .. } => {
                format!("{}/workflow/stream/{thread_id}/answer", self.base_url)
            }
        }
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(ApiError::from_send)?;

        let response = check_status(response).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))
    }
}

impl WorkflowBackend for ArenaClient {
    async fn open_stream(&self, request: StreamRequest) -> Result<ByteStream, ApiError> {
        let url = self.stream_url(&request);
        debug!(kind = request.kind(), %url, "opening event stream");

        let builder = self
            .client
            .post(&url)
            .header("accept", "text/event-stream");
        let builder = match &request {
            StreamRequest::Start { user_input } => builder.json(&StartRequest {
                user_input: user_input.clone(),
            }),
            StreamRequest::Continue { answer, .. } => builder.json(&AnswerRequest {
                answer: answer.clone(),
            }),
        };

        let response = builder.send().await.map_err(ApiError::from_send)?;
        let response = check_status(response).await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::from));
        Ok(body.boxed())
    }

    async fn execute_test(&self, request: &TestRequest) -> Result<TestResponse, ApiError> {
        let url = format!("{}/workflow/test", self.base_url);
        self.post_json(&url, request).await
    }

    async fn refine_variant(
        &self,
        thread_id: &str,
        request: &RefineRequest,
    ) -> Result<RefineResponse, ApiError> {
        let url = format!("{}/workflow/{thread_id}/refine", self.base_url);
        self.post_json(&url, request).await
    }
}

/// Turn a non-2xx response into `ApiError::ApiError`, preferring the server's
/// `detail` field over the raw body.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.detail)
        .unwrap_or(body);

    Err(ApiError::ApiError {
        status: status.as_u16(),
        message,
    })
}
