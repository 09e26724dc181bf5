pub mod client;
pub mod error;
pub mod types;

pub use client::{ArenaClient, ByteStream, DEFAULT_API_BASE, StreamRequest, WorkflowBackend};
pub use error::{ApiError, UNREACHABLE_DETAIL};
pub use types::{
    Evaluation, Evaluations, RefineRequest, RefineResponse, RefinedState, TestRequest,
    TestResponse, Variant,
};
