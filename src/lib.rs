//! Client-side engine for a prompt-engineering service: a streamed,
//! multi-turn workflow store and a countdown retry controller.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod stream;
pub mod workflow;

pub use error::{ArenaError, Result};
