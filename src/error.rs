use thiserror::Error;

use crate::api::ApiError;
use crate::stream::StreamError;

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("Event stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T, E = ArenaError> = std::result::Result<T, E>;
