use crate::chain::LevelState;
use serde::Serialize;
use thiserror::Error;

/// Synchronous rejections from the selection chain. These are returned to the
/// caller and never stored on a level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("unknown level index {index} (chain has {len} levels)")]
    UnknownLevel { index: usize, len: usize },

    #[error("value {value:?} is not an option of level {level}")]
    InvalidSelection { level: String, value: String },

    #[error("level {level} has no parent value to fetch with")]
    MissingParent { level: String },

    #[error("level {level} is {state:?}; only errored or empty levels can be retried")]
    NotRetryable { level: String, state: LevelState },
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::UnknownLevel { .. } => "bad_params",
            ChainError::InvalidSelection { .. } => "invalid_selection",
            ChainError::MissingParent { .. } => "missing_parent",
            ChainError::NotRetryable { .. } => "not_retryable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchErrorKind {
    /// The option or report service reported a failure.
    Source,
    /// No resolution arrived within the configured timeout.
    Timeout,
}

/// A failed option/report fetch. Stored as data on the level that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub code: String,
    pub message: String,
}

impl FetchError {
    pub fn source(code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Source,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(waited_ms: u128) -> Self {
        Self {
            kind: FetchErrorKind::Timeout,
            code: "fetch_timeout".to_string(),
            message: format!("no response after {}ms", waited_ms),
        }
    }
}

impl From<rusqlite::Error> for FetchError {
    fn from(e: rusqlite::Error) -> Self {
        FetchError::source("db_query_failed", e.to_string())
    }
}
