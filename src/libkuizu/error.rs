use crate::libkuizu::engine::Phase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    FetchFailure(String),
    #[error("no questions were returned. Please try different settings.")]
    NoQuestions,
    #[error("invalid quiz settings: {0}")]
    Config(String),
    #[error("cannot {operation} while {phase:?}")]
    InvalidTransition {
        operation: &'static str,
        phase: Phase,
    },
    #[error("response for quiz #{generation} arrived after quiz #{current} started")]
    StaleResponse { generation: u64, current: u64 },
    #[error("question bank error: {0}")]
    Db(#[from] rusqlite::Error),
    #[cfg(feature = "opentdb")]
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error should be shown to the player. Stale responses are
    /// dropped without a trace on screen.
    pub fn is_surfaced(&self) -> bool {
        !matches!(self, Error::StaleResponse { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
