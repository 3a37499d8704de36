use thiserror::Error;

use crate::database;
use crate::llm::LlmError;
use crate::platform::PlatformError;

/// Error surfaced by handlers to the dispatcher.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] database::Error),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("classifier error: {0}")]
    Llm(#[from] LlmError),
    #[error("callback of mode {mode} failed: {source}")]
    ModeCallback {
        mode: &'static str,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
