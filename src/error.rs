use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Error when fetching movies")]
    Transport,
    #[error("{0}")]
    Domain(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Request(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Request(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}
