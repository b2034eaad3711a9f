//! Error taxonomy shared by sharing, distribution, orchestration and the tree.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range witness, share or tree input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Network failure or non-success response from a party or the proof service.
    #[error("transport error: {0}")]
    Transport(String),

    /// A party or the proof service reported failure, or answered with an
    /// unexpected payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("MPC proof generation timed out after {attempts} status polls")]
    Timeout { attempts: u32 },

    #[error("tree is full ({capacity} leaves)")]
    Capacity { capacity: usize },

    #[error("proof session cancelled")]
    Cancelled,

    #[error("hash engine error: {0}")]
    Hash(String),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
