//! Error taxonomy shared by the ledger core and its HTTP host.

use std::path::PathBuf;

use thiserror::Error;

/// Chain linkage and integrity failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The candidate was not built against the current tip.
    #[error(
        "linkage mismatch: expected index {expected_index} on top of {expected_previous}, \
         got index {got_index} on top of {got_previous}"
    )]
    LinkageMismatch {
        expected_index: u64,
        got_index: u64,
        expected_previous: String,
        got_previous: String,
    },

    /// A stored block no longer matches its own hash or its predecessor.
    #[error("tamper detected at block {index}: {reason}")]
    TamperDetected { index: u64, reason: String },
}

/// Failures of the durable block store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A different block is already stored under this index.
    #[error("block {index} already stored with different content")]
    Conflict { index: u64 },

    #[error("corrupt block record {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// Errors surfaced by [`crate::service::EvidenceService`].
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Nonce search exhausted its ceiling without meeting the difficulty.
    #[error("sealing gave up after {max_nonce} nonces")]
    SealTimeout { max_nonce: u64 },

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl EvidenceError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EvidenceError::InvalidInput(msg.into())
    }
}
