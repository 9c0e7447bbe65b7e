use thiserror::Error;

/// Failures surfaced by the chain store, the verifier and the tail query.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The append was refused before anything was published.
    #[error("append rejected: {reason}")]
    AppendRejected { reason: String },

    /// Linkage or hash check failed; `at` is the first untrusted index.
    #[error("chain corrupted at block {at}")]
    ChainCorrupted { at: u64 },

    /// Transient condition, safe to retry.
    #[error("query unavailable: {reason}")]
    QueryUnavailable { reason: String },

    #[error("chain store is already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::AppendRejected {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::QueryUnavailable {
            reason: reason.into(),
        }
    }

    /// Index of the first corrupted block, if this is a corruption error.
    pub fn corrupted_at(&self) -> Option<u64> {
        match self {
            Self::ChainCorrupted { at } => Some(*at),
            _ => None,
        }
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
