//! The operation pollers call. Wraps the tail query with a size cap, a
//! deadline and cancellation, and turns every internal failure into an
//! explicit [`PollError`] instead of a partial window.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::block::Block;
use crate::chain::ChainStore;
use crate::constants::{DEFAULT_POLL_TIMEOUT_MS, MAX_TAIL_SIZE};
use crate::error::LedgerError;
use crate::query::TailQuery;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Not ready yet; retry on the next tick.
    #[error("ledger unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("ledger corrupted at block {at}")]
    Corrupted { at: u64 },
    #[error("poll timed out after {0:?}")]
    TimedOut(Duration),
    #[error("poll cancelled")]
    Cancelled,
}

impl PollError {
    /// Whether a later poll may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Corrupted { .. })
    }
}

impl From<LedgerError> for PollError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ChainCorrupted { at } => Self::Corrupted { at },
            other => Self::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct PollGateway {
    query: TailQuery,
    max_window: usize,
    timeout: Duration,
}

impl PollGateway {
    pub fn new(store: Arc<ChainStore>) -> Self {
        Self {
            query: TailQuery::new(store),
            max_window: MAX_TAIL_SIZE,
            timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_window(mut self, max_window: usize) -> Self {
        self.max_window = max_window;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        self.query.store()
    }

    /// Synchronous poll with no deadline. `n` is capped at the gateway's
    /// maximum window.
    pub fn poll_now(&self, n: usize) -> Result<Vec<Arc<Block>>, PollError> {
        if n > self.max_window {
            debug!(requested = n, max = self.max_window, "poll window capped");
        }
        let n = n.min(self.max_window);
        let window = self.query.checked_window(n).inspect_err(|e| {
            warn!(error = %e, "poll failed");
        })?;
        debug!(requested = n, returned = window.len(), "poll served");
        Ok(window)
    }

    /// Poll bounded by the gateway timeout and the caller's cancellation token.
    pub async fn poll(
        &self,
        n: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Block>>, PollError> {
        let gateway = self.clone();
        let read = tokio::task::spawn_blocking(move || gateway.poll_now(n));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PollError::Cancelled),
            joined = tokio::time::timeout(self.timeout, read) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => Err(PollError::Unavailable { reason: join.to_string() }),
                Err(_) => Err(PollError::TimedOut(self.timeout)),
            },
        }
    }
}
