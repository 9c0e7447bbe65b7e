use std::sync::Arc;

use crate::block::Block;
use crate::chain::{ChainStore, Snapshot};
use crate::error::{LedgerError, Result};

/// The last `n` non-genesis blocks of `snapshot`, most recent first.
///
/// Positions in a snapshot are block indices, so genesis is position 0 and
/// the window never starts before position 1.
pub fn tail_window(snapshot: &Snapshot, n: usize) -> Vec<Arc<Block>> {
    let len = snapshot.len();
    let available = len.saturating_sub(1);
    let take = n.min(available);
    if take == 0 {
        return Vec::new();
    }
    let mut window = snapshot.range(len - take..len);
    window.reverse();
    window
}

/// Read side of the chain store: every answer comes from exactly one snapshot.
#[derive(Clone)]
pub struct TailQuery {
    store: Arc<ChainStore>,
}

impl TailQuery {
    pub fn new(store: Arc<ChainStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    /// Unchecked window over a fresh snapshot; an uninitialised store yields
    /// an empty window.
    pub fn tail_window(&self, n: usize) -> Vec<Arc<Block>> {
        tail_window(&self.store.snapshot(), n)
    }

    /// Window over a fresh snapshot, refusing stores that cannot be trusted
    /// or are not ready yet.
    pub fn checked_window(&self, n: usize) -> Result<Vec<Arc<Block>>> {
        let snapshot = self.store.snapshot();
        if let Some(at) = snapshot.corrupted_at() {
            return Err(LedgerError::ChainCorrupted { at });
        }
        if !snapshot.is_initialized() {
            return Err(LedgerError::unavailable("chain store is not initialized"));
        }
        Ok(tail_window(&snapshot, n))
    }
}
