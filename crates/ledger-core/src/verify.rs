//! Chain integrity checks.
//!
//! A block is trusted when its stored hash matches a recomputation over its
//! fields and it links to its predecessor (hash, index and timestamp). The
//! own-hash check runs first so a tampered field is always reported at the
//! index of the block that carries it.

use rayon::prelude::*;
use std::borrow::Borrow;
use tracing::error;

use crate::block::{Block, ZERO_HASH};
use crate::constants::GENESIS_INDEX;
use crate::error::{LedgerError, Result};

/// Check that the stored hash of `block` matches its content.
pub fn verify_block(block: &Block, at: u64) -> Result<()> {
    if block.compute_hash() != block.hash {
        return Err(LedgerError::ChainCorrupted { at });
    }
    Ok(())
}

/// Check that `block` correctly follows `prev`.
pub fn verify_link(prev: &Block, block: &Block, at: u64) -> Result<()> {
    let linked = block.previous_hash == prev.hash
        && block.index == prev.index.wrapping_add(1)
        && block.timestamp >= prev.timestamp;
    if !linked {
        return Err(LedgerError::ChainCorrupted { at });
    }
    Ok(())
}

/// Verify `block` as the successor of `prev`; used inline before an append
/// is published.
pub fn verify_successor(prev: &Block, block: &Block) -> Result<()> {
    let at = prev.index.wrapping_add(1);
    verify_block(block, at)?;
    verify_link(prev, block, at)
}

/// Verify a full chain starting at genesis. Positions are indices, so the
/// reported index does not depend on the (possibly tampered) `index` field.
///
/// Hash recomputation is spread across the rayon pool; the result is still the
/// first failing position.
pub fn verify_chain<B>(blocks: &[B]) -> Result<()>
where
    B: Borrow<Block> + Sync,
{
    let first_bad = (0..blocks.len()).into_par_iter().find_first(|&pos| {
        let block = blocks[pos].borrow();
        let at = pos as u64;
        let linked = if pos == 0 {
            block.index == GENESIS_INDEX && block.previous_hash == ZERO_HASH
        } else {
            verify_link(blocks[pos - 1].borrow(), block, at).is_ok()
        };
        verify_block(block, at).is_err() || !linked
    });

    match first_bad {
        Some(pos) => {
            error!(at = pos, len = blocks.len(), "chain verification failed");
            Err(LedgerError::ChainCorrupted { at: pos as u64 })
        }
        None => Ok(()),
    }
}
