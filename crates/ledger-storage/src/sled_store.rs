use anyhow::{bail, Context, Result};
use ledger_core::{Block, Hash, Storage};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info, warn};

const TREE_BLOCKS: &str = "blocks";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";

/// Blocks live in the `blocks` tree keyed by big-endian index, so iteration
/// order is chain order. Tip metadata sits in the default tree and is written
/// in the same transaction as the block.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled at {}", path.display()))?;
    let blocks = db.open_tree(TREE_BLOCKS).context("opening blocks tree")?;
    info!(path = %path.display(), blocks = blocks.len(), "sled store opened");
    Ok(Self { db, blocks })
  }

  /// Hash of the last stored block.
  pub fn tip_hash(&self) -> Result<Option<Hash>> {
    match self.db.get(KEY_TIP_HASH)? {
      Some(v) => {
        let arr: Hash = v.as_ref().try_into().context("tip hash has the wrong length")?;
        Ok(Some(arr))
      }
      None => Ok(None),
    }
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }
}

impl Storage for SledStore {
  fn put_block(&self, block: &Block) -> Result<()> {
    let key = block.index.to_be_bytes();
    let bytes = bincode::serialize(block).context("encoding block")?;
    let meta: &Tree = &self.db;

    let result = (&self.blocks, meta).transaction(|(blocks, meta)| {
      // Re-putting the exact same block is a no-op; anything else at that
      // index is an overwrite.
      if let Some(existing) = blocks.get(&key[..])? {
        if existing.as_ref() == &bytes[..] {
          return Ok(());
        }
        return Err(ConflictableTransactionError::Abort(format!(
          "block {} is already stored",
          block.index
        )));
      }
      blocks.insert(&key[..], &bytes[..])?;
      meta.insert(KEY_TIP_HEIGHT, &key[..])?;
      meta.insert(KEY_TIP_HASH, &block.hash[..])?;
      Ok(())
    });
    match result {
      Ok(()) => {}
      Err(TransactionError::Abort(reason)) => bail!(reason),
      Err(TransactionError::Storage(e)) => return Err(e).context("writing block"),
    }

    // The transaction is committed and visible; a failed flush only delays
    // durability to sled's background flush.
    if let Err(e) = self.db.flush() {
      warn!(index = block.index, error = %e, "block committed but flush failed");
      return Ok(());
    }
    debug!(index = block.index, "block persisted");
    Ok(())
  }

  /// Stops at the first entry that does not decode; the chain store's tip
  /// cross-check then reports the gap as corruption.
  fn load_blocks(&self) -> Result<Vec<Block>> {
    let mut out = Vec::with_capacity(self.blocks.len());
    for entry in self.blocks.iter() {
      let (key, value) = entry?;
      match bincode::deserialize::<Block>(&value) {
        Ok(block) => out.push(block),
        Err(e) => {
          warn!(key = ?key, error = %e, "undecodable block, stopping load");
          break;
        }
      }
    }
    Ok(out)
  }

  fn tip_height(&self) -> Result<Option<u64>> {
    match self.db.get(KEY_TIP_HEIGHT)? {
      Some(v) => {
        let arr: [u8; 8] = v.as_ref().try_into().context("tip height has the wrong length")?;
        Ok(Some(u64::from_be_bytes(arr)))
      }
      None => Ok(None),
    }
  }

  fn close(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}
