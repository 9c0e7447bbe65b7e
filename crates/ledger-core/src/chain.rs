//! The authoritative, append-only chain.
//!
//! Appends are serialised by a writer mutex that covers "build, verify,
//! persist, publish". Published blocks live behind a read/write lock whose
//! write side is only taken to push an already sealed block, so readers never
//! wait behind a slow append or behind each other for longer than a push.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use tracing::{error, info, warn};

use crate::block::{genesis_block, unix_now, Block, Classification, Hash};
use crate::error::{LedgerError, Result};
use crate::verify;

/// Trait the persistence backends implement for the chain store.
/// This lives in `ledger-core` to avoid a circular dependency.
pub trait Storage: Send + Sync {
    fn put_block(&self, block: &Block) -> anyhow::Result<()>;
    /// Every stored block in index order.
    fn load_blocks(&self) -> anyhow::Result<Vec<Block>>;
    /// Index of the last stored block, `None` when empty.
    fn tip_height(&self) -> anyhow::Result<Option<u64>>;
    fn close(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Published {
    blocks: Vec<Arc<Block>>,
    corrupted_at: Option<u64>,
}

#[derive(Default)]
struct Writer {
    storage: Option<Arc<dyn Storage>>,
    request_ids: HashSet<String>,
}

/// Owned chain of classification blocks. Share it through `Arc`.
#[derive(Default)]
pub struct ChainStore {
    published: Arc<RwLock<Published>>,
    writer: Mutex<Writer>,
}

impl ChainStore {
    /// An empty, in-memory, uninitialised store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store over `storage`, restoring and verifying whatever it holds.
    ///
    /// An empty backend yields an uninitialised store. A backend whose chain
    /// fails verification still opens, but halted at the first bad index.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let blocks = storage.load_blocks()?;
        let tip = storage.tip_height()?;

        let mut corrupted_at = verify::verify_chain(&blocks)
            .err()
            .and_then(|e| e.corrupted_at());
        if let Some(tip) = tip {
            let expected = tip.saturating_add(1);
            if expected != blocks.len() as u64 {
                let at = expected.min(blocks.len() as u64);
                corrupted_at = Some(corrupted_at.map_or(at, |c| c.min(at)));
            }
        }

        match corrupted_at {
            Some(at) => error!(at, len = blocks.len(), "stored chain failed verification"),
            None => info!(len = blocks.len(), "chain restored from storage"),
        }

        let request_ids = blocks
            .iter()
            .filter(|b| !b.is_genesis())
            .map(|b| b.request_id.clone())
            .collect();
        let store = Self {
            published: Arc::new(RwLock::new(Published {
                blocks: blocks.into_iter().map(Arc::new).collect(),
                corrupted_at,
            })),
            writer: Mutex::new(Writer {
                storage: Some(storage),
                request_ids,
            }),
        };
        Ok(store)
    }

    /// Create and publish the genesis block. Allowed once per store.
    pub fn init(&self) -> Result<Arc<Block>> {
        let writer = self.lock_writer();
        if let Some(at) = self.corrupted_at() {
            return Err(LedgerError::ChainCorrupted { at });
        }
        if !self.read().blocks.is_empty() {
            return Err(LedgerError::AlreadyInitialized);
        }

        let genesis = genesis_block();
        if let Some(storage) = &writer.storage {
            storage.put_block(&genesis)?;
        }
        let genesis = Arc::new(genesis);
        self.publish(genesis.clone())?;
        info!(hash = %genesis.hash_hex(), "genesis block created");
        Ok(genesis)
    }

    /// Initialise the store unless it already holds a chain.
    pub fn ensure_genesis(&self) -> Result<()> {
        match self.init() {
            Ok(_) | Err(LedgerError::AlreadyInitialized) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Append a classification stamped with the current time.
    pub fn append(&self, classification: Classification) -> Result<Arc<Block>> {
        self.append_at(classification, unix_now())
    }

    /// Append a classification as if the clock read `now`. The block
    /// timestamp is `max(now, last.timestamp)`.
    pub fn append_at(&self, classification: Classification, now: u64) -> Result<Arc<Block>> {
        let mut writer = self.lock_writer();
        if let Some(at) = self.corrupted_at() {
            warn!(at, "append refused, chain is halted");
            return Err(LedgerError::ChainCorrupted { at });
        }
        let (tip_pos, last) = {
            let published = self.read();
            let last = published
                .blocks
                .last()
                .cloned()
                .ok_or_else(|| LedgerError::rejected("chain store is not initialized"))?;
            (published.blocks.len() as u64 - 1, last)
        };

        if let Err(e) = classification.validate() {
            warn!(request_id = %classification.request_id, error = %e, "append rejected");
            return Err(e);
        }
        if writer.request_ids.contains(&classification.request_id) {
            warn!(request_id = %classification.request_id, "duplicate request id");
            return Err(LedgerError::rejected(format!(
                "request_id {} is already on the chain",
                classification.request_id
            )));
        }

        let block = Block::seal(
            last.index + 1,
            now.max(last.timestamp),
            classification,
            last.hash,
        );
        let checked = verify::verify_block(&last, tip_pos)
            .and_then(|()| verify::verify_successor(&last, &block));
        if let Err(e) = checked {
            if let Some(at) = e.corrupted_at() {
                self.halt(at);
            }
            return Err(e);
        }

        if let Some(storage) = &writer.storage {
            if let Err(e) = storage.put_block(&block) {
                // A failed put may still have reached the backend; if so the
                // backend and the published chain disagree from this index on.
                let landed = match storage.tip_height() {
                    Ok(tip) => tip.is_some_and(|h| h >= block.index),
                    Err(_) => true,
                };
                if landed {
                    self.halt(block.index);
                }
                return Err(e.into());
            }
        }

        let block = Arc::new(block);
        if let Err(e) = self.publish(block.clone()) {
            warn!(index = block.index, "chain halted during append, block not published");
            return Err(e);
        }
        writer.request_ids.insert(block.request_id.clone());
        info!(
            index = block.index,
            plastic_type = %block.plastic_type,
            hash = %block.hash_hex(),
            "block appended"
        );
        Ok(block)
    }

    /// Point-in-time view of the chain.
    pub fn snapshot(&self) -> Snapshot {
        let published = self.read();
        Snapshot {
            chain: self.published.clone(),
            len: published.blocks.len(),
            corrupted_at: published.corrupted_at,
        }
    }

    /// Verify the whole chain as of now. A failure halts further appends but
    /// leaves already-published blocks readable through snapshots.
    pub fn audit(&self) -> Result<u64> {
        let snapshot = self.snapshot();
        if !snapshot.is_initialized() {
            return Err(LedgerError::unavailable("chain store is not initialized"));
        }
        match verify::verify_chain(&snapshot.blocks()) {
            Ok(()) => {
                let height = snapshot.len() as u64 - 1;
                info!(height, "chain audit passed");
                Ok(height)
            }
            Err(e) => {
                if let Some(at) = e.corrupted_at() {
                    self.halt(at);
                }
                Err(e)
            }
        }
    }

    /// First untrusted index once corruption has been detected.
    pub fn corrupted_at(&self) -> Option<u64> {
        self.read().corrupted_at
    }

    pub fn is_initialized(&self) -> bool {
        !self.read().blocks.is_empty()
    }

    /// Index and hash of the last block.
    pub fn tip(&self) -> Option<(u64, Hash)> {
        self.read().blocks.last().map(|b| (b.index, b.hash))
    }

    /// Flush and release the persistence backend, if any.
    pub fn close(&self) -> Result<()> {
        if let Some(storage) = &self.lock_writer().storage {
            storage.close()?;
        }
        Ok(())
    }

    fn halt(&self, at: u64) {
        let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
        let at = published.corrupted_at.map_or(at, |c| c.min(at));
        published.corrupted_at = Some(at);
        error!(at, "chain halted, appends refused until the store is repaired");
    }

    /// Push under the write guard, refusing if an audit halted the chain
    /// since the append started.
    fn publish(&self, block: Arc<Block>) -> Result<()> {
        let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(at) = published.corrupted_at {
            return Err(LedgerError::ChainCorrupted { at });
        }
        published.blocks.push(block);
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Test hook: hold the publish lock until `release` fires, so every
    /// reader blocks. `locked` fires once the lock is held.
    #[cfg(test)]
    pub(crate) fn block_readers(
        &self,
        locked: std::sync::mpsc::Sender<()>,
        release: std::sync::mpsc::Receiver<()>,
    ) {
        let _guard = self.published.write().unwrap();
        locked.send(()).unwrap();
        let _ = release.recv();
    }

    /// Test hook: replace a published block in place, bypassing every check.
    #[cfg(test)]
    pub(crate) fn tamper(&self, index: usize, f: impl FnOnce(&mut Block)) {
        let mut published = self.published.write().unwrap();
        let mut block = (*published.blocks[index]).clone();
        f(&mut block);
        published.blocks[index] = Arc::new(block);
    }
}

/// Immutable view of the first `len` published blocks. Published blocks are
/// never removed or replaced, so later appends cannot change what a snapshot
/// sees.
#[derive(Clone)]
pub struct Snapshot {
    chain: Arc<RwLock<Published>>,
    len: usize,
    corrupted_at: Option<u64>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A snapshot holds at least the genesis block once the store is initialised.
    pub fn is_initialized(&self) -> bool {
        self.len > 0
    }

    pub fn corrupted_at(&self) -> Option<u64> {
        self.corrupted_at
    }

    pub fn get(&self, index: u64) -> Option<Arc<Block>> {
        let pos = usize::try_from(index).ok().filter(|&p| p < self.len)?;
        self.read().blocks.get(pos).cloned()
    }

    pub fn last(&self) -> Option<Arc<Block>> {
        let pos = self.len.checked_sub(1)?;
        self.read().blocks.get(pos).cloned()
    }

    /// Blocks at positions `range`, clipped to the snapshot, in index order.
    /// Taken under a single read guard.
    pub fn range(&self, range: Range<usize>) -> Vec<Arc<Block>> {
        let end = range.end.min(self.len);
        let start = range.start.min(end);
        self.read().blocks[start..end].to_vec()
    }

    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.range(0..self.len)
    }

    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }
}
