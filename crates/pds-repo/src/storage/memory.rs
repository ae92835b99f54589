//! In-memory block storage implementation

use crate::error::Result;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// In-memory block storage using BTreeMap
///
/// Useful for:
/// - Testing
/// - Temporary operations
/// - Small repositories that fit in memory
///
/// Uses `Bytes` for efficient reference-counted storage with cheap cloning.
///
/// # Example
///
/// ```rust,ignore
/// use pds_repo::storage::{BlockStore, MemoryBlockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryBlockStore::new();
///
/// let data = b"hello world";
/// let cid = storage.put(data).await?;
///
/// let retrieved = storage.get(&cid).await?;
/// assert_eq!(retrieved.as_deref(), Some(&data[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create new memory store from a map of blocks
    pub fn new_from_blocks(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    /// Get number of blocks stored
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.read().unwrap().is_empty()
    }

    /// Clear all blocks
    pub fn clear(&self) {
        self.blocks.write().unwrap().clear();
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.blocks.read().unwrap().get(cid).cloned())
    }

    async fn put_with_cid(&self, cid: IpldCid, data: Bytes) -> Result<()> {
        let computed = crate::mst::util::compute_cid(&data)?;
        if computed != cid {
            return Err(crate::error::RepoError::cid_mismatch(format!(
                "expected {}, computed {}",
                cid, computed
            )));
        }
        self.blocks.write().unwrap().insert(cid, data);
        Ok(())
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.blocks.read().unwrap().contains_key(cid))
    }

    async fn delete(&self, cid: &IpldCid) -> Result<()> {
        self.blocks.write().unwrap().remove(cid);
        Ok(())
    }

    async fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send) -> Result<()> {
        let mut store = self.blocks.write().unwrap();
        for (cid, data) in blocks {
            store.insert(cid, data);
        }
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let store = self.blocks.read().unwrap();
        let mut results = Vec::with_capacity(cids.len());
        for cid in cids {
            results.push(store.get(cid).cloned());
        }
        Ok(results)
    }

    async fn iter_cids(&self) -> Result<Vec<IpldCid>> {
        Ok(self.blocks.read().unwrap().keys().copied().collect())
    }

    async fn apply_commit(&self, commit: crate::repo::CommitData) -> Result<()> {
        let mut store = self.blocks.write().unwrap();

        for (cid, data) in commit.blocks {
            store.insert(cid, data);
        }

        for cid in commit.deleted_cids {
            store.remove(&cid);
        }

        Ok(())
    }
}
