//! Sidecar record table
//!
//! A denormalised `uri -> (cid, json)` index maintained alongside MST writes.
//! Gives O(1) record reads (`com.atproto.repo.getRecord`, `listRecords`)
//! without an MST traversal, mirroring the `record` storage table.
//!
//! Writes to this table and MST updates must stay consistent: if the MST
//! write succeeds the sidecar write must succeed too, and an aborted MST
//! write must leave the sidecar untouched. [`Repository::create_commit`](crate::repo::Repository::create_commit)
//! only calls into the sidecar after the MST mutation it mirrors has already
//! succeeded, so a sidecar write failure here surfaces before any block is
//! persisted.

use crate::error::Result;
use bytes::Bytes;
use cid::Cid as IpldCid;
use pds_common::types::string::Datetime;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// One row of the sidecar record table
#[derive(Debug, Clone)]
pub struct RecordRow {
    /// Owning repository DID
    pub did: String,
    /// CID of the record block in the block store
    pub cid: IpldCid,
    /// Deterministic-CBOR-decoded record, re-encoded as JSON for convenient reads
    pub json: Bytes,
    /// When this row was written
    pub created_at: Datetime,
}

/// Async sidecar record index, keyed by `at://did/collection/rkey`
///
/// Implementations might use an in-memory map ([`MemoryRecordStore`]), a SQL
/// table with secondary indices on `did` and `cid` (per §6.1), or any other
/// key-value store.
#[trait_variant::make(Send)]
pub trait RecordStore: Clone {
    /// Insert or overwrite the row at `uri`
    async fn put(&self, uri: &str, row: RecordRow) -> Result<()>;

    /// Look up the row at `uri`
    async fn get(&self, uri: &str) -> Result<Option<RecordRow>>;

    /// Remove the row at `uri`. Deleting an absent row is not an error.
    async fn delete(&self, uri: &str) -> Result<()>;

    /// List rows whose `uri` starts with `prefix`, ascending, up to `limit`
    ///
    /// Used for `at://did/collection/` prefix scans (`listRecords`).
    async fn list_with_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<(String, RecordRow)>>;
}

/// In-memory sidecar record store
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    rows: Arc<RwLock<BTreeMap<String, RecordRow>>>,
}

impl MemoryRecordStore {
    /// Create a new empty sidecar store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Whether the store holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    async fn put(&self, uri: &str, row: RecordRow) -> Result<()> {
        self.rows.write().unwrap().insert(uri.to_string(), row);
        Ok(())
    }

    async fn get(&self, uri: &str) -> Result<Option<RecordRow>> {
        Ok(self.rows.read().unwrap().get(uri).cloned())
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        self.rows.write().unwrap().remove(uri);
        Ok(())
    }

    async fn list_with_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<(String, RecordRow)>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(uri, _)| uri.starts_with(prefix))
            .take(limit)
            .map(|(uri, row)| (uri.clone(), row.clone()))
            .collect())
    }
}
