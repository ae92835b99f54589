//! Retention, GC, and pruning (§4.9)
//!
//! Two independent policies, both parameterised by `keep` (default
//! [`DEFAULT_KEEP`] commits):
//!
//! 1. Commit-log pruning: drop rows older than the (`keep`+1)th most recent.
//! 2. Blockstore GC: delete every block not reachable from the retained commits.
//!
//! Both are idempotent, safe to re-run, and never touch the current repo head.

use crate::commit::Commit;
use crate::error::Result;
use crate::mst::Mst;
use crate::storage::BlockStore;
use cid::Cid as IpldCid;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Default number of most-recent commits retained by both GC policies.
pub const DEFAULT_KEEP: usize = 10_000;

/// One row of the append-only commit log, in ascending `seq` order.
#[derive(Debug, Clone)]
pub struct CommitLogEntry {
    /// Sequence number assigned by the firehose sequencer
    pub seq: u64,
    /// Commit block CID
    pub cid: IpldCid,
}

/// Outcome of a [`RetentionPolicy::gc_blockstore`] sweep.
#[derive(Debug, Clone)]
pub struct GcReport {
    /// Number of distinct CIDs in the computed referenced set
    pub retained_blocks: usize,
    /// Blocks that were deleted because nothing retained referenced them
    pub deleted_blocks: Vec<IpldCid>,
}

/// A commit-log and blockstore retention policy parameterised by `keep`.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    keep: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep: DEFAULT_KEEP }
    }
}

impl RetentionPolicy {
    /// Build a policy retaining the latest `keep` commits
    pub fn new(keep: usize) -> Self {
        Self { keep }
    }

    /// `seq` values to delete from the commit log
    ///
    /// `log` must be ascending by `seq`. No-op (returns empty) when `log` has
    /// `keep` or fewer rows.
    pub fn prune_commit_log(&self, log: &[CommitLogEntry]) -> Vec<u64> {
        if log.len() <= self.keep {
            return Vec::new();
        }
        let cutoff = log.len() - self.keep;
        log[..cutoff].iter().map(|entry| entry.seq).collect()
    }

    /// Sweep `storage` for blocks unreferenced by the latest `keep` commits
    ///
    /// The referenced set is the union, over the retained commits, of: the
    /// commit block itself, its `prev` CID, its MST root, every MST node
    /// reachable from that root, and every record CID referenced by those
    /// MSTs. `log` must be ascending by `seq`.
    pub async fn gc_blockstore<S: BlockStore + Sync + 'static>(
        &self,
        storage: Arc<S>,
        log: &[CommitLogEntry],
    ) -> Result<GcReport> {
        let retained = if log.len() <= self.keep {
            log
        } else {
            &log[log.len() - self.keep..]
        };

        let mut referenced = BTreeSet::new();
        for entry in retained {
            referenced.insert(entry.cid);

            let Some(commit_bytes) = storage.get(&entry.cid).await? else {
                continue;
            };
            let commit = Commit::from_cbor(&commit_bytes)?;
            if let Some(prev) = commit.prev() {
                referenced.insert(*prev);
            }

            let mst = Mst::load(storage.clone(), *commit.data(), None);
            mst.reachable_cids(&mut referenced).await?;
        }

        let mut deleted_blocks = Vec::new();
        for cid in storage.iter_cids().await? {
            if !referenced.contains(&cid) {
                storage.delete(&cid).await?;
                deleted_blocks.push(cid);
            }
        }

        Ok(GcReport {
            retained_blocks: referenced.len(),
            deleted_blocks,
        })
    }
}
