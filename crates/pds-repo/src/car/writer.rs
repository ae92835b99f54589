//! CAR file writing utilities
//!
//! Provides functions for writing blocks to CAR (Content Addressable aRchive) files.

use crate::error::{RepoError, Result};
use crate::mst::tree::Mst;
use crate::retention::CommitLogEntry;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarWriter;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Write blocks to CAR file
///
/// Roots should contain commit CID(s).
/// Blocks are written in sorted CID order (BTreeMap) for determinism.
pub async fn write_car(
    path: impl AsRef<Path>,
    roots: Vec<IpldCid>,
    blocks: BTreeMap<IpldCid, Bytes>,
) -> Result<()> {
    let file = File::create(path).await.map_err(|e| RepoError::io(e))?;

    let header = iroh_car::CarHeader::new_v1(roots);
    let mut writer = CarWriter::new(header, file);

    for (cid, data) in blocks {
        writer
            .write(cid, data.as_ref())
            .await
            .map_err(|e| RepoError::car(e))?;
    }

    writer.finish().await.map_err(|e| RepoError::car(e))?;

    Ok(())
}

/// Write blocks to CAR bytes (in-memory)
///
/// Like `write_car()` but writes to a `Vec<u8>` instead of a file.
/// Useful for tests and proof generation.
pub async fn write_car_bytes(root: IpldCid, blocks: BTreeMap<IpldCid, Bytes>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let header = iroh_car::CarHeader::new_v1(vec![root]);
    let mut writer = CarWriter::new(header, &mut buffer);

    for (cid, data) in blocks {
        writer
            .write(cid, data.as_ref())
            .await
            .map_err(|e| RepoError::car(e))?;
    }

    writer.finish().await.map_err(|e| RepoError::car(e))?;

    buffer.flush().await.map_err(|e| RepoError::io(e))?;

    Ok(buffer)
}

/// Write MST + commit to CAR file
///
/// Streams blocks directly to CAR file:
/// - Commit block (from storage)
/// - All MST node blocks (from storage)
/// - All record blocks (from storage)
///
/// Uses streaming to avoid loading all blocks into memory.
pub async fn export_repo_car<S: BlockStore + Sync + 'static>(
    path: impl AsRef<Path>,
    commit_cid: IpldCid,
    mst: &Mst<S>,
) -> Result<()> {
    let file = File::create(path).await.map_err(|e| RepoError::io(e))?;
    export_repo_car_to(file, commit_cid, mst).await
}

/// Write MST + commit to any async sink
///
/// Same as [`export_repo_car`], but writes to any `AsyncWrite` destination
/// (a socket, an in-memory buffer, a pipe to an HTTP response body) instead
/// of a file path. Memory use stays bounded to a single block regardless of
/// repository size, since both the commit block and the MST walk stream
/// directly from `storage` into `sink`.
pub async fn export_repo_car_to<S, W>(sink: W, commit_cid: IpldCid, mst: &Mst<S>) -> Result<()>
where
    S: BlockStore + Sync + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin,
{
    let header = iroh_car::CarHeader::new_v1(vec![commit_cid]);
    let mut writer = CarWriter::new(header, sink);

    // Write commit block first
    let storage = mst.storage();
    let commit_data = storage
        .get(&commit_cid)
        .await?
        .ok_or_else(|| RepoError::not_found("commit", &commit_cid))?;

    writer
        .write(commit_cid, &commit_data)
        .await
        .map_err(|e| RepoError::car(e))?;

    // Stream MST and record blocks
    mst.write_blocks_to_car(&mut writer).await?;

    // Finish writing
    writer.finish().await.map_err(|e| RepoError::car(e))?;

    Ok(())
}

/// Build a merkle proof CAR for one record
///
/// Root is the commit CID. Blocks are the commit, every MST node along the
/// path to `collection/rkey`, and the record block itself if it exists -
/// exactly what [`crate::commit::proof::verify_proofs`] needs to check a
/// claim without trusting anything outside the CAR.
pub async fn record_proof<S: BlockStore + Sync + 'static>(
    path: impl AsRef<Path>,
    commit_cid: IpldCid,
    mst: &Mst<S>,
    collection: &str,
    rkey: &str,
) -> Result<()> {
    let file = File::create(path).await.map_err(|e| RepoError::io(e))?;
    record_proof_to(file, commit_cid, mst, collection, rkey).await
}

/// Same as [`record_proof`], but writes to any `AsyncWrite` destination
pub async fn record_proof_to<S, W>(
    sink: W,
    commit_cid: IpldCid,
    mst: &Mst<S>,
    collection: &str,
    rkey: &str,
) -> Result<()>
where
    S: BlockStore + Sync + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin,
{
    let header = iroh_car::CarHeader::new_v1(vec![commit_cid]);
    let mut writer = CarWriter::new(header, sink);

    let storage = mst.storage();
    let commit_bytes = storage
        .get(&commit_cid)
        .await?
        .ok_or_else(|| RepoError::not_found("commit", &commit_cid))?;
    writer
        .write(commit_cid, &commit_bytes)
        .await
        .map_err(|e| RepoError::car(e))?;

    let key = format!("{}/{}", collection, rkey);
    let path_cids = mst.cids_for_path(&key).await?;
    for cid in path_cids {
        if let Some(data) = storage.get(&cid).await? {
            writer.write(cid, &data).await.map_err(|e| RepoError::car(e))?;
        }
    }

    writer.finish().await.map_err(|e| RepoError::car(e))?;

    Ok(())
}

/// Build a CAR covering every commit in `log` with `from_seq <= seq <= to_seq`
///
/// Roots are those commits' CIDs, oldest first. Used to serve a firehose
/// backfill range (`com.atproto.sync.getRepo` since a cursor) without
/// re-walking the whole MST for each sequence number.
pub async fn commit_range<S: BlockStore + Sync + 'static>(
    path: impl AsRef<Path>,
    storage: &S,
    log: &[CommitLogEntry],
    from_seq: u64,
    to_seq: u64,
) -> Result<()> {
    let file = File::create(path).await.map_err(|e| RepoError::io(e))?;
    commit_range_to(file, storage, log, from_seq, to_seq).await
}

/// Same as [`commit_range`], but writes to any `AsyncWrite` destination
pub async fn commit_range_to<S, W>(
    sink: W,
    storage: &S,
    log: &[CommitLogEntry],
    from_seq: u64,
    to_seq: u64,
) -> Result<()>
where
    S: BlockStore + Sync + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin,
{
    let selected: Vec<IpldCid> = log
        .iter()
        .filter(|entry| entry.seq >= from_seq && entry.seq <= to_seq)
        .map(|entry| entry.cid)
        .collect();

    let header = iroh_car::CarHeader::new_v1(selected.clone());
    let mut writer = CarWriter::new(header, sink);

    for cid in selected {
        let data = storage
            .get(&cid)
            .await?
            .ok_or_else(|| RepoError::not_found("commit", &cid))?;
        writer.write(cid, &data).await.map_err(|e| RepoError::car(e))?;
    }

    writer.finish().await.map_err(|e| RepoError::car(e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DAG_CBOR_CID_CODEC;
    use crate::car::reader::read_car;
    use crate::mst::tree::Mst;
    use crate::storage::memory::MemoryBlockStore;
    use pds_common::types::crypto::SHA2_256;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn make_test_cid(value: u8) -> IpldCid {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(&[value]);
        let mh = multihash::Multihash::wrap(SHA2_256, &hash).unwrap();

        IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh)
    }

    #[tokio::test]
    async fn test_write_car_with_blocks() {
        let temp_file = NamedTempFile::new().unwrap();

        let cid1 = make_test_cid(1);
        let cid2 = make_test_cid(2);
        let data1 = Bytes::from_static(&[1, 2, 3]);
        let data2 = Bytes::from_static(&[4, 5, 6]);

        let mut blocks = BTreeMap::new();
        blocks.insert(cid1, data1.clone());
        blocks.insert(cid2, data2.clone());

        write_car(temp_file.path(), vec![cid1], blocks)
            .await
            .unwrap();

        // Read back and verify
        let read_blocks = read_car(temp_file.path()).await.unwrap();
        assert_eq!(read_blocks.len(), 2);
        assert_eq!(read_blocks.get(&cid1).unwrap(), &data1);
        assert_eq!(read_blocks.get(&cid2).unwrap(), &data2);
    }

    #[tokio::test]
    async fn test_export_mst_to_car() {
        let storage = Arc::new(MemoryBlockStore::new());
        let mst = Mst::new(storage.clone());

        // Persist record blocks to storage, deriving their CIDs from content
        let cid1 = storage.put(&[1, 1, 1]).await.unwrap();
        let cid2 = storage.put(&[2, 2, 2]).await.unwrap();

        let mst = mst.add("app.bsky.feed.post/abc123", cid1).await.unwrap();
        let mst = mst.add("app.bsky.feed.post/def456", cid2).await.unwrap();

        // Persist MST blocks to storage
        mst.persist().await.unwrap();

        // Create and persist commit block
        let commit_data = Bytes::from_static(&[99, 99, 99]);
        let commit_cid = storage.put(&commit_data).await.unwrap();

        let temp_file = NamedTempFile::new().unwrap();

        // Export to CAR
        export_repo_car(temp_file.path(), commit_cid, &mst)
            .await
            .unwrap();

        // Read back and verify
        let blocks = read_car(temp_file.path()).await.unwrap();

        // Should have commit + MST nodes + record blocks
        assert!(blocks.contains_key(&commit_cid));
        assert_eq!(blocks.get(&commit_cid).unwrap(), &commit_data);

        // Should have at least the root node
        let root_cid = mst.root().await.unwrap();
        assert!(blocks.contains_key(&root_cid));

        // Should have record blocks
        assert!(blocks.contains_key(&cid1));
        assert!(blocks.contains_key(&cid2));
    }
}
