//! CAR file reading utilities
//!
//! Provides functions for reading CAR (Content Addressable aRchive) files into memory
//! or streaming them for large repositories.

use crate::error::{RepoError, Result};
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarReader;
use n0_future::stream::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use tokio::fs::File;

/// Parsed CAR file data
#[derive(Debug, Clone)]
pub struct ParsedCar {
    /// The first root CID from the CAR header
    pub root: IpldCid,
    /// All blocks in the CAR file
    pub blocks: BTreeMap<IpldCid, Bytes>,
}

/// Read entire CAR file into memory
///
/// Returns BTreeMap of CID -> block data (sorted order for determinism).
/// For large CAR files, consider using `stream_car()` instead.
pub async fn read_car(path: impl AsRef<Path>) -> Result<BTreeMap<IpldCid, Bytes>> {
    let file = File::open(path).await.map_err(|e| RepoError::io(e))?;

    let reader = CarReader::new(file).await.map_err(|e| RepoError::car(e))?;

    let mut blocks = BTreeMap::new();
    let stream = reader.stream();
    n0_future::pin!(stream);

    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(|e| RepoError::car_parse(e))?;
        blocks.insert(cid, Bytes::from(data));
    }

    Ok(blocks)
}

/// Read CAR file header (roots only)
///
/// Useful for checking roots without loading all blocks.
pub async fn read_car_header(path: impl AsRef<Path>) -> Result<Vec<IpldCid>> {
    let file = File::open(path).await.map_err(|e| RepoError::io(e))?;

    let reader = CarReader::new(file).await.map_err(|e| RepoError::car(e))?;

    Ok(reader.header().roots().to_vec())
}

/// Parse CAR bytes into root and block map
///
/// For in-memory CAR data (e.g., from firehose commit messages, merkle proofs).
/// Returns the first root CID and all blocks.
pub async fn parse_car_bytes(data: &[u8]) -> Result<ParsedCar> {
    let reader = CarReader::new(data)
        .await
        .map_err(|e| RepoError::car_parse(e))?;

    let roots = reader.header().roots();
    let root = roots
        .first()
        .copied()
        .ok_or_else(|| RepoError::invalid("CAR file has no roots"))?;

    let mut blocks = BTreeMap::new();
    let stream = reader.stream();
    n0_future::pin!(stream);

    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(|e| RepoError::car_parse(e))?;
        blocks.insert(cid, Bytes::from(data));
    }

    Ok(ParsedCar { root, blocks })
}

/// Stream CAR blocks without loading entire file into memory
///
/// Useful for processing large CAR files incrementally.
pub async fn stream_car(path: impl AsRef<Path>) -> Result<CarBlockStream> {
    let file = File::open(path).await.map_err(|e| RepoError::io(e))?;

    let reader = CarReader::new(file).await.map_err(|e| RepoError::car(e))?;

    let roots = reader.header().roots().to_vec();
    let stream = Box::pin(reader.stream());

    Ok(CarBlockStream { stream, roots })
}

/// Streaming CAR block reader
///
/// Iterates through CAR blocks without loading entire file into memory.
pub struct CarBlockStream {
    stream: Pin<
        Box<dyn Stream<Item = std::result::Result<(IpldCid, Vec<u8>), iroh_car::Error>> + Send>,
    >,
    roots: Vec<IpldCid>,
}

impl CarBlockStream {
    /// Get next block from the stream
    ///
    /// Returns `None` when stream is exhausted.
    pub async fn next(&mut self) -> Result<Option<(IpldCid, Bytes)>> {
        match self.stream.next().await {
            Some(result) => {
                let (cid, data) = result.map_err(|e| RepoError::car_parse(e))?;
                Ok(Some((cid, Bytes::from(data))))
            }
            None => Ok(None),
        }
    }

    /// Get the CAR file roots
    pub fn roots(&self) -> &[IpldCid] {
        &self.roots
    }
}
