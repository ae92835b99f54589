//! Batch write operations carrying record payloads
//!
//! Unlike [`WriteOp`](super::WriteOp), which operates purely on already-hashed
//! record CIDs, these operations carry the record value itself so that
//! [`Repository::create_commit`](crate::repo::Repository::create_commit) can
//! serialize it, store the resulting block, and fold the CID into the tree
//! in one pass.

use ipld_core::ipld::Ipld;
use pds_common::types::recordkey::{RecordKey, Rkey};
use pds_common::types::string::Nsid;
use smol_str::SmolStr;
use std::collections::BTreeMap;

use cid::Cid as IpldCid;

/// A record value, modeled as an opaque DAG-CBOR document.
///
/// Keeping this record-shape-agnostic means the repository engine never
/// needs to know about lexicon schemas; it only needs to serialize and hash
/// whatever map of fields the caller hands it.
pub type RecordData = BTreeMap<SmolStr, Ipld>;

/// A single write operation, carrying the record data to apply during
/// [`Repository::create_commit`](crate::repo::Repository::create_commit).
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWriteOp<'a> {
    /// Create a new record (error if the key already exists)
    Create {
        /// Target collection
        collection: Nsid<'a>,
        /// Target record key
        rkey: RecordKey<Rkey<'a>>,
        /// Record value
        record: RecordData,
    },

    /// Update an existing record (error if the key does not exist)
    Update {
        /// Target collection
        collection: Nsid<'a>,
        /// Target record key
        rkey: RecordKey<Rkey<'a>>,
        /// New record value
        record: RecordData,
        /// Expected current CID, for optimistic concurrency (optional in v3)
        prev: Option<IpldCid>,
    },

    /// Delete an existing record (error if the key does not exist)
    Delete {
        /// Target collection
        collection: Nsid<'a>,
        /// Target record key
        rkey: RecordKey<Rkey<'a>>,
        /// Expected current CID, for optimistic concurrency (optional in v3)
        prev: Option<IpldCid>,
    },
}

impl<'a> RecordWriteOp<'a> {
    /// The collection this operation targets
    pub fn collection(&self) -> &Nsid<'a> {
        match self {
            RecordWriteOp::Create { collection, .. }
            | RecordWriteOp::Update { collection, .. }
            | RecordWriteOp::Delete { collection, .. } => collection,
        }
    }

    /// The record key this operation targets
    pub fn rkey(&self) -> &RecordKey<Rkey<'a>> {
        match self {
            RecordWriteOp::Create { rkey, .. }
            | RecordWriteOp::Update { rkey, .. }
            | RecordWriteOp::Delete { rkey, .. } => rkey,
        }
    }
}
