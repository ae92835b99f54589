//! Record proof verification
//!
//! Verifies merkle proofs for individual record existence/non-existence.
//!
//! **Proof structure:**
//! - CAR file containing:
//!   - Commit block (with signature)
//!   - MST node blocks along the path to the record(s)
//!   - Record blocks (if proving existence)
//!
//! **Verification:**
//! 1. Parse CAR blocks into temporary storage
//! 2. Load and verify commit (signature + DID)
//! 3. Load MST using ONLY blocks from CAR
//! 4. For each claim, check if record exists/matches in MST
//!
//! This is distinct from firehose commit validation - proofs verify individual
//! records, not full repository commits.

use crate::BlockStore;
use crate::error::ProofError;
use crate::mst::Mst;
use crate::storage::MemoryBlockStore;
use cid::Cid as IpldCid;
use pds_common::types::string::Did;
use smol_str::format_smolstr;
use std::sync::Arc;

/// A claim about a record's CID at a specific path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordClaim<'a> {
    /// Collection NSID (e.g., "app.bsky.feed.post")
    pub collection: pds_common::CowStr<'a>,

    /// Record key (TID or other identifier)
    pub rkey: pds_common::CowStr<'a>,

    /// Expected CID of the record
    /// - Some(cid): claiming record exists with this CID
    /// - None: claiming record does not exist
    pub cid: Option<IpldCid>,
}

/// Result of proof verification
#[derive(Debug)]
pub struct VerifyProofsOutput<'a> {
    /// Claims that were successfully verified
    pub verified: Vec<RecordClaim<'a>>,

    /// Claims that failed verification
    pub unverified: Vec<RecordClaim<'a>>,
}

/// Verify record proofs from a CAR file
///
/// **Inputs:**
/// - `car_bytes`: CAR file containing commit + MST blocks + record blocks
/// - `claims`: Records to verify (existence or non-existence)
/// - `did`: Expected DID of the repository
/// - `pubkey`: Public key for signature verification
///
/// **Returns:**
/// - `verified`: Claims that match the MST state
/// - `unverified`: Claims that don't match
///
/// **Security:**
/// - Verifies commit signature using provided pubkey
/// - Verifies DID matches
/// - Uses ONLY blocks from CAR (merkle proof property)
///
/// # Example
///
/// ```rust,ignore
/// let claims = vec![
///     RecordClaim {
///         collection: "app.bsky.feed.post".into(),
///         rkey: "3l4qpz7ajrc2a".into(),
///         cid: Some(record_cid), // Claiming this record exists
///     },
///     RecordClaim {
///         collection: "app.bsky.feed.post".into(),
///         rkey: "nonexistent".into(),
///         cid: None, // Claiming this record doesn't exist
///     },
/// ];
///
/// let result = verify_proofs(car_bytes, claims, did, pubkey).await?;
/// assert_eq!(result.verified.len(), 2); // Both claims verified
/// ```
pub async fn verify_proofs<'a>(
    car_bytes: &[u8],
    claims: Vec<RecordClaim<'a>>,
    did: &Did<'_>,
    pubkey: &pds_common::types::crypto::PublicKey<'_>,
) -> Result<VerifyProofsOutput<'a>, ProofError> {
    // 1. Parse CAR file
    let parsed =
        crate::car::parse_car_bytes(car_bytes)
            .await
            .map_err(|e| ProofError::CarParseFailed {
                source: Box::new(e),
            })?;

    // 2. Create storage with ONLY blocks from CAR (merkle proof property)
    let storage = Arc::new(MemoryBlockStore::new_from_blocks(parsed.blocks));

    // 3. Load commit from CAR root
    let commit_cid = parsed.root;
    let commit_bytes = storage
        .get(&commit_cid)
        .await
        .map_err(|_| ProofError::CommitNotFound)?
        .ok_or(ProofError::CommitNotFound)?;

    let commit = super::Commit::from_cbor(&commit_bytes).map_err(|e| {
        ProofError::CommitDeserializeFailed {
            source: Box::new(e),
        }
    })?;

    // 4. Verify DID matches
    if commit.did().as_ref() != did.as_ref() {
        return Err(ProofError::DidMismatch {
            commit_did: commit.did().to_string(),
            expected_did: did.to_string(),
        }
        .into());
    }

    // 5. Verify signature
    // We need to extract the CommitError before it gets converted to RepoError
    if let Err(e) = commit.verify(pubkey) {
        return Err(ProofError::SignatureVerificationFailed { source: e }.into());
    }

    // 6. Load MST using ONLY blocks from CAR
    let mst = Mst::load(storage.clone(), *commit.data(), None);

    // 7. Verify each claim
    let mut verified = Vec::new();
    let mut unverified = Vec::new();

    for claim in claims {
        let key = format_smolstr!("{}/{}", claim.collection, claim.rkey);
        let found_cid = mst.get(&key).await.ok().flatten();

        match (&claim.cid, found_cid) {
            // Claiming record doesn't exist
            (None, None) => {
                // Correct: record doesn't exist
                verified.push(claim);
            }
            (None, Some(_)) => {
                // Incorrect: claimed doesn't exist but it does
                unverified.push(claim);
            }
            // Claiming record exists with specific CID
            (Some(claimed_cid), Some(found)) if claimed_cid == &found => {
                // Correct: CID matches
                verified.push(claim);
            }
            (Some(_), _) => {
                // Incorrect: CID mismatch or doesn't exist
                unverified.push(claim);
            }
        }
    }

    Ok(VerifyProofsOutput {
        verified,
        unverified,
    })
}
