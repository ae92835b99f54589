//! Firehose sequencer
//!
//! Assigns a monotonic sequence number to each outgoing commit and fans it
//! out to connected subscribers over `com.atproto.sync.subscribeRepos`.
//!
//! A bounded ring buffer of the most recent frames lets a subscriber that
//! reconnects with a recent cursor resume without a full repo backfill. A
//! live [`tokio::sync::broadcast`] channel carries new frames to everyone
//! already connected; a subscriber that falls too far behind the broadcast
//! channel's own capacity receives an `#info` `FramesDropped` frame instead
//! of silently missing data, matching how the broadcast channel itself
//! reports lag.

use crate::commit::firehose::{FirehoseCommit, RepoOp};
use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use pds_common::types::cid::CidLink;
use pds_common::types::string::{Datetime, Did};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Default size of the replay ring buffer, in frames.
pub const DEFAULT_WINDOW: usize = 512;

/// A sequenced firehose commit, ready to broadcast or replay.
#[derive(Debug, Clone)]
pub struct SequencedFrame {
    /// Sequence number assigned to this commit.
    pub seq: u64,
    /// The commit message itself.
    pub commit: Arc<FirehoseCommit<'static>>,
}

/// The kind of an `#info` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    /// The subscriber's connection could not keep up with the live stream
    /// and some frames were skipped.
    FramesDropped,
    /// The subscriber's cursor is older than anything this sequencer has
    /// retained; it must perform a full repo sync instead of resuming.
    OutdatedCursor,
}

/// A frame delivered to a firehose subscriber.
#[derive(Debug, Clone)]
pub enum FirehoseFrame {
    /// A repository commit.
    Commit(Arc<FirehoseCommit<'static>>),
    /// An out-of-band informational frame.
    Info {
        /// Which condition this frame reports.
        kind: InfoKind,
        /// Human-readable detail.
        message: String,
    },
}

struct SequencerState {
    next_seq: u64,
    window: usize,
    backlog: VecDeque<SequencedFrame>,
}

/// Assigns sequence numbers and broadcasts commits to firehose subscribers.
pub struct Sequencer {
    state: Mutex<SequencerState>,
    tx: broadcast::Sender<SequencedFrame>,
    dropped_frames: Arc<AtomicU64>,
}

impl Sequencer {
    /// Create a sequencer that resumes from `next_seq` (the sequence number
    /// that will be assigned to the *next* commit), retaining up to `window`
    /// recent frames for replay.
    ///
    /// `next_seq` should be restored from wherever the server persists it;
    /// a freshly initialized PDS with no prior firehose history starts at 1.
    pub fn new(window: usize, next_seq: u64) -> Self {
        let (tx, _rx) = broadcast::channel(window.max(1));
        Self {
            state: Mutex::new(SequencerState {
                next_seq,
                window: window.max(1),
                backlog: VecDeque::with_capacity(window.max(1)),
            }),
            tx,
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a sequencer with [`DEFAULT_WINDOW`], resuming from `next_seq`.
    pub fn with_default_window(next_seq: u64) -> Self {
        Self::new(DEFAULT_WINDOW, next_seq)
    }

    /// The sequence number that will be assigned to the next commit.
    ///
    /// Callers that persist `next_seq` across restarts should read this
    /// after each [`sequence_commit`](Self::sequence_commit) call.
    pub fn next_seq(&self) -> u64 {
        self.state.lock().unwrap().next_seq
    }

    /// Total frames dropped across all subscribers due to slow consumption.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Assign the next sequence number to a commit, append it to the replay
    /// window, and broadcast it to any connected subscribers.
    ///
    /// Returns the assigned sequence number. A commit that fails to encode
    /// (e.g. the CAR export of its blocks) never consumes a sequence number.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self, commit_data, ops, blobs), fields(repo = %repo))
    )]
    pub async fn sequence_commit(
        &self,
        commit_data: &CommitData,
        repo: &Did<'_>,
        time: Datetime,
        ops: Vec<RepoOp<'static>>,
        blobs: Vec<CidLink<'static>>,
    ) -> Result<u64> {
        let seq = {
            let state = self.state.lock().unwrap();
            state.next_seq
        };

        let commit = commit_data
            .to_firehose_commit(repo, seq as i64, time, ops, blobs)
            .await?;
        let frame = SequencedFrame {
            seq,
            commit: Arc::new(commit),
        };

        {
            let mut state = self.state.lock().unwrap();
            state.next_seq = seq + 1;
            state.backlog.push_back(frame.clone());
            while state.backlog.len() > state.window {
                state.backlog.pop_front();
            }
        }

        // No subscribers is not an error; broadcast::send only fails when
        // the channel has zero receivers.
        let _ = self.tx.send(frame);

        #[cfg(feature = "tracing")]
        tracing::debug!(seq, "commit sequenced");

        Ok(seq)
    }

    /// Subscribe to the firehose starting after `cursor`, or from the live
    /// tail if `cursor` is `None`.
    ///
    /// Returns [`RepoErrorKind::FutureCursor`](crate::error::RepoErrorKind::FutureCursor)
    /// if `cursor` is ahead of any commit this sequencer has assigned. A
    /// cursor older than the retained window is not an error here: the
    /// returned subscription instead yields a single `OutdatedCursor` info
    /// frame and then ends, so the caller can fall back to a full repo sync.
    pub fn subscribe(&self, cursor: Option<u64>) -> Result<Subscription> {
        let live = self.tx.subscribe();
        let state = self.state.lock().unwrap();
        let head = state.next_seq;

        let Some(cursor) = cursor else {
            drop(state);
            return Ok(Subscription {
                backlog: VecDeque::new(),
                live,
                terminal: None,
                dropped_frames: self.dropped_frames.clone(),
            });
        };

        if cursor > head {
            return Err(RepoError::future_cursor(cursor, head.saturating_sub(1)));
        }

        let oldest = state.backlog.front().map(|f| f.seq);
        let replayable = match oldest {
            Some(oldest) => cursor + 1 >= oldest,
            // Nothing retained at all; only an already-caught-up cursor is fine.
            None => cursor == head,
        };

        if !replayable {
            drop(state);
            return Ok(Subscription {
                backlog: VecDeque::new(),
                live,
                terminal: Some(FirehoseFrame::Info {
                    kind: InfoKind::OutdatedCursor,
                    message: format!(
                        "cursor {} is older than the oldest retained sequence {}",
                        cursor,
                        oldest.unwrap_or(head)
                    ),
                }),
                dropped_frames: self.dropped_frames.clone(),
            });
        }

        let backlog = state
            .backlog
            .iter()
            .filter(|f| f.seq > cursor)
            .cloned()
            .collect();
        drop(state);

        Ok(Subscription {
            backlog,
            live,
            terminal: None,
            dropped_frames: self.dropped_frames.clone(),
        })
    }
}

/// A live, resumable firehose subscription.
///
/// Drains any replayed backlog frames first, then follows the live stream.
pub struct Subscription {
    backlog: VecDeque<SequencedFrame>,
    live: broadcast::Receiver<SequencedFrame>,
    terminal: Option<FirehoseFrame>,
    dropped_frames: Arc<AtomicU64>,
}

impl Subscription {
    /// Get the next frame, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<FirehoseFrame> {
        if let Some(frame) = self.backlog.pop_front() {
            return Some(FirehoseFrame::Commit(frame.commit));
        }

        if let Some(frame) = self.terminal.take() {
            return Some(frame);
        }

        loop {
            match self.live.recv().await {
                Ok(frame) => return Some(FirehoseFrame::Commit(frame.commit)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped_frames.fetch_add(n, Ordering::Relaxed);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(n, "subscriber lagged, frames dropped");
                    return Some(FirehoseFrame::Info {
                        kind: InfoKind::FramesDropped,
                        message: format!("{n} frames dropped, consumer fell behind"),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_commit_data() -> CommitData {
        let cid = crate::mst::util::compute_cid(b"commit").unwrap();
        CommitData {
            cid,
            rev: pds_common::types::tid::Tid::new("3l5yhcgz7y42y").unwrap(),
            since: None,
            prev: None,
            data: cid,
            prev_data: None,
            blocks: BTreeMap::new(),
            relevant_blocks: BTreeMap::new(),
            deleted_cids: Vec::new(),
        }
    }

    fn make_did() -> Did<'static> {
        Did::new_owned("did:plc:abc123").unwrap()
    }

    #[tokio::test]
    async fn test_sequence_commit_assigns_increasing_seq() {
        let sequencer = Sequencer::with_default_window(1);
        let commit_data = make_commit_data();
        let did = make_did();

        let seq1 = sequencer
            .sequence_commit(
                &commit_data,
                &did,
                Datetime::now(),
                Vec::new(),
                Vec::new(),
            )
            .await
            .unwrap();
        let seq2 = sequencer
            .sequence_commit(
                &commit_data,
                &did,
                Datetime::now(),
                Vec::new(),
                Vec::new(),
            )
            .await
            .unwrap();

        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
        assert_eq!(sequencer.next_seq(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_live_receives_new_commits() {
        let sequencer = Sequencer::with_default_window(1);
        let commit_data = make_commit_data();
        let did = make_did();

        let mut sub = sequencer.subscribe(None).unwrap();

        let seq = sequencer
            .sequence_commit(
                &commit_data,
                &did,
                Datetime::now(),
                Vec::new(),
                Vec::new(),
            )
            .await
            .unwrap();

        match sub.next().await.unwrap() {
            FirehoseFrame::Commit(commit) => assert_eq!(commit.seq, seq as i64),
            FirehoseFrame::Info { .. } => panic!("expected a commit frame"),
        }
    }

    #[tokio::test]
    async fn test_subscribe_replays_backlog_from_cursor() {
        let sequencer = Sequencer::with_default_window(1);
        let commit_data = make_commit_data();
        let did = make_did();

        for _ in 0..3 {
            sequencer
                .sequence_commit(
                    &commit_data,
                    &did,
                    Datetime::now(),
                    Vec::new(),
                    Vec::new(),
                )
                .await
                .unwrap();
        }

        // Resume after seq 1: should replay seq 2 and 3.
        let mut sub = sequencer.subscribe(Some(1)).unwrap();
        let mut seen = Vec::new();
        for _ in 0..2 {
            match sub.next().await.unwrap() {
                FirehoseFrame::Commit(commit) => seen.push(commit.seq),
                FirehoseFrame::Info { .. } => panic!("expected commit frames"),
            }
        }
        assert_eq!(seen, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_subscribe_future_cursor_is_rejected() {
        let sequencer = Sequencer::with_default_window(1);
        let err = sequencer.subscribe(Some(100)).unwrap_err();
        assert_eq!(*err.kind(), crate::error::RepoErrorKind::FutureCursor);
    }

    #[tokio::test]
    async fn test_subscribe_outdated_cursor_yields_info_then_ends() {
        // Tiny window so a handful of commits push the cursor out of range.
        let sequencer = Sequencer::new(1, 1);
        let commit_data = make_commit_data();
        let did = make_did();

        for _ in 0..3 {
            sequencer
                .sequence_commit(
                    &commit_data,
                    &did,
                    Datetime::now(),
                    Vec::new(),
                    Vec::new(),
                )
                .await
                .unwrap();
        }

        let mut sub = sequencer.subscribe(Some(1)).unwrap();
        match sub.next().await.unwrap() {
            FirehoseFrame::Info { kind, .. } => assert_eq!(kind, InfoKind::OutdatedCursor),
            FirehoseFrame::Commit(_) => panic!("expected an outdated-cursor info frame"),
        }
        assert!(sub.next().await.is_none());
    }
}
