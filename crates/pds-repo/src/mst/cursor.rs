//! MST cursor for efficient tree traversal

use super::node::NodeEntry;
use super::tree::Mst;
use crate::error::Result;
use crate::storage::BlockStore;
use cid::Cid as IpldCid;
use smol_str::SmolStr;

#[cfg(debug_assertions)]
use std::collections::HashSet;
#[cfg(debug_assertions)]
use std::sync::{Arc, RwLock};

/// Position within an MST traversal
#[derive(Debug, Clone)]
pub enum CursorPosition<S: BlockStore> {
    /// Pointing at a leaf entry
    Leaf {
        /// Leaf key
        key: SmolStr,
        /// Leaf CID (record value)
        cid: IpldCid,
    },

    /// Pointing at a tree (subtree root)
    Tree {
        /// Subtree MST
        mst: Mst<S>,
    },

    /// Past the end of traversal
    End,
}

/// Cursor for navigating an MST in sorted order
///
/// Maintains a position in the tree and supports efficient navigation:
/// - `advance()`: Move to next item in sorted order
/// - `skip_subtree()`: Skip entire subtree at current position
/// - `current()`: Get current position without moving
///
/// # Example traversal
///
/// ```ignore
/// let mut cursor = MstCursor::new(tree);
///
/// while !cursor.is_end() {
///     match cursor.current() {
///         CursorPosition::Leaf { key, cid } => {
///             println!("Leaf: {} -> {}", key, cid);
///         }
///         CursorPosition::Tree { mst } => {
///             println!("Subtree at layer {}", mst.layer);
///         }
///         CursorPosition::End => break,
///     }
///     cursor.advance().await?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MstCursor<S: BlockStore> {
    /// Stack of (node, entries, index) pairs tracking path from root
    ///
    /// Each entry represents a level we've descended into:
    /// - `node`: The MST node at this level
    /// - `entries`: Cached entries for this node
    /// - `index`: Current position within entries
    path: Vec<(Mst<S>, Vec<NodeEntry<S>>, usize)>,

    /// Current position in traversal
    current: CursorPosition<S>,

    /// Track CIDs accessed during traversal (debug only)
    #[cfg(debug_assertions)]
    accessed_cids: Option<Arc<RwLock<HashSet<IpldCid>>>>,
}

impl<S: BlockStore + Sync + 'static> MstCursor<S> {
    /// Create new cursor at the start of a tree
    ///
    /// Initial position is the root of the tree (which is a Tree position).
    /// Call `advance()` to move to the first leaf.
    pub fn new(root: Mst<S>) -> Self {
        Self {
            path: Vec::new(),
            current: CursorPosition::Tree { mst: root },
            #[cfg(debug_assertions)]
            accessed_cids: None,
        }
    }

    /// Create new cursor with dirty tracking enabled
    ///
    /// Records all CIDs accessed during traversal in the provided set.
    #[cfg(debug_assertions)]
    pub fn new_with_tracking(root: Mst<S>, tracking: Arc<RwLock<HashSet<IpldCid>>>) -> Self {
        Self {
            path: Vec::new(),
            current: CursorPosition::Tree { mst: root },
            accessed_cids: Some(tracking),
        }
    }

    /// Get current position without advancing
    pub fn current(&self) -> &CursorPosition<S> {
        &self.current
    }

    /// Check if cursor is at end
    pub fn is_end(&self) -> bool {
        matches!(self.current, CursorPosition::End)
    }

    /// Get key at current position (if pointing at leaf)
    pub fn key(&self) -> Option<&str> {
        match &self.current {
            CursorPosition::Leaf { key, .. } => Some(key.as_str()),
            _ => None,
        }
    }

    /// Get the layer we're currently walking at
    ///
    /// Returns the layer of the node we're traversing within.
    /// If at the root level (before stepping in), returns root's layer + 1.
    pub async fn layer(&self) -> Result<usize> {
        if let Some((walking_node, _, _)) = self.path.last() {
            // Track CID access
            #[cfg(debug_assertions)]
            if let Some(ref tracking) = self.accessed_cids {
                if let Ok(cid) = walking_node.get_pointer().await {
                    tracking.write().unwrap().insert(cid);
                }
            }

            // We're inside a node - return its layer
            walking_node.get_layer().await
        } else {
            // At root level (not yet stepped in) - return root's layer + 1
            // This matches rsky's walker behavior: being "at" the root (before entering)
            // is one layer higher than being "inside" the root
            match &self.current {
                CursorPosition::Tree { mst } => {
                    // Track CID access
                    #[cfg(debug_assertions)]
                    if let Some(ref tracking) = self.accessed_cids {
                        if let Ok(cid) = mst.get_pointer().await {
                            tracking.write().unwrap().insert(cid);
                        }
                    }

                    let root_layer = mst.get_layer().await?;
                    Ok(root_layer + 1)
                }
                CursorPosition::End => Ok(0),
                CursorPosition::Leaf { .. } => {
                    // Shouldn't happen - root can't be a leaf
                    Ok(0)
                }
            }
        }
    }

    /// Advance to next position in sorted order
    ///
    /// - If at Leaf: move to next sibling or pop up
    /// - If at Tree: descend into it (step into first entry)
    /// - If at End: stay at End
    pub async fn advance(&mut self) -> Result<()> {
        match &self.current {
            CursorPosition::End => Ok(()),

            CursorPosition::Leaf { .. } => {
                // Move to next sibling
                self.step_over().await
            }

            CursorPosition::Tree { mst } => {
                // Descend into tree
                self.step_into(mst.clone()).await
            }
        }
    }

    /// Skip entire subtree at current position
    ///
    /// If pointing at a Tree, skips all its contents.
    /// If pointing at a Leaf, equivalent to `advance()`.
    pub async fn skip_subtree(&mut self) -> Result<()> {
        self.step_over().await
    }

    /// Move to next sibling or pop up
    fn step_over<'a>(
        &'a mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if let Some((_node, entries, index)) = self.path.last_mut() {
                // Try to move to next entry in current node
                *index += 1;

                if *index < entries.len() {
                    // Move to next entry
                    self.current = match &entries[*index] {
                        NodeEntry::Leaf { key, value } => CursorPosition::Leaf {
                            key: key.clone(),
                            cid: *value,
                        },
                        NodeEntry::Tree(tree) => CursorPosition::Tree { mst: tree.clone() },
                    };
                    Ok(())
                } else {
                    // No more entries at this level - pop up
                    self.path.pop();
                    self.step_over().await
                }
            } else {
                // No parent - we're done
                self.current = CursorPosition::End;
                Ok(())
            }
        })
    }

    /// Descend into a tree node
    async fn step_into(&mut self, mst: Mst<S>) -> Result<()> {
        // Track CID access
        #[cfg(debug_assertions)]
        if let Some(ref tracking) = self.accessed_cids {
            if let Ok(cid) = mst.get_pointer().await {
                tracking.write().unwrap().insert(cid);
            }
        }

        let entries = mst.get_entries().await?;

        if entries.is_empty() {
            // Empty tree - skip it
            self.step_over().await
        } else {
            // Push current level onto stack and move to first entry
            self.path.push((mst, entries.clone(), 0));

            self.current = match &entries[0] {
                NodeEntry::Leaf { key, value } => CursorPosition::Leaf {
                    key: key.clone(),
                    cid: *value,
                },
                NodeEntry::Tree(tree) => CursorPosition::Tree { mst: tree.clone() },
            };

            Ok(())
        }
    }
}

/// Lazy ascending leaf walk starting at (and including) a given key
///
/// Wraps an [`MstCursor`], skipping `Tree` positions and any leaf sorting
/// before `start_key`, and surfaces one leaf per `next()` call. Used to
/// implement `list_with_prefix` without materialising the whole tree.
pub struct LeafWalker<S: BlockStore> {
    cursor: MstCursor<S>,
    start_key: SmolStr,
}

impl<S: BlockStore + Sync + 'static> LeafWalker<S> {
    fn new(root: Mst<S>, start_key: SmolStr) -> Self {
        Self {
            cursor: MstCursor::new(root),
            start_key,
        }
    }

    /// Get the next leaf at or after `start_key`, or `None` once exhausted
    pub async fn next(&mut self) -> Result<Option<(SmolStr, IpldCid)>> {
        loop {
            self.cursor.advance().await?;
            match self.cursor.current() {
                CursorPosition::End => return Ok(None),
                CursorPosition::Tree { .. } => continue,
                CursorPosition::Leaf { key, cid } => {
                    if key.as_str() < self.start_key.as_str() {
                        continue;
                    }
                    return Ok(Some((key.clone(), *cid)));
                }
            }
        }
    }
}

impl<S: BlockStore + Sync + 'static> Mst<S> {
    /// Lazily walk leaves in ascending key order, starting at `start_key` (inclusive)
    pub fn walk_leaves_from(&self, start_key: &str) -> LeafWalker<S> {
        LeafWalker::new(self.clone(), SmolStr::new(start_key))
    }

    /// List leaves whose key starts with `prefix`, ascending key order, at most `limit` results
    ///
    /// Stops walking as soon as a key no longer starts with `prefix`, since
    /// entries sort ascending and nothing further in the tree can match.
    pub async fn list_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<(SmolStr, IpldCid)>> {
        let mut walker = self.walk_leaves_from(prefix);
        let mut results = Vec::new();

        while results.len() < limit {
            match walker.next().await? {
                Some((key, cid)) => {
                    if !key.as_str().starts_with(prefix) {
                        break;
                    }
                    results.push((key, cid));
                }
                None => break,
            }
        }

        Ok(results)
    }
}
