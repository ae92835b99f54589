//! Merkle Search Tree implementation

pub mod cursor;
pub mod node;
pub mod record_op;
pub mod tree;
pub mod util;
pub mod diff;

pub use cursor::{CursorPosition, LeafWalker, MstCursor};
pub use node::{NodeData, NodeEntry, TreeEntry};
pub use record_op::{RecordData, RecordWriteOp};
pub use tree::{Mst, WriteOp};
pub use diff::MstDiff;
