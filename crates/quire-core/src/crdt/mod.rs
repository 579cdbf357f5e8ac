//! Merge primitives: LWW register, RGA list, and the block tree built on it.

pub mod lww;
pub mod rga;
pub mod tree;

pub use lww::Lww;
pub use rga::{ElemIdx, Rga};
pub use tree::{BlockPosition, BlockTree, Position, TreeItem, TreeIter};
