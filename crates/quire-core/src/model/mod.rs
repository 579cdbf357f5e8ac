//! Fact model: node ids, op ids, and datoms.

pub mod datom;
pub mod node_id;
pub mod op;

pub use datom::{Attribute, Datom, DatomFactory, Value, ValueType};
pub use node_id::{NODE_ID_SIZE, NodeId, NodeIdError, NodeIdGenerator};
pub use op::{ChangeKey, OpId, OpOrder, OpTracker, OrderError, Origin};
