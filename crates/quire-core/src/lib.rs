//! quire-core library.
//!
//! Merge engine for peer-replicated block documents. Every edit is a
//! datom stamped with an [`OpId`]; datoms travel inside signed
//! [`SignedChange`]s that form a per-object DAG, and a [`Document`] is the
//! deterministic fold of all datoms reachable from a [`Version`].
//!
//! # Conventions
//!
//! - **Errors**: library code returns [`Result`] with the crate [`Error`];
//!   config loading uses `anyhow::Result`.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod change;
pub mod config;
pub mod crdt;
pub mod document;
pub mod error;
pub mod model;
pub mod store;
pub mod version;

pub use change::{Cid, SignedChange};
pub use config::EngineConfig;
pub use document::{Document, Projection};
pub use error::{Error, ErrorCode, ObjectKind, Result};
pub use model::{Datom, NodeId, OpId, OpOrder};
pub use store::{MemoryStore, ReceiveOutcome, Replica};
pub use version::Version;
