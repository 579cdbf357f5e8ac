//! Collaborators the engine consumes, plus in-memory implementations.
//!
//! The engine never talks to a disk or a network itself. Anything that
//! persists blobs, maps content ids to compact local ids, remembers named
//! versions, or indexes datoms sits behind one of the traits below.
//! [`MemoryStore`] implements all four for tests, the simulator, and the
//! CLI.
//!
//! [`load_document`] assembles a read-only [`Document`](crate::document::Document)
//! from a [`BlobStore`]; [`Replica`] bundles a store with a device identity
//! and is the unit the simulator drives.

pub mod load;
pub mod memory;
pub mod replica;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use load::{load_dag, load_document};
pub use memory::MemoryStore;
pub use replica::{ReceiveOutcome, Replica};

use crate::change::{Cid, PublicKey};
use crate::error::Result;
use crate::model::{Datom, NodeId, OpId};
use crate::version::Version;

/// Compact per-store id for a content id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Content-addressed blob storage.
pub trait BlobStore {
    /// Whether a blob is present.
    fn has(&self, id: &Cid) -> bool;

    /// Fetch a blob.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) if the blob is absent.
    fn get(&self, id: &Cid) -> Result<Vec<u8>>;

    /// Store a blob under its id. Storing the same id twice is a no-op.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn put(&mut self, id: Cid, bytes: Vec<u8>) -> Result<()>;
}

/// Mapping between content ids and local ids, plus change edges.
pub trait LocalIds {
    /// Local id for `cid`, allocating one on first use.
    fn ensure_local_id(&mut self, cid: &Cid) -> LocalId;

    /// Existing local id for `cid`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) if none was allocated.
    fn lookup_local_id(&self, cid: &Cid) -> Result<LocalId>;

    /// Content id behind a local id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) for unknown ids.
    fn resolve(&self, id: LocalId) -> Result<Cid>;

    /// Remember the parent edges of a change.
    fn record_change_edges(&mut self, change: &Cid, parents: &[Cid]);

    /// Parents recorded for a change.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) if no edges were recorded.
    fn change_parents(&self, change: &Cid) -> Result<Vec<Cid>>;
}

/// Named versions per (object, device).
pub trait VersionStore {
    /// Save `version` under `name`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save_version(&mut self, object: &Cid, device: &PublicKey, name: &str, version: &Version) -> Result<()>;

    /// Fetch a named version.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) if nothing is saved.
    fn get_version(&self, object: &Cid, device: &PublicKey, name: &str) -> Result<Version>;

    /// Forget a named version. Missing names are ignored.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn delete_version(&mut self, object: &Cid, device: &PublicKey, name: &str) -> Result<()>;
}

/// Secondary index of datoms by (object, entity, attribute).
pub trait DatomIndex {
    /// Index datoms of one object.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn put_datoms(&mut self, object: &Cid, datoms: &[Datom]) -> Result<()>;

    /// Drop every indexed datom whose op is in `ops`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn delete_ops(&mut self, object: &Cid, ops: &[OpId]) -> Result<()>;

    /// Datoms for `(entity, attribute)`, sorted by op.
    fn lookup(&self, object: &Cid, entity: NodeId, attribute: &str) -> Vec<Datom>;
}
