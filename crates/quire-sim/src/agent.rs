use anyhow::{Context, Result};
use quire_core::change::{AccountKey, DeviceKey};
use quire_core::config::{EngineConfig, IdConfig, OrderingConfig};
use quire_core::{Cid, Document, Error, MemoryStore, OpOrder, Projection, ReceiveOutcome, Replica, SignedChange, Version};
use serde::{Deserialize, Serialize};

use crate::clock::SimulatedClock;
use crate::rng::DeterministicRng;

/// Stable identifier for a simulated agent.
pub type AgentId = usize;

/// Block ids agents edit. Small on purpose so edits collide.
pub const BLOCK_POOL: [&str; 6] = ["head", "para", "list", "item", "code", "foot"];

/// Snapshot of one agent after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub version: Version,
    pub projection: Projection,
    /// Changes still waiting for parents.
    pub pending: usize,
    /// Whether every change in the DAG has all its ancestors present.
    pub causally_complete: bool,
}

/// Engine config used by every simulated replica.
#[must_use]
pub fn engine_config(seed: u64) -> EngineConfig {
    EngineConfig {
        ordering: OrderingConfig {
            policy: OpOrder::OriginTieBreak,
        },
        ids: IdConfig { seed: Some(seed) },
        ..EngineConfig::default()
    }
}

/// Fresh in-memory replica with keys drawn from `rng`.
pub fn replica_from_rng(rng: &mut DeterministicRng) -> Replica {
    let device = DeviceKey::from_bytes(&rng.key_bytes());
    let account = AccountKey::from_bytes(&rng.key_bytes());
    Replica::new(MemoryStore::new(), device, account, engine_config(rng.next_u64()))
}

/// One device: a replica plus its clock.
pub struct SimulatedAgent {
    id: AgentId,
    replica: Replica,
    clock: SimulatedClock,
    edits: u64,
}

impl SimulatedAgent {
    pub fn new(id: AgentId, rng: &mut DeterministicRng, clock: SimulatedClock) -> Self {
        Self {
            id,
            replica: replica_from_rng(rng),
            clock,
            edits: 0,
        }
    }

    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    #[must_use]
    pub const fn replica(&self) -> &Replica {
        &self.replica
    }

    pub const fn clock_mut(&mut self) -> &mut SimulatedClock {
        &mut self.clock
    }

    /// Create the shared document and return its permanode blob.
    pub fn create_document(&mut self, round: u64) -> Result<(Cid, Vec<u8>)> {
        let object = self
            .replica
            .create_document(self.clock.now_micros(round))
            .context("create document")?;
        let permanode = self.replica.permanode(&object)?;
        Ok((object, permanode))
    }

    pub fn join(&mut self, permanode: Vec<u8>) -> Result<Cid> {
        self.replica
            .receive_permanode(permanode)
            .with_context(|| format!("agent {} failed to join", self.id))
    }

    /// Apply one to three random edits and commit them.
    ///
    /// Returns `None` when every edit was a no-op or a rejected move.
    pub fn edit(&mut self, object: &Cid, round: u64, rng: &mut DeterministicRng) -> Result<Option<SignedChange>> {
        let mut doc = self
            .replica
            .open(object)
            .with_context(|| format!("agent {} failed to open {object}", self.id))?;
        let count = 1 + rng.next_bounded(3);
        for _ in 0..count {
            self.random_edit(&mut doc, rng)
                .with_context(|| format!("agent {} edit failed", self.id))?;
        }

        match self.replica.commit(&mut doc, self.clock.now_micros(round)) {
            Ok(change) => Ok(Some(change)),
            Err(Error::EmptyDraft) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("agent {} commit failed", self.id)),
        }
    }

    fn random_edit(&mut self, doc: &mut Document, rng: &mut DeterministicRng) -> quire_core::Result<()> {
        self.edits += 1;
        let pick = |rng: &mut DeterministicRng| BLOCK_POOL[rng.index(BLOCK_POOL.len())];
        let block = pick(rng);

        let result = match rng.next_bounded(10) {
            0 | 1 => doc.change_title(&format!("title {}.{}", self.id, self.edits)),
            2 => doc.change_subtitle(&format!("subtitle {}.{}", self.id, self.edits)),
            3 | 4 => doc.ensure_block_state(block, format!("{block} v{}.{}", self.id, self.edits).as_bytes()),
            5 => doc.delete_block(block).map(|_| ()),
            _ => {
                let parent = if rng.hit_rate_percent(50) { "" } else { pick(rng) };
                let left = if rng.hit_rate_percent(50) { "" } else { pick(rng) };
                doc.move_block(block, parent, left).map(|_| ())
            }
        };

        match result {
            Err(e) if e.is_recoverable() => Ok(()),
            other => other,
        }
    }

    pub fn receive(&mut self, bytes: Vec<u8>) -> Result<ReceiveOutcome> {
        self.replica
            .receive(bytes)
            .with_context(|| format!("agent {} rejected a change", self.id))
    }

    /// Every change this agent holds, in causal order.
    pub fn changes(&self, object: &Cid) -> Result<Vec<Vec<u8>>> {
        Ok(self.replica.changes(object)?)
    }

    pub fn snapshot(&self, object: &Cid) -> Result<AgentState> {
        let dag = self
            .replica
            .dag(object)
            .with_context(|| format!("agent {} does not know {object}", self.id))?;
        let causally_complete = dag
            .causal_order(&dag.heads())
            .is_ok_and(|order| order.len() == dag.len());
        Ok(AgentState {
            id: self.id,
            version: dag.version(),
            projection: self.replica.view(object)?.snapshot(),
            pending: self.replica.pending_len(),
            causally_complete,
        })
    }
}
