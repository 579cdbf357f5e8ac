//! quire-sim library.
//!
//! Deterministic multi-replica simulation. A seed fixes every key, clock,
//! edit, and network fault; agents edit one shared document through real
//! [`quire_core::Replica`]s and gossip change blobs over a lossy network.
//! After the last round the network heals and agents run a full exchange,
//! then [`oracle::ConvergenceOracle`] checks the result.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` with context naming the agent.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod agent;
pub mod campaign;
pub mod clock;
pub mod network;
pub mod oracle;
pub mod rng;

use anyhow::{Result, bail};
use quire_core::{Cid, ReceiveOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::{AgentId, AgentState, SimulatedAgent};
use crate::clock::ClockConfig;
use crate::network::{FaultConfig, NetworkMessage, SendOutcome, SimulatedNetwork};
use crate::oracle::{ConvergenceOracle, ConvergenceReport};
use crate::rng::DeterministicRng;

/// Parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Seed for every key, clock, edit, and fault decision.
    pub seed: u64,
    /// Number of replicas editing the shared document.
    pub agent_count: usize,
    /// Edit and delivery rounds before the network heals.
    pub rounds: u64,
    /// Peers each new change is sent to.
    pub fanout: usize,
    /// Chance per round and agent of making an edit.
    pub edit_percent: u8,
    /// Network fault injection.
    pub fault: FaultConfig,
    /// Per-agent clock skew and drift.
    pub clock: ClockConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            agent_count: 3,
            rounds: 24,
            fanout: 2,
            edit_percent: 40,
            fault: FaultConfig::default(),
            clock: ClockConfig::default(),
        }
    }
}

/// How a delivered change was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryKind {
    /// Inserted, releasing `unblocked` buffered changes.
    Applied { unblocked: usize },
    /// Held back waiting on `missing` ids.
    Buffered { missing: usize },
    /// Already known.
    Duplicate,
}

impl From<&ReceiveOutcome> for DeliveryKind {
    fn from(outcome: &ReceiveOutcome) -> Self {
        match outcome {
            ReceiveOutcome::Applied { unblocked, .. } => Self::Applied { unblocked: *unblocked },
            ReceiveOutcome::Buffered { missing, .. } => Self::Buffered { missing: missing.len() },
            ReceiveOutcome::Duplicate(_) => Self::Duplicate,
        }
    }
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventKind {
    /// `agent` created the shared document.
    Genesis { agent: AgentId, object: Cid },
    /// `agent` committed a local edit.
    Emit { agent: AgentId, change: Cid, lamport: u64 },
    /// A change was handed to the network.
    Send { from: AgentId, to: AgentId, change: Cid, outcome: SendOutcome },
    /// A change reached its destination replica.
    Deliver { to: AgentId, change: Cid, outcome: DeliveryKind },
    /// The messages ready this round were shuffled.
    Reorder { messages: usize },
    /// `agent` was cut off from, or rejoined, the network.
    Partition { agent: AgentId, isolated: bool },
    ClockFreeze { agent: AgentId },
    ClockThaw { agent: AgentId },
    /// All partitions lifted before settling.
    Heal,
    /// Full change-set exchange during settling.
    AntiEntropy { from: AgentId, to: AgentId, changes: usize },
}

/// A [`TraceEventKind`] stamped with its round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Id of the shared document.
    pub object: Cid,
    /// Permanode blob every agent joined with.
    pub permanode: Vec<u8>,
    /// Every change, in causal order, as held by agent 0.
    pub changes: Vec<Vec<u8>>,
    /// One snapshot per agent, by agent id.
    pub states: Vec<AgentState>,
    pub trace: Vec<TraceEvent>,
    pub convergence: ConvergenceReport,
    /// Whether a fault actually bit: a buffered change, a reordering, a
    /// dropped send, or a partition.
    pub interesting_state_reached: bool,
}

/// Drives one seeded run over a set of agents and a simulated network.
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    agents: Vec<SimulatedAgent>,
    network: SimulatedNetwork,
    thaw_at: Vec<Option<u64>>,
    trace: Vec<TraceEvent>,
    interesting: bool,
}

impl Simulator {
    /// Build the agents and network for `config`.
    ///
    /// # Errors
    ///
    /// Rejects configs without agents.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.agent_count == 0 {
            bail!("agent_count must be > 0");
        }
        let mut rng = DeterministicRng::new(config.seed);
        let agents = (0..config.agent_count)
            .map(|id| {
                let clock = config.clock.assign(&mut rng);
                let mut agent_rng = rng.fork(id as u64);
                SimulatedAgent::new(id, &mut agent_rng, clock)
            })
            .collect();
        Ok(Self {
            network: SimulatedNetwork::new(config.fault),
            thaw_at: vec![None; config.agent_count],
            config,
            rng,
            agents,
            trace: Vec::new(),
            interesting: false,
        })
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }

    /// Run every round, settle, and snapshot the agents.
    ///
    /// # Errors
    ///
    /// Any engine error. Valid runs never produce one.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let (object, permanode) = self.agents[0].create_document(0)?;
        self.record(0, TraceEventKind::Genesis { agent: 0, object });
        for agent in &mut self.agents[1..] {
            agent.join(permanode.clone())?;
        }

        for round in 1..=self.config.rounds {
            self.inject_faults(round);
            self.edit_round(&object, round)?;
            let ready = self.network.deliver_ready(round, &mut self.rng);
            if ready.reordered {
                self.interesting = true;
                self.record(round, TraceEventKind::Reorder {
                    messages: ready.delivered.len(),
                });
            }
            for message in ready.delivered {
                self.deliver(round, message)?;
            }
        }

        let settle = self.config.rounds + 1;
        self.settle(&object, settle)?;

        let states = self
            .agents
            .iter()
            .map(|a| a.snapshot(&object))
            .collect::<Result<Vec<_>>>()?;
        let changes = self.agents[0].changes(&object)?;
        let convergence = ConvergenceOracle::evaluate(&states);
        info!(
            seed = self.config.seed,
            changes = changes.len(),
            converged = convergence.converged,
            "simulation finished"
        );

        Ok(SimulationResult {
            object,
            permanode,
            changes,
            states,
            trace: std::mem::take(&mut self.trace),
            convergence,
            interesting_state_reached: self.interesting,
        })
    }

    fn inject_faults(&mut self, round: u64) {
        let n = self.agents.len();
        for agent in 0..n {
            if self.thaw_at[agent].is_some_and(|at| at <= round) {
                self.thaw_at[agent] = None;
                self.agents[agent].clock_mut().unfreeze();
                self.record(round, TraceEventKind::ClockThaw { agent });
            }
        }

        if self.rng.hit_rate_percent(self.config.fault.partition_rate_percent) {
            let agent = self.rng.index(n);
            let isolated = !self.network.is_partitioned(agent);
            self.network.set_partitioned(agent, isolated);
            self.interesting = true;
            self.record(round, TraceEventKind::Partition { agent, isolated });
        }

        if self.rng.hit_rate_percent(self.config.fault.freeze_rate_percent) {
            let agent = self.rng.index(n);
            if self.thaw_at[agent].is_none() {
                self.agents[agent].clock_mut().freeze(round);
                self.thaw_at[agent] = Some(round + u64::from(self.config.fault.freeze_duration_rounds));
                self.record(round, TraceEventKind::ClockFreeze { agent });
            }
        }
    }

    fn edit_round(&mut self, object: &Cid, round: u64) -> Result<()> {
        for from in 0..self.agents.len() {
            if !self.rng.hit_rate_percent(self.config.edit_percent) {
                continue;
            }
            let Some(change) = self.agents[from].edit(object, round, &mut self.rng)? else {
                continue;
            };
            let id = change.id();
            self.record(round, TraceEventKind::Emit {
                agent: from,
                change: id,
                lamport: change.change().lamport_time,
            });

            for to in self.pick_peers(from) {
                let message = NetworkMessage {
                    from,
                    to,
                    change: id,
                    bytes: change.bytes().to_vec(),
                };
                let outcome = self.network.send(message, round, &mut self.rng);
                if outcome.dropped {
                    self.interesting = true;
                }
                self.record(round, TraceEventKind::Send {
                    from,
                    to,
                    change: id,
                    outcome,
                });
            }
        }
        Ok(())
    }

    fn pick_peers(&mut self, from: AgentId) -> Vec<AgentId> {
        let mut peers: Vec<AgentId> = (0..self.agents.len()).filter(|&p| p != from).collect();
        self.rng.shuffle(&mut peers);
        peers.truncate(self.config.fanout);
        peers
    }

    fn deliver(&mut self, round: u64, message: NetworkMessage) -> Result<()> {
        let outcome = self.agents[message.to].receive(message.bytes)?;
        if matches!(outcome, ReceiveOutcome::Buffered { .. }) {
            self.interesting = true;
        }
        self.record(round, TraceEventKind::Deliver {
            to: message.to,
            change: message.change,
            outcome: DeliveryKind::from(&outcome),
        });
        Ok(())
    }

    /// Heal partitions, flush the network, then let every pair exchange
    /// their full change sets.
    fn settle(&mut self, object: &Cid, round: u64) -> Result<()> {
        self.network.heal();
        self.record(round, TraceEventKind::Heal);
        for message in self.network.drain() {
            self.deliver(round, message)?;
        }

        let n = self.agents.len();
        for to in 0..n {
            for from in 0..n {
                if from == to {
                    continue;
                }
                let changes = self.agents[from].changes(object)?;
                let count = changes.len();
                for bytes in changes {
                    self.agents[to].receive(bytes)?;
                }
                debug!(from, to, changes = count, "anti-entropy exchange");
                self.record(round, TraceEventKind::AntiEntropy { from, to, changes: count });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_agents_rejected() {
        let config = SimulationConfig {
            agent_count: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn default_run_converges() {
        let mut sim = Simulator::new(SimulationConfig::default()).expect("config");
        let result = sim.run().expect("run");
        assert!(result.convergence.converged, "{:?}", result.convergence);
        assert!(!result.changes.is_empty());
        assert_eq!(result.states.len(), 3);
        assert!(matches!(result.trace[0].kind, TraceEventKind::Genesis { .. }));
    }

    #[test]
    fn same_seed_same_trace() {
        let config = SimulationConfig {
            seed: 17,
            ..SimulationConfig::default()
        };
        let a = Simulator::new(config.clone()).expect("a").run().expect("run a");
        let b = Simulator::new(config).expect("b").run().expect("run b");
        assert_eq!(a.trace, b.trace);
        assert_eq!(a.states, b.states);
        assert_eq!(a.object, b.object);
    }

    #[test]
    fn single_agent_run_works() {
        let config = SimulationConfig {
            agent_count: 1,
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("config").run().expect("run");
        assert!(result.convergence.converged);
    }
}
