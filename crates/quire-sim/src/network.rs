use std::collections::BTreeSet;

use quire_core::Cid;
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::rng::DeterministicRng;

/// Fault injection knobs for the simulated network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of sends dropped.
    pub drop_rate_percent: u8,
    /// Percentage of sends delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of shuffling the messages ready in a round.
    pub reorder_rate_percent: u8,
    /// Percentage chance per round to toggle a random partition.
    pub partition_rate_percent: u8,
    /// Percentage chance per round to freeze a random clock.
    pub freeze_rate_percent: u8,
    /// Rounds a frozen clock stays frozen.
    pub freeze_duration_rounds: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
            partition_rate_percent: 2,
            freeze_rate_percent: 2,
            freeze_duration_rounds: 2,
        }
    }
}

/// A change blob in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    /// Sending agent.
    pub from: AgentId,
    /// Receiving agent.
    pub to: AgentId,
    /// Id of the carried change.
    pub change: Cid,
    /// Published change blob.
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingMessage {
    deliver_at_round: u64,
    message: NetworkMessage,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    /// Lost to a drop or a partition.
    pub dropped: bool,
    /// Queued a second time.
    pub duplicated: bool,
    /// Rounds until delivery.
    pub delay_rounds: u8,
}

/// Messages handed over in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome {
    pub delivered: Vec<NetworkMessage>,
    /// Whether `delivered` was shuffled.
    pub reordered: bool,
}

/// Deterministic, lossy, reordering network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    pending: Vec<PendingMessage>,
    partitioned: BTreeSet<AgentId>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            partitioned: BTreeSet::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    pub fn set_partitioned(&mut self, agent: AgentId, isolated: bool) {
        if isolated {
            self.partitioned.insert(agent);
        } else {
            self.partitioned.remove(&agent);
        }
    }

    #[must_use]
    pub fn is_partitioned(&self, agent: AgentId) -> bool {
        self.partitioned.contains(&agent)
    }

    /// Reconnect every agent.
    pub fn heal(&mut self) {
        self.partitioned.clear();
    }

    #[must_use]
    pub const fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue a message, subject to partitions, drops, delay, and duplication.
    pub fn send(&mut self, message: NetworkMessage, round: u64, rng: &mut DeterministicRng) -> SendOutcome {
        let dropped = SendOutcome {
            dropped: true,
            duplicated: false,
            delay_rounds: 0,
        };
        if self.is_partitioned(message.from) || self.is_partitioned(message.to) {
            return dropped;
        }
        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return dropped;
        }

        let delay_rounds = u8::try_from(rng.next_bounded(u64::from(self.fault.max_delay_rounds) + 1))
            .unwrap_or(self.fault.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay_rounds));

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.pending.push(PendingMessage {
                deliver_at_round,
                message: message.clone(),
            });
        }
        self.pending.push(PendingMessage {
            deliver_at_round,
            message,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds,
        }
    }

    /// Hand over everything due by `round`, possibly shuffled.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (mut ready, future): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| p.deliver_at_round <= round);
        self.pending = future;

        let reordered = ready.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            rng.shuffle(&mut ready);
        }

        DeliverOutcome {
            delivered: ready.into_iter().map(|p| p.message).collect(),
            reordered,
        }
    }

    /// Hand over every queued message regardless of delay.
    pub fn drain(&mut self) -> Vec<NetworkMessage> {
        self.pending.drain(..).map(|p| p.message).collect()
    }
}

#[cfg(test)]
mod tests {
    use quire_core::change::Codec;

    use super::*;

    fn message(from: AgentId, to: AgentId) -> NetworkMessage {
        NetworkMessage {
            from,
            to,
            change: Cid::of(Codec::DagCbor, b"c"),
            bytes: b"c".to_vec(),
        }
    }

    fn lossless() -> FaultConfig {
        FaultConfig {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            partition_rate_percent: 0,
            freeze_rate_percent: 0,
            freeze_duration_rounds: 0,
        }
    }

    #[test]
    fn lossless_network_delivers_same_round() {
        let mut net = SimulatedNetwork::new(lossless());
        let mut rng = DeterministicRng::new(1);
        let outcome = net.send(message(0, 1), 4, &mut rng);
        assert!(!outcome.dropped);
        let delivered = net.deliver_ready(4, &mut rng).delivered;
        assert_eq!(delivered, vec![message(0, 1)]);
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn partitioned_agents_lose_messages() {
        let mut net = SimulatedNetwork::new(lossless());
        let mut rng = DeterministicRng::new(2);
        net.set_partitioned(1, true);
        assert!(net.send(message(0, 1), 0, &mut rng).dropped);
        net.heal();
        assert!(!net.is_partitioned(1));
        assert!(!net.send(message(0, 1), 0, &mut rng).dropped);
    }

    #[test]
    fn duplicates_are_queued_twice() {
        let mut net = SimulatedNetwork::new(FaultConfig {
            duplicate_rate_percent: 100,
            ..lossless()
        });
        let mut rng = DeterministicRng::new(3);
        assert!(net.send(message(0, 1), 0, &mut rng).duplicated);
        assert_eq!(net.drain().len(), 2);
    }

    #[test]
    fn delayed_messages_wait() {
        let mut net = SimulatedNetwork::new(FaultConfig {
            max_delay_rounds: 5,
            ..lossless()
        });
        let mut rng = DeterministicRng::new(4);
        let mut delays = Vec::new();
        for _ in 0..20 {
            delays.push(net.send(message(0, 1), 0, &mut rng).delay_rounds);
        }
        let now = net.deliver_ready(0, &mut rng).delivered.len();
        let zero_delay = delays.iter().filter(|d| **d == 0).count();
        assert_eq!(now, zero_delay);
        assert_eq!(net.pending_len(), 20 - zero_delay);
    }
}
