use anyhow::Result;
use quire_core::{Projection, ReceiveOutcome};
use serde::{Deserialize, Serialize};

use crate::SimulationResult;
use crate::agent::{AgentState, replica_from_rng};
use crate::rng::DeterministicRng;

// ── Result types ─────────────────────────────────────────────────────────────

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// Diagnostic for a single failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantViolation {
    /// Two agents ended with different versions or projections.
    Convergence {
        agent_a: usize,
        agent_b: usize,
        /// Which part differs: `version`, `title`, `subtitle`, `blocks`, or `tree`.
        field: String,
    },
    /// A fresh replica fed the changes in a shuffled order ended elsewhere.
    Commutativity {
        permutation_index: usize,
        detail: String,
    },
    /// Re-delivering a change was not a no-op.
    Idempotence { change: String, detail: String },
    /// An agent holds a change without its ancestors, or still buffers
    /// changes after full delivery.
    CausalConsistency {
        agent: usize,
        pending: usize,
        complete: bool,
    },
}

/// Summary of pairwise convergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub converged: bool,
    pub divergent_agents: Vec<usize>,
    pub change_count: u64,
}

fn differing_field(a: &AgentState, b: &AgentState) -> Option<&'static str> {
    if a.version != b.version {
        return Some("version");
    }
    let (pa, pb) = (&a.projection, &b.projection);
    if pa.title != pb.title {
        Some("title")
    } else if pa.subtitle != pb.subtitle {
        Some("subtitle")
    } else if pa.blocks != pb.blocks {
        Some("blocks")
    } else if pa.tree != pb.tree {
        Some("tree")
    } else {
        None
    }
}

// ── Oracle ───────────────────────────────────────────────────────────────────

/// Checks run against a finished simulation.
///
/// 1. **Convergence**: every agent ends at the same version and projection.
/// 2. **Commutativity**: replaying all changes in shuffled order into a
///    fresh replica yields the same projection.
/// 3. **Idempotence**: delivering every change twice changes nothing.
/// 4. **Causal consistency**: no agent holds a change whose ancestors are
///    missing, and nothing is left buffered.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    #[must_use]
    pub fn evaluate(states: &[AgentState]) -> ConvergenceReport {
        let Some(first) = states.first() else {
            return ConvergenceReport {
                converged: true,
                divergent_agents: Vec::new(),
                change_count: 0,
            };
        };
        let divergent_agents: Vec<usize> = states
            .iter()
            .filter(|s| differing_field(first, s).is_some())
            .map(|s| s.id)
            .collect();
        ConvergenceReport {
            converged: divergent_agents.is_empty(),
            divergent_agents,
            change_count: first.version.total,
        }
    }

    #[must_use]
    pub fn check_convergence(states: &[AgentState]) -> OracleResult {
        let mut violations = Vec::new();
        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                if let Some(field) = differing_field(a, b) {
                    violations.push(InvariantViolation::Convergence {
                        agent_a: a.id,
                        agent_b: b.id,
                        field: field.to_string(),
                    });
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Feed `changes` into `iterations` fresh replicas, each in a different
    /// random order, and compare against `canonical`.
    ///
    /// # Errors
    ///
    /// Engine errors while joining the document.
    pub fn check_commutativity(
        permanode: &[u8],
        changes: &[Vec<u8>],
        canonical: &Projection,
        rng: &mut DeterministicRng,
        iterations: usize,
    ) -> Result<OracleResult> {
        let mut violations = Vec::new();
        for permutation_index in 0..iterations {
            let mut order = changes.to_vec();
            rng.shuffle(&mut order);

            let mut replica = replica_from_rng(rng);
            let object = replica.receive_permanode(permanode.to_vec())?;
            let mut failure = None;
            for bytes in order {
                if let Err(e) = replica.receive(bytes) {
                    failure = Some(format!("receive failed: {e}"));
                    break;
                }
            }
            let failure = failure.or_else(|| match replica.view(&object) {
                Ok(doc) if doc.snapshot() == *canonical => None,
                Ok(_) => Some("projection differs".to_string()),
                Err(e) => Some(format!("replay failed: {e}")),
            });
            if let Some(detail) = failure {
                violations.push(InvariantViolation::Commutativity {
                    permutation_index,
                    detail,
                });
            }
        }
        Ok(OracleResult::from_violations(violations))
    }

    /// Deliver `changes` in causal order, then again, expecting only
    /// duplicates the second time and an unchanged projection.
    ///
    /// # Errors
    ///
    /// Engine errors on the first, causal pass.
    pub fn check_idempotence(permanode: &[u8], changes: &[Vec<u8>], rng: &mut DeterministicRng) -> Result<OracleResult> {
        let mut replica = replica_from_rng(rng);
        let object = replica.receive_permanode(permanode.to_vec())?;
        for bytes in changes {
            replica.receive(bytes.clone())?;
        }
        let before = replica.view(&object)?.snapshot();

        let mut violations = Vec::new();
        for bytes in changes {
            match replica.receive(bytes.clone()) {
                Ok(ReceiveOutcome::Duplicate(_)) => {}
                Ok(other) => violations.push(InvariantViolation::Idempotence {
                    change: format!("{other:?}"),
                    detail: "re-delivery was not reported as duplicate".to_string(),
                }),
                Err(e) => violations.push(InvariantViolation::Idempotence {
                    change: String::new(),
                    detail: e.to_string(),
                }),
            }
        }
        if replica.view(&object)?.snapshot() != before {
            violations.push(InvariantViolation::Idempotence {
                change: String::new(),
                detail: "projection changed after re-delivery".to_string(),
            });
        }
        Ok(OracleResult::from_violations(violations))
    }

    #[must_use]
    pub fn check_causality(states: &[AgentState]) -> OracleResult {
        let violations = states
            .iter()
            .filter(|s| s.pending > 0 || !s.causally_complete)
            .map(|s| InvariantViolation::CausalConsistency {
                agent: s.id,
                pending: s.pending,
                complete: s.causally_complete,
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Run every check.
    ///
    /// # Errors
    ///
    /// Engine errors from the replay-based checks.
    pub fn check_all(result: &SimulationResult, rng: &mut DeterministicRng, permutations: usize) -> Result<OracleResult> {
        let mut out = OracleResult::pass()
            .merge(Self::check_convergence(&result.states))
            .merge(Self::check_causality(&result.states));

        if let Some(canonical) = result.states.first() {
            out = out
                .merge(Self::check_commutativity(
                    &result.permanode,
                    &result.changes,
                    &canonical.projection,
                    rng,
                    permutations,
                )?)
                .merge(Self::check_idempotence(&result.permanode, &result.changes, rng)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SimulatedAgent;
    use crate::clock::ClockConfig;

    fn state(id: usize, title: &str) -> AgentState {
        AgentState {
            id,
            version: quire_core::Version::empty(),
            projection: Projection {
                title: title.to_string(),
                subtitle: String::new(),
                blocks: std::collections::BTreeMap::new(),
                tree: Vec::new(),
            },
            pending: 0,
            causally_complete: true,
        }
    }

    #[test]
    fn identical_states_converge() {
        let states = vec![state(0, "a"), state(1, "a")];
        assert!(ConvergenceOracle::check_convergence(&states).passed);
        assert!(ConvergenceOracle::evaluate(&states).converged);
    }

    #[test]
    fn divergent_title_is_reported() {
        let states = vec![state(0, "a"), state(1, "b"), state(2, "a")];
        let result = ConvergenceOracle::check_convergence(&states);
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 2);
        assert_eq!(
            result.violations[0],
            InvariantViolation::Convergence {
                agent_a: 0,
                agent_b: 1,
                field: "title".to_string()
            }
        );
        assert_eq!(ConvergenceOracle::evaluate(&states).divergent_agents, vec![1]);
    }

    #[test]
    fn leftover_pending_breaks_causality() {
        let mut s = state(0, "a");
        s.pending = 2;
        let result = ConvergenceOracle::check_causality(&[s]);
        assert!(!result.passed);
    }

    #[test]
    fn real_changes_commute_and_are_idempotent() {
        let mut rng = DeterministicRng::new(11);
        let clock = ClockConfig::default().assign(&mut rng);
        let mut agent = SimulatedAgent::new(0, &mut rng, clock);
        let (object, permanode) = agent.create_document(0).expect("create");
        for round in 1..12 {
            agent.edit(&object, round, &mut rng).expect("edit");
        }
        let changes = agent.changes(&object).expect("changes");
        let canonical = agent.snapshot(&object).expect("snapshot").projection;

        let commute = ConvergenceOracle::check_commutativity(&permanode, &changes, &canonical, &mut rng, 4)
            .expect("commutativity");
        assert!(commute.passed, "{:?}", commute.violations);
        let idem = ConvergenceOracle::check_idempotence(&permanode, &changes, &mut rng).expect("idempotence");
        assert!(idem.passed, "{:?}", idem.violations);
    }
}
