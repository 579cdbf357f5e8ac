//! Many-seed campaigns.
//!
//! Runs a range of seeds under one set of fault parameters, checks every
//! run with the full oracle, and keeps the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::network::FaultConfig;
use crate::oracle::{ConvergenceOracle, InvariantViolation, OracleResult};
use crate::rng::DeterministicRng;
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Shuffled replays per seed in the commutativity check.
const PERMUTATIONS: usize = 3;

/// Shared parameters for a range of seeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Seeds to run, end exclusive.
    pub seed_range: Range<u64>,
    pub agent_count: usize,
    pub rounds: u64,
    /// Peers each new change is sent to.
    pub fanout: usize,
    /// Chance per round and agent of an edit.
    pub edit_percent: u8,
    pub fault_drop_percent: u8,
    pub fault_duplicate_percent: u8,
    pub fault_reorder_percent: u8,
    pub fault_partition_percent: u8,
    /// Maximum delivery delay in rounds.
    pub fault_max_delay: u8,
    pub fault_freeze_percent: u8,
    /// Rounds a frozen clock stays frozen.
    pub fault_freeze_duration: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..50,
            agent_count: 4,
            rounds: 24,
            fanout: 2,
            edit_percent: 40,
            fault_drop_percent: 10,
            fault_duplicate_percent: 5,
            fault_reorder_percent: 10,
            fault_partition_percent: 5,
            fault_max_delay: 3,
            fault_freeze_percent: 5,
            fault_freeze_duration: 2,
        }
    }
}

impl CampaignConfig {
    /// Simulation parameters for one seed of the campaign.
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            agent_count: self.agent_count,
            rounds: self.rounds,
            fanout: self.fanout,
            edit_percent: self.edit_percent,
            fault: FaultConfig {
                max_delay_rounds: self.fault_max_delay,
                drop_rate_percent: self.fault_drop_percent,
                duplicate_rate_percent: self.fault_duplicate_percent,
                reorder_rate_percent: self.fault_reorder_percent,
                partition_rate_percent: self.fault_partition_percent,
                freeze_rate_percent: self.fault_freeze_percent,
                freeze_duration_rounds: self.fault_freeze_duration,
            },
            clock: crate::clock::ClockConfig::default(),
        }
    }

    /// Reject configs a campaign can't run.
    ///
    /// # Errors
    ///
    /// Empty seed range, no agents, no rounds, or a percentage above 100.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.agent_count == 0 {
            bail!("agent_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        let percents = [
            ("edit_percent", self.edit_percent),
            ("fault_drop_percent", self.fault_drop_percent),
            ("fault_duplicate_percent", self.fault_duplicate_percent),
            ("fault_reorder_percent", self.fault_reorder_percent),
            ("fault_partition_percent", self.fault_partition_percent),
            ("fault_freeze_percent", self.fault_freeze_percent),
        ];
        if let Some((name, value)) = percents.iter().find(|(_, v)| *v > 100) {
            bail!("{name} must be <= 100, got {value}");
        }
        Ok(())
    }
}

/// A seed whose run broke an invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    /// Rendered with [`format_violation`].
    pub violations: Vec<String>,
}

/// Outcome of [`run_campaign`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// Lowest failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds in which some fault actually took effect.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    /// Whether no seed failed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One seed's run with its oracle verdict.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

fn oracle_rng(seed: u64) -> DeterministicRng {
    DeterministicRng::new(seed.wrapping_add(0xDEAD))
}

fn run_checked(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = ConvergenceOracle::check_all(&result, &mut oracle_rng(seed), PERMUTATIONS)?;
    Ok(DetailedTrace { result, oracle })
}

/// Run every seed in `config.seed_range`.
///
/// # Errors
///
/// Invalid config, or an engine error inside a run.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let trace = run_checked(seed, config)?;
        if trace.result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }
        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        interesting = report.interesting_states_reached,
        "campaign finished"
    );
    Ok(report)
}

/// `Ok(Ok(()))` on pass, `Ok(Err(violations))` on an invariant failure.
///
/// # Errors
///
/// Engine errors inside the run.
pub fn run_single_seed(seed: u64, config: &CampaignConfig) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let trace = run_checked(seed, config)?;
    if trace.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(trace.oracle.violations))
    }
}

/// Re-run one seed keeping the full trace.
///
/// # Errors
///
/// Invalid config, or an engine error inside the run.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    run_checked(seed, config)
}

/// One-line description of a violation.
#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::Convergence { agent_a, agent_b, field } => {
            format!("Convergence: agents {agent_a} and {agent_b} differ in {field}")
        }
        InvariantViolation::Commutativity {
            permutation_index,
            detail,
        } => format!("Commutativity: permutation {permutation_index}: {detail}"),
        InvariantViolation::Idempotence { change, detail } => {
            format!("Idempotence: {detail} ({change})")
        }
        InvariantViolation::CausalConsistency {
            agent,
            pending,
            complete,
        } => format!("CausalConsistency: agent {agent} has {pending} buffered changes (complete={complete})"),
    }
}
