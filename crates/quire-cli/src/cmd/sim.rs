//! `quire sim` — deterministic simulation campaigns.
//!
//! `quire sim run` executes many seeds; `quire sim replay` re-runs one seed
//! and reports its trace and oracle verdict.

use std::io::Write;
use std::process;

use anyhow::Result;
use clap::{Args, Subcommand};
use quire_sim::TraceEvent;
use quire_sim::campaign::{CampaignConfig, format_violation, replay_seed, run_campaign};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct SimArgs {
    #[command(subcommand)]
    pub command: SimCommand,
}

#[derive(Subcommand, Debug)]
pub enum SimCommand {
    /// Run a campaign across many seeds.
    #[command(
        after_help = "EXAMPLES:\n    quire sim run --seeds 100\n    quire sim run --seeds 200 --agents 6 --rounds 32 --faults 0.2\n    quire sim run --seeds 50 --format json"
    )]
    Run(SimRunArgs),

    /// Replay one seed with its full trace.
    #[command(after_help = "EXAMPLES:\n    quire sim replay --seed 42\n    quire sim replay --seed 42 --trace --format json")]
    Replay(SimReplayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct Knobs {
    #[arg(long, default_value = "4")]
    pub agents: usize,

    #[arg(long, default_value = "24")]
    pub rounds: u64,

    /// Peers each new change is sent to.
    #[arg(long, default_value = "2")]
    pub fanout: usize,

    /// Chance per round that an agent edits, in percent.
    #[arg(long, default_value = "40")]
    pub edit_percent: u8,

    /// Overall fault probability between 0.0 and 1.0. Scales drops,
    /// duplicates, reorders, partitions, and clock freezes.
    #[arg(long, default_value = "0.1")]
    pub faults: f64,

    #[arg(long, default_value = "3")]
    pub max_delay: u8,
}

#[derive(Args, Debug)]
pub struct SimRunArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    pub seeds: u64,

    #[arg(long, default_value = "0")]
    pub seed_start: u64,

    #[command(flatten)]
    pub knobs: Knobs,
}

#[derive(Args, Debug)]
pub struct SimReplayArgs {
    #[arg(long)]
    pub seed: u64,

    /// Include every trace event in the output.
    #[arg(long)]
    pub trace: bool,

    #[command(flatten)]
    pub knobs: Knobs,
}

fn scale_fault(base: f64, weight_pct: u8) -> u8 {
    let raw = (base * f64::from(weight_pct)).clamp(0.0, 100.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pct = raw as u8;
    pct
}

fn campaign_config(seed_start: u64, seeds: u64, knobs: &Knobs) -> CampaignConfig {
    CampaignConfig {
        seed_range: seed_start..seed_start.saturating_add(seeds),
        agent_count: knobs.agents,
        rounds: knobs.rounds,
        fanout: knobs.fanout,
        edit_percent: knobs.edit_percent,
        fault_drop_percent: scale_fault(knobs.faults, 50),
        fault_duplicate_percent: scale_fault(knobs.faults, 25),
        fault_reorder_percent: scale_fault(knobs.faults, 50),
        fault_partition_percent: scale_fault(knobs.faults, 25),
        fault_max_delay: knobs.max_delay,
        fault_freeze_percent: scale_fault(knobs.faults, 25),
        fault_freeze_duration: 2,
    }
}

#[derive(Debug, Serialize)]
struct FailureOutput {
    seed: u64,
    violations: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    seeds_run: usize,
    seeds_passed: usize,
    first_failure: Option<u64>,
    interesting_states_reached: usize,
    all_passed: bool,
    failures: Vec<FailureOutput>,
}

pub fn run_sim_run(args: &SimRunArgs, output: OutputMode) -> Result<()> {
    let config = campaign_config(args.seed_start, args.seeds, &args.knobs);
    let report = run_campaign(&config)?;
    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        first_failure: report.first_failure,
        interesting_states_reached: report.interesting_states_reached,
        all_passed: report.all_passed(),
        failures: report
            .failures
            .iter()
            .map(|f| FailureOutput {
                seed: f.seed,
                violations: f.violations.clone(),
            })
            .collect(),
    };
    let knobs = &args.knobs;

    render_mode(
        output,
        &out,
        |o, w| {
            writeln!(
                w,
                "campaign seeds_run={} passed={} failed={} interesting_states={}",
                o.seeds_run,
                o.seeds_passed,
                o.failures.len(),
                o.interesting_states_reached
            )?;
            for failure in o.failures.iter().take(5) {
                writeln!(w, "failure seed={} violations={}", failure.seed, failure.violations.len())?;
            }
            if let Some(seed) = o.first_failure {
                writeln!(w, "hint replay_seed={seed} agents={} rounds={}", knobs.agents, knobs.rounds)?;
            }
            Ok(())
        },
        |o, w| {
            pretty_section(w, "Simulation Campaign")?;
            pretty_kv(w, "Seeds", o.seeds_run.to_string())?;
            pretty_kv(w, "Agents", knobs.agents.to_string())?;
            pretty_kv(w, "Rounds", knobs.rounds.to_string())?;
            pretty_kv(w, "Fault rate", format!("{:.0}%", knobs.faults * 100.0))?;
            pretty_kv(
                w,
                "Results",
                format!(
                    "{} passed / {} failed ({} interesting)",
                    o.seeds_passed,
                    o.failures.len(),
                    o.interesting_states_reached
                ),
            )?;
            if let Some(seed) = o.first_failure {
                writeln!(w)?;
                pretty_section(w, "Failure Samples")?;
                for failure in o.failures.iter().take(5) {
                    writeln!(w, "seed {:<8}", failure.seed)?;
                    for v in &failure.violations {
                        writeln!(w, "  - {v}")?;
                    }
                }
                writeln!(w)?;
                pretty_kv(
                    w,
                    "Replay",
                    format!("quire sim replay --seed {seed} --agents {} --rounds {}", knobs.agents, knobs.rounds),
                )?;
            } else {
                pretty_kv(w, "Status", "all seeds passed")?;
            }
            Ok(())
        },
    )?;

    if !report.all_passed() {
        process::exit(1);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct AgentOutput {
    id: usize,
    version: String,
    title: String,
    blocks: usize,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    seed: u64,
    object: String,
    changes: usize,
    trace_events: usize,
    converged: bool,
    oracle_passed: bool,
    interesting_state_reached: bool,
    violations: Vec<String>,
    agents: Vec<AgentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<Vec<TraceEvent>>,
}

pub fn run_sim_replay(args: &SimReplayArgs, output: OutputMode) -> Result<()> {
    let config = campaign_config(args.seed, 1, &args.knobs);
    let detailed = replay_seed(args.seed, &config)?;
    let result = &detailed.result;

    let out = ReplayOutput {
        seed: args.seed,
        object: result.object.to_string(),
        changes: result.changes.len(),
        trace_events: result.trace.len(),
        converged: result.convergence.converged,
        oracle_passed: detailed.oracle.passed,
        interesting_state_reached: result.interesting_state_reached,
        violations: detailed.oracle.violations.iter().map(format_violation).collect(),
        agents: result
            .states
            .iter()
            .map(|s| AgentOutput {
                id: s.id,
                version: s.version.to_string(),
                title: s.projection.title.clone(),
                blocks: s.projection.tree.len(),
            })
            .collect(),
        trace: args.trace.then(|| result.trace.clone()),
    };

    render_mode(
        output,
        &out,
        |o, w| {
            writeln!(
                w,
                "replay seed={} changes={} trace_events={} converged={} oracle_passed={} interesting={}",
                o.seed, o.changes, o.trace_events, o.converged, o.oracle_passed, o.interesting_state_reached
            )?;
            for v in &o.violations {
                writeln!(w, "violation={v}")?;
            }
            for a in &o.agents {
                writeln!(w, "agent id={} blocks={} version={}", a.id, a.blocks, a.version)?;
            }
            for event in o.trace.iter().flatten() {
                writeln!(w, "trace round={} {:?}", event.round, event.kind)?;
            }
            Ok(())
        },
        |o, w| {
            pretty_section(w, &format!("Replay Seed {}", o.seed))?;
            pretty_kv(w, "Object", &o.object)?;
            pretty_kv(w, "Changes", o.changes.to_string())?;
            pretty_kv(w, "Trace", o.trace_events.to_string())?;
            pretty_kv(w, "Converged", o.converged.to_string())?;
            pretty_kv(w, "Interesting", o.interesting_state_reached.to_string())?;
            pretty_kv(w, "Oracle", o.oracle_passed.to_string())?;
            if !o.violations.is_empty() {
                writeln!(w)?;
                pretty_section(w, "Invariant Violations")?;
                for v in &o.violations {
                    writeln!(w, "- {v}")?;
                }
            }
            writeln!(w)?;
            pretty_section(w, "Agent States")?;
            for a in &o.agents {
                writeln!(w, "agent {:<4} blocks={:<4} title={:?}", a.id, a.blocks, a.title)?;
            }
            if let Some(trace) = &o.trace {
                writeln!(w)?;
                pretty_section(w, "Trace")?;
                for event in trace {
                    writeln!(w, "{:>4}  {:?}", event.round, event.kind)?;
                }
            }
            Ok(())
        },
    )?;

    if !detailed.oracle.passed {
        process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knobs(faults: f64) -> Knobs {
        Knobs {
            agents: 3,
            rounds: 8,
            fanout: 2,
            edit_percent: 40,
            faults,
            max_delay: 2,
        }
    }

    #[test]
    fn faults_scale_and_clamp() {
        assert_eq!(scale_fault(0.1, 50), 5);
        assert_eq!(scale_fault(0.0, 50), 0);
        assert_eq!(scale_fault(5.0, 50), 100);
        assert_eq!(scale_fault(-1.0, 50), 0);
    }

    #[test]
    fn campaign_config_from_knobs() {
        let config = campaign_config(10, 5, &knobs(0.2));
        assert_eq!(config.seed_range, 10..15);
        assert_eq!(config.agent_count, 3);
        assert_eq!(config.fault_drop_percent, 10);
        assert_eq!(config.fault_partition_percent, 5);
        assert!(config.validate().is_ok());
    }
}
