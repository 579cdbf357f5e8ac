#![forbid(unsafe_code)]

use anyhow::Result;
use quire_sim::{SimulationConfig, Simulator};

fn main() -> Result<()> {
    let mut simulator = Simulator::new(SimulationConfig::default())?;
    let result = simulator.run()?;

    let summary = serde_json::json!({
        "trace_events": result.trace.len(),
        "changes": result.changes.len(),
        "converged": result.convergence.converged,
        "interesting": result.interesting_state_reached,
    });
    println!("{summary}");
    Ok(())
}
