//! `quire config` — show the resolved engine configuration.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Subcommand};
use quire_core::config::{EngineConfig, resolve_config};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the config after user, project, and env layers.
    #[command(after_help = "EXAMPLES:\n    quire config show\n    QUIRE_OP_ORDER=origin-tiebreak quire config show --root ../doc")]
    Show {
        /// Project root holding `.quire/config.toml`. Defaults to the cwd.
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

pub fn run_show(root: Option<&Path>, project_root: &Path, output: OutputMode) -> Result<()> {
    let config = resolve_config(root.unwrap_or(project_root))?;
    render_mode(
        output,
        &config,
        |c: &EngineConfig, w| {
            writeln!(
                w,
                "config order={} id_seed={} verify_signatures={}",
                c.ordering.policy,
                c.ids.seed.map_or_else(|| "os".to_string(), |s| s.to_string()),
                c.replay.verify_signatures
            )
        },
        |c: &EngineConfig, w| {
            pretty_section(w, "Engine Config")?;
            pretty_kv(w, "Op order", c.ordering.policy.to_string())?;
            pretty_kv(
                w,
                "Id seed",
                c.ids.seed.map_or_else(|| "from OS".to_string(), |s| s.to_string()),
            )?;
            pretty_kv(w, "Verify sigs", c.replay.verify_signatures.to_string())
        },
    )
}
