//! `quire version` — inspect version tokens.

use std::io::Write;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use quire_core::Version;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct VersionArgs {
    #[command(subcommand)]
    pub command: VersionCommand,
}

#[derive(Subcommand, Debug)]
pub enum VersionCommand {
    /// Parse a version token and print its heads.
    #[command(after_help = "EXAMPLES:\n    quire version parse bafyqa...")]
    Parse { token: String },
}

#[derive(Debug, Serialize)]
struct ParseOutput {
    total: u64,
    heads: Vec<String>,
    canonical: String,
}

fn parse(token: &str) -> Result<ParseOutput> {
    let version: Version = token
        .trim()
        .parse()
        .with_context(|| format!("invalid version token '{token}'"))?;
    Ok(ParseOutput {
        total: version.total,
        heads: version.heads.iter().map(ToString::to_string).collect(),
        canonical: version.to_string(),
    })
}

pub fn run_parse(token: &str, output: OutputMode) -> Result<()> {
    let out = parse(token)?;
    render_mode(
        output,
        &out,
        |o, w| {
            writeln!(w, "version total={} heads={}", o.total, o.heads.len())?;
            for h in &o.heads {
                writeln!(w, "head={h}")?;
            }
            Ok(())
        },
        |o, w| {
            pretty_section(w, "Version")?;
            pretty_kv(w, "Changes", o.total.to_string())?;
            for h in &o.heads {
                pretty_kv(w, "Head", h)?;
            }
            pretty_kv(w, "Canonical", &o.canonical)
        },
    )
}
