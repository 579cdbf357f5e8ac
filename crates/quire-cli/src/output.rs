//! Output modes shared by every command.
//!
//! Precedence: `--format`, then the hidden `--json` flag, then the
//! `QUIRE_FORMAT` env var, then pretty on a TTY and text when piped.

use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use serde::Serialize;

pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Sections and aligned key/value lines.
    Pretty,
    /// One `key=value` line per record, for pipes.
    Text,
    /// Pretty-printed JSON.
    Json,
}

fn resolve_inner(format_flag: Option<OutputMode>, json_flag: bool, format_env: Option<&str>, is_tty: bool) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }
    if json_flag {
        return OutputMode::Json;
    }
    match format_env.map(str::to_lowercase).as_deref() {
        Some("json") => OutputMode::Json,
        Some("text") => OutputMode::Text,
        Some("pretty") => OutputMode::Pretty,
        _ if is_tty => OutputMode::Pretty,
        _ => OutputMode::Text,
    }
}

pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env = std::env::var("QUIRE_FORMAT").ok();
    resolve_inner(format_flag, json_flag, env.as_deref(), io::stdout().is_terminal())
}

/// Write `value` as JSON, or hand the writer to the text or pretty renderer.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_everything() {
        let mode = resolve_inner(Some(OutputMode::Text), true, Some("json"), true);
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn json_flag_beats_env() {
        assert_eq!(resolve_inner(None, true, Some("pretty"), true), OutputMode::Json);
    }

    #[test]
    fn env_is_case_insensitive() {
        assert_eq!(resolve_inner(None, false, Some("JSON"), true), OutputMode::Json);
        assert_eq!(resolve_inner(None, false, Some("Text"), true), OutputMode::Text);
    }

    #[test]
    fn tty_decides_default() {
        assert_eq!(resolve_inner(None, false, None, true), OutputMode::Pretty);
        assert_eq!(resolve_inner(None, false, Some("bogus"), false), OutputMode::Text);
    }

    #[test]
    fn kv_aligns_keys() {
        let mut buf = Vec::new();
        pretty_kv(&mut buf, "Id", "x").expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "Id:          x\n");
    }
}
