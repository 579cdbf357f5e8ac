#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;

use clap::{Parser, Subcommand};
use output::{OutputMode, resolve_output_mode};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about = "quire: inspect block document changes and run replica simulations", long_about = None)]
struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode change blobs or write a sample document.
    Change(cmd::change::ChangeArgs),
    /// Parse version tokens.
    Version(cmd::version::VersionArgs),
    /// Show the resolved engine config.
    Config(cmd::config::ConfigArgs),
    /// Run deterministic simulation campaigns.
    Sim(cmd::sim::SimArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUIRE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "quire=debug,info"
        } else {
            "quire=info,warn"
        })
    });

    let format = env::var("QUIRE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => registry.with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr)).init(),
        _ => registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init(),
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let output = resolve_output_mode(cli.format, cli.json);
    debug!(?output, "resolved output mode");
    let project_root = env::current_dir()?;

    match cli.command {
        Commands::Change(args) => match args.command {
            cmd::change::ChangeCommand::Decode(ref a) => cmd::change::run_decode(a, output),
            cmd::change::ChangeCommand::Sample(ref a) => cmd::change::run_sample(a, output),
        },
        Commands::Version(args) => match args.command {
            cmd::version::VersionCommand::Parse { ref token } => cmd::version::run_parse(token, output),
        },
        Commands::Config(args) => match args.command {
            cmd::config::ConfigCommand::Show { ref root } => {
                cmd::config::run_show(root.as_deref(), &project_root, output)
            }
        },
        Commands::Sim(args) => match args.command {
            cmd::sim::SimCommand::Run(ref a) => cmd::sim::run_sim_run(a, output),
            cmd::sim::SimCommand::Replay(ref a) => cmd::sim::run_sim_replay(a, output),
        },
    }
}
