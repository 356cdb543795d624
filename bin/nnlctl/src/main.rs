//! ---
//! nnl_section: "05-external-interfaces"
//! nnl_subsection: "binary"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Control CLI applying lifecycle actions to the local metadata node."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use nnl_common::config::AppConfig;
use nnl_common::logging::init_tracing;
use nnl_common::version::VersionInfo;
use tracing::info;

mod lifecycle;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Apply lifecycle actions to the local NameNode",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Apply configure, start, stop or decommission")]
    Apply(lifecycle::ApplyArgs),
    #[command(about = "Print the inferred lifecycle state")]
    State,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let Some(command) = cli.command else {
        anyhow::bail!("no command given; try `nnlctl apply start` or `nnlctl --help`");
    };

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/nnl/nnl.toml"));
    candidates.push(PathBuf::from("configs/nnl.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let _log_guard = init_tracing("nnlctl", &loaded.config.logging)?;
    info!(config_path = %loaded.source.display(), version = %version.cli_string(), "configuration loaded");

    match command {
        Commands::Apply(args) => lifecycle::apply(loaded.config, &args),
        Commands::State => lifecycle::state(loaded.config),
    }
}
