//! embert - CLI front end for the ember scripting language.
//!
//! Parses arguments with clap and dispatches to one of three subcommands:
//! running a script file, an interactive REPL, or printing a script's
//! disassembled bytecode without executing it.

mod commands;
mod disasm;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{run_disasm, run_repl, run_run, DisasmArgs, RunArgs};
use ember_drv::Config;
use error::{CliError, Result};

/// embert - run, explore, and inspect ember scripts.
#[derive(Parser, Debug)]
#[command(name = "embert")]
#[cfg_attr(
    feature = "nan_boxing",
    command(version = concat!(env!("CARGO_PKG_VERSION"), " (nan-boxing: on)"))
)]
#[cfg_attr(
    not(feature = "nan_boxing"),
    command(version = concat!(env!("CARGO_PKG_VERSION"), " (nan-boxing: off)"))
)]
#[command(about = "CLI for the ember scripting language", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true, env = "EMBERT_VERBOSE")]
    verbose: bool,

    /// Force a garbage collection before every allocation.
    #[arg(long, global = true, env = "EMBERT_GC_STRESS")]
    gc_stress: bool,

    /// Path to a TOML configuration file.
    #[arg(long, global = true, env = "EMBERT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script file.
    Run(RunCommand),

    /// Start an interactive read-eval-print loop.
    Repl,

    /// Print a script's compiled bytecode without running it.
    Disasm(DisasmCommand),
}

#[derive(Parser, Debug)]
struct RunCommand {
    /// Script file to run.
    path: PathBuf,
}

#[derive(Parser, Debug)]
struct DisasmCommand {
    /// Script file to disassemble.
    path: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            // Errors this far out (bad config, unreadable script) are
            // reported with anyhow's chained `{:?}` so a `#[source]` on
            // `CliError`/`DriverError` shows up in the message.
            let err: anyhow::Error = err.into();
            eprintln!("embert: {err:?}");
            std::process::exit(74);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let subscriber = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init();
}

fn execute(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_run(RunArgs {
            path: args.path,
            gc_stress: cli.gc_stress,
            config,
        }),
        Commands::Repl => run_repl().map(|_| 0),
        Commands::Disasm(args) => run_disasm(DisasmArgs { path: args.path }),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::parse_from(["embert", "run", "script.ember"]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.path, PathBuf::from("script.ember")),
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn parses_repl_subcommand() {
        let cli = Cli::parse_from(["embert", "repl"]);
        assert!(matches!(cli.command, Commands::Repl));
    }

    #[test]
    fn parses_disasm_subcommand() {
        let cli = Cli::parse_from(["embert", "disasm", "script.ember"]);
        assert!(matches!(cli.command, Commands::Disasm(_)));
    }

    #[test]
    fn global_gc_stress_flag_is_recognized() {
        let cli = Cli::parse_from(["embert", "--gc-stress", "run", "script.ember"]);
        assert!(cli.gc_stress);
    }

    #[test]
    fn default_config_is_used_when_no_path_given() {
        let config = load_config(None).unwrap();
        assert_eq!(config, Config::default());
    }
}
