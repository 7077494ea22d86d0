//! Command modules for the embert CLI. Each subcommand gets its own file:
//! an `Args` struct built from the parsed CLI, and a `run_x(args)` function
//! `main` dispatches to.

pub mod disasm;
pub mod repl;
pub mod run;

pub use disasm::{run_disasm, DisasmArgs};
pub use repl::run_repl;
pub use run::{run_run, RunArgs};
