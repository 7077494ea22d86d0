//! The driver: the sole `interpret()` entry point the core exposes to a
//! host, plus everything a host needs to wrap it into a runnable tool — a
//! file runner, a persistent-`Vm` REPL, exit-code mapping, and config
//! loading. None of this changes core language semantics; it is the
//! harness a reader expects around a compiler library, mirroring how
//! `faxc-drv`/`faxt` wrap the compiler phases in the teacher repository.

mod config;
mod error;
mod interpret;
mod repl;
mod run_file;

pub use config::{Config, GcConfig};
pub use error::DriverError;
pub use interpret::{exit_code, interpret, report_error};
pub use repl::repl;
pub use run_file::{run_file, run_file_raw, run_file_with_vm};
