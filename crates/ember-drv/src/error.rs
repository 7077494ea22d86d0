//! Driver-level error type: everything that can go wrong before or around
//! a call into the core (file I/O, line editing), as opposed to compile
//! and runtime errors, which `InterpretResult` already carries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line editor error: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),
}
