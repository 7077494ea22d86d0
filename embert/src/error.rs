//! Error type for the `embert` binary: wraps driver errors and adds the
//! usage/I-O cases that only make sense at the command-line boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Driver(#[from] ember_drv::DriverError),

    #[error("failed to load config {path}: {source}")]
    Config {
        path: std::path::PathBuf,
        #[source]
        source: ember_drv::DriverError,
    },
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_converts_via_from() {
        let driver_err = ember_drv::DriverError::Io {
            path: std::path::PathBuf::from("x.ember"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let cli_err: CliError = driver_err.into();
        assert!(matches!(cli_err, CliError::Driver(_)));
    }
}
