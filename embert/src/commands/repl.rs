//! `embert repl` — an interactive read-eval-print loop.

use crate::error::Result;

pub fn run_repl() -> Result<()> {
    ember_drv::repl()?;
    Ok(())
}
