//! Reads a script file and runs it to completion in a fresh `Vm`, mapping
//! the outcome to the process exit code the distilled spec's exit-code
//! table assigns it.

use std::path::Path;

use ember_vm::{InterpretResult, Vm};

use crate::error::DriverError;
use crate::interpret::{exit_code, interpret, report_error};

pub fn run_file(path: &Path) -> Result<i32, DriverError> {
    let mut vm = Vm::new();
    run_file_with_vm(path, &mut vm)
}

/// Like [`run_file`] but runs against a caller-supplied `Vm`, so a host can
/// tune GC behavior (stress mode, initial threshold) before the script's
/// first instruction executes.
pub fn run_file_with_vm(path: &Path, vm: &mut Vm) -> Result<i32, DriverError> {
    let result = run_file_raw_with_vm(path, vm)?;
    report_error(&result);
    Ok(exit_code(&result))
}

/// Like [`run_file`] but returns the `InterpretResult` instead of an exit
/// code, for callers (tests, `embert disasm`'s sibling `run` subcommand)
/// that need to inspect the outcome directly.
pub fn run_file_raw(path: &Path) -> Result<InterpretResult, DriverError> {
    let mut vm = Vm::new();
    run_file_raw_with_vm(path, &mut vm)
}

fn run_file_raw_with_vm(path: &Path, vm: &mut Vm) -> Result<InterpretResult, DriverError> {
    let source = std::fs::read_to_string(path).map_err(|source| DriverError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(interpret(vm, &source))
}
