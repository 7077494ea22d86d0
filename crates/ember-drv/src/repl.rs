//! Interactive REPL: a `rustyline` line-reading loop around one persistent
//! `Vm`, so globals and the string table survive between inputs the way
//! clox's REPL does.

use ember_vm::{InterpretResult, Vm};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

use crate::error::DriverError;
use crate::interpret::{interpret, report_error};

const PROMPT: &str = "> ";

pub fn repl() -> Result<(), DriverError> {
    let mut editor = DefaultEditor::new()?;
    let mut vm = Vm::new();

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                editor.add_history_entry(line.as_str())?;
                debug!(%line, "repl input");
                let result = interpret(&mut vm, &line);
                report_error(&result);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(DriverError::Readline(e)),
        }
    }

    Ok(())
}

/// Feeds a scripted sequence of lines through a fresh REPL-style `Vm`,
/// bypassing `rustyline` entirely. Used by tests that need to assert on
/// interpreter state without driving a real terminal.
pub fn run_lines(lines: &[&str]) -> Vm {
    let mut vm = Vm::new();
    for line in lines {
        let result = interpret(&mut vm, line);
        if matches!(result, InterpretResult::CompileError(_) | InterpretResult::RuntimeError(_)) {
            report_error(&result);
        }
    }
    vm
}
