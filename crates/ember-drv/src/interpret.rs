//! The sole entry point the core exposes to a host: compile against a
//! `Vm`'s heap, then run the result. The REPL and the file runner both
//! funnel through [`interpret`]; the REPL just keeps reusing one `Vm` so
//! globals and the string table persist across lines.

use ember_util::Diagnostic;
use ember_vm::{InterpretResult, Vm};

pub fn interpret(vm: &mut Vm, source: &str) -> InterpretResult {
    match ember_compile::compile(vm, source) {
        Ok(function) => vm.run(function),
        Err(diagnostics) => {
            InterpretResult::CompileError(diagnostics.iter().map(Diagnostic::to_string).collect())
        }
    }
}

/// Process exit code for a finished run, per the distilled spec's exit-code
/// table: `0` on success, `65` for either a compile or a runtime error.
/// `64` (usage) and `74` (I/O) are the caller's responsibility since they
/// arise before `interpret` is ever called.
pub fn exit_code(result: &InterpretResult) -> i32 {
    match result {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError(_) | InterpretResult::RuntimeError(_) => 65,
    }
}

/// Writes a compile or runtime error to stderr in the shape a terminal
/// user expects: one line per diagnostic, or a message followed by an
/// innermost-first call-stack trace.
pub fn report_error(result: &InterpretResult) {
    match result {
        InterpretResult::Ok => {}
        InterpretResult::CompileError(messages) => {
            for message in messages {
                eprintln!("{message}");
            }
        }
        InterpretResult::RuntimeError(err) => {
            eprintln!("{}", err.message);
            for frame in &err.trace {
                eprintln!("[line {}] in {}", frame.line, frame.name);
            }
        }
    }
}
