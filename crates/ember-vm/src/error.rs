use thiserror::Error;

/// A single frame of a runtime stack trace, already resolved to a
/// printable `(name, line)` pair — frames are snapshotted at the moment
/// the error is raised since unwinding destroys the call stack.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub name: String,
    pub line: u32,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }
}

/// Outcome of [`crate::vm::Vm::interpret`], mirroring the three-way result
/// a host driver needs to pick a process exit code.
#[derive(Debug)]
pub enum InterpretResult {
    Ok,
    CompileError(Vec<String>),
    RuntimeError(RuntimeError),
}
