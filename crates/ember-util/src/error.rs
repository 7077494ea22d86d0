use thiserror::Error;

/// Errors that can arise from `ember-util` itself (as opposed to errors the
/// compiler/VM raise about the *program being compiled*, which live in
/// their own crates' error enums).
#[derive(Debug, Error)]
pub enum UtilError {
    #[error("invalid span: start {start} > end {end}")]
    InvalidSpan { start: u32, end: u32 },
}
