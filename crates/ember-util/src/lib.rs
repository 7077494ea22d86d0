//! ember-util - shared foundations used by every phase of the compiler and
//! the runtime: source spans, diagnostic rendering, and string interning.
//!
//! These types carry no language semantics of their own; they exist so that
//! `ember-lex`, `ember-compile`, `ember-vm` and `ember-drv` can report
//! errors and intern identifiers in one consistent way instead of each
//! re-inventing it.

mod diagnostic;
mod error;
mod span;
mod symbol;

pub use diagnostic::{Diagnostic, Level};
pub use error::UtilError;
pub use span::{SourceMap, Span};
pub use symbol::{Interner, Symbol};
