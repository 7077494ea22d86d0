//! ember-compile - the single-pass compiler.
//!
//! Turns source text directly into a top-level [`ObjFunction`], wrapped in
//! a [`GcRef`], with no intermediate AST. Mirrors the split `ember-lex`
//! already draws between scanning and everything downstream: this crate
//! owns parsing, scope resolution, and bytecode emission.

mod compiler;
mod precedence;
mod rules;

use ember_gc::GcRef;
use ember_util::Diagnostic;
use ember_vm::{Obj, Vm};

use compiler::Compiler;

/// Compiles `source` against `vm`'s heap, returning the top-level script
/// function on success or every diagnostic collected during panic-mode
/// recovery on failure.
pub fn compile(vm: &mut Vm, source: &str) -> Result<GcRef<Obj>, Vec<Diagnostic>> {
    Compiler::new(vm, source).compile()
}
