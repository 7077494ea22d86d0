//! The runtime half of the language: bytecode representation, the object
//! model, the garbage-collected heap instantiation, and the interpreter
//! loop. Compiling source text into an [`object::ObjFunction`] is a
//! separate crate's job; this crate only knows how to run one.

pub mod chunk;
pub mod error;
pub mod native;
pub mod object;
pub mod table;
pub mod value;
mod value_fmt;
pub mod vm;

pub use chunk::{Chunk, OpCode};
pub use error::{InterpretResult, RuntimeError, TraceFrame};
pub use native::{NativeDef, NativeFn, NATIVES};
pub use object::{
    display_obj, Obj, ObjArray, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance,
    ObjNative, ObjString, ObjUpvalue, UpvalueState,
};
pub use table::Table;
pub use value::Value;
pub use vm::Vm;
