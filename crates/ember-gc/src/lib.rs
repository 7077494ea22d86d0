//! ember-gc - a generic precise tri-color mark-sweep collector.
//!
//! This crate knows nothing about the language: it collects a single
//! object type `T: Trace`, which `ember-vm` instantiates with its `Obj`
//! enum. Splitting the collector out this way mirrors the teacher
//! repository's separation between its GC crate and the runtime that
//! builds semantic objects on top of it, simplified down to the
//! single-threaded stop-the-world algorithm the language actually needs.

mod gcref;
mod heap;
mod trace;

pub use gcref::GcRef;
pub use heap::{Heap, GC_HEAP_GROW_FACTOR};
pub use trace::Trace;
