//! The `Value` type has two interchangeable encodings selected at build
//! time by the `nan_boxing` Cargo feature:
//!
//! - `tagged` (default): a plain Rust enum — numbers, booleans, nil and
//!   object references each get their own discriminant. Obvious, safe,
//!   16 bytes.
//! - `nanbox`: a single `u64` where everything that isn't a finite double
//!   is packed into the payload of a quiet NaN, the classic clox trick.
//!   8 bytes, more arithmetic per access.
//!
//! Both expose the exact same public API (`nil`, `boolean`, `number`,
//! `from_obj`, the `is_*`/`as_*` accessors, `Display`, and derive
//! `Clone + Copy + PartialEq + Debug`), so every other module in this
//! crate is written against `Value` without caring which one is active —
//! and the same integration test suite runs against both.

#[cfg(not(feature = "nan_boxing"))]
mod tagged;
#[cfg(feature = "nan_boxing")]
mod nanbox;

#[cfg(not(feature = "nan_boxing"))]
pub use tagged::Value;
#[cfg(feature = "nan_boxing")]
pub use nanbox::Value;
