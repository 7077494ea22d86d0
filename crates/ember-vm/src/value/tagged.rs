use std::fmt;

use ember_gc::GcRef;

use crate::object::Obj;

/// Default `Value` encoding: a plain tagged union over the four kinds of
/// runtime value. `PartialEq` already gives us the spec's equality rule
/// for free — numbers compare by IEEE equality (so `NaN != NaN`, matching
/// `f64`'s own `PartialEq`), booleans and nil by value, and objects
/// (including strings, which are interned) by `GcRef` identity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(GcRef<Obj>),
}

impl Value {
    pub const fn nil() -> Self {
        Value::Nil
    }

    pub const fn boolean(b: bool) -> Self {
        Value::Bool(b)
    }

    pub const fn number(n: f64) -> Self {
        Value::Number(n)
    }

    pub const fn from_obj(obj: GcRef<Obj>) -> Self {
        Value::Obj(obj)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_obj(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<GcRef<Obj>> {
        match self {
            Value::Obj(o) => Some(*o),
            _ => None,
        }
    }

    /// "Falsey" per the language: only `nil` and `false` are falsey.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil) || matches!(self, Value::Bool(false))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", crate::value_fmt::format_number(*n)),
            Value::Obj(o) => write!(f, "{}", crate::object::display_obj(*o)),
        }
    }
}
