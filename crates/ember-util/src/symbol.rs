//! Compiler-local string interning.
//!
//! This is distinct from the VM's runtime string interning (`ember_vm`'s
//! `Obj::String` table): `Symbol` exists only for the lifetime of a single
//! compile, to give identifiers cheap `Copy` equality while the compiler
//! resolves locals/upvalues/globals. Unlike the teacher's process-wide
//! `STRING_TABLE`, the interner here is owned by the `Compiler` and passed
//! around explicitly — the redesign the teacher repo's own docs call for
//! instead of a global table.

use rustc_hash::FxHashMap;

/// A cheap, `Copy` handle to an interned identifier string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

/// Owns the backing strings for every `Symbol` handed out during one
/// compile. Interning the same bytes twice returns the same `Symbol`.
#[derive(Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: FxHashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.lookup.get(s) {
            return sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_identical_strings() {
        let mut interner = Interner::new();
        let a = interner.intern("counter");
        let b = interner.intern("counter");
        let c = interner.intern("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "counter");
        assert_eq!(interner.resolve(c), "other");
    }
}
