//! An open-addressed, linear-probing hash table from interned strings to
//! `Value`s. Used for the globals table, every class's method table, every
//! instance's field table, and — keyed to `Value::Nil` — the VM's string
//! intern table itself.

use crate::object::Obj;
use crate::value::Value;
use ember_gc::GcRef;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<GcRef<Obj>>,
    value: Value,
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn hash_of(key: GcRef<Obj>) -> u32 {
        match &*key {
            Obj::String(s) => s.hash,
            _ => unreachable!("table keys are always interned strings"),
        }
    }

    fn find_entry(entries: &[Entry], cap: usize, key: GcRef<Obj>) -> usize {
        let mut index = (Self::hash_of(key) as usize) % cap;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None if entry.value.is_nil() => {
                    return tombstone.unwrap_or(index);
                }
                None => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn grow(&mut self, new_cap: usize) {
        let mut new_entries = vec![
            Entry {
                key: None,
                value: Value::nil(),
            };
            new_cap
        ];
        let mut new_count = 0;
        for entry in &self.entries {
            if let Some(key) = entry.key {
                let idx = Self::find_entry(&new_entries, new_cap, key);
                new_entries[idx] = *entry;
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    /// Inserts or overwrites `key`. Returns `true` if `key` was not
    /// already present.
    pub fn set(&mut self, key: GcRef<Obj>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            let new_cap = if self.entries.len() < 8 {
                8
            } else {
                self.entries.len() * 2
            };
            self.grow(new_cap);
        }
        let idx = Self::find_entry(&self.entries, self.entries.len(), key);
        let is_new = self.entries[idx].key.is_none();
        if is_new && self.entries[idx].value.is_nil() {
            self.count += 1;
        }
        self.entries[idx] = Entry {
            key: Some(key),
            value,
        };
        is_new
    }

    pub fn get(&self, key: GcRef<Obj>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let idx = Self::find_entry(&self.entries, self.entries.len(), key);
        self.entries[idx].key.map(|_| self.entries[idx].value)
    }

    pub fn delete(&mut self, key: GcRef<Obj>) -> bool {
        if self.count == 0 {
            return false;
        }
        let idx = Self::find_entry(&self.entries, self.entries.len(), key);
        if self.entries[idx].key.is_none() {
            return false;
        }
        // tombstone: key=None, value=true (non-nil, so find_entry keeps probing through it)
        self.entries[idx] = Entry {
            key: None,
            value: Value::boolean(true),
        };
        true
    }

    /// Copies every entry of `self` into `to`, overwriting existing keys.
    /// Used by `OP_INHERIT` to seed a subclass's method table.
    pub fn copy_into(&self, to: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                to.set(key, entry.value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcRef<Obj>, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Looks up an interned string by raw content before a `GcRef` for it
    /// exists — the operation `copy_string`/`take_string` use to decide
    /// whether to allocate a new `ObjString` or reuse an existing one.
    pub fn find_string(&self, bytes: &[u8], hash: u32) -> Option<GcRef<Obj>> {
        if self.count == 0 {
            return None;
        }
        let cap = self.entries.len();
        let mut index = (hash as usize) % cap;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if entry.value.is_nil() => return None,
                Some(key) => {
                    if let Obj::String(s) = &*key {
                        if s.hash == hash && &**s.bytes.borrow() == bytes {
                            return Some(key);
                        }
                    }
                }
                None => {}
            }
            index = (index + 1) % cap;
        }
    }

    /// Removes every entry whose key is not marked, used for the GC's
    /// weak-reference pass over the string intern table between mark and
    /// sweep.
    pub fn retain_marked(&mut self, is_marked: impl Fn(GcRef<Obj>) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !is_marked(key) {
                    entry.key = None;
                    entry.value = Value::boolean(true);
                }
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjString;
    use ember_gc::Heap;

    fn intern(heap: &mut Heap<Obj>, s: &str) -> GcRef<Obj> {
        heap.alloc(Obj::String(ObjString::new(s.as_bytes())))
    }

    #[test]
    fn set_get_roundtrip() {
        let mut heap: Heap<Obj> = Heap::new();
        let mut table = Table::new();
        let key = intern(&mut heap, "x");
        assert!(table.set(key, Value::number(42.0)));
        assert_eq!(table.get(key), Some(Value::number(42.0)));
        assert!(!table.set(key, Value::number(43.0)));
        assert_eq!(table.get(key), Some(Value::number(43.0)));
    }

    #[test]
    fn delete_then_reinsert() {
        let mut heap: Heap<Obj> = Heap::new();
        let mut table = Table::new();
        let key = intern(&mut heap, "y");
        table.set(key, Value::boolean(true));
        assert!(table.delete(key));
        assert_eq!(table.get(key), None);
        assert!(table.set(key, Value::number(1.0)));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut heap: Heap<Obj> = Heap::new();
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..64 {
            let key = intern(&mut heap, &format!("k{i}"));
            keys.push(key);
            table.set(key, Value::number(i as f64));
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key), Some(Value::number(i as f64)));
        }
    }

    #[test]
    fn find_string_matches_by_content() {
        let mut heap: Heap<Obj> = Heap::new();
        let mut table = Table::new();
        let key = intern(&mut heap, "hello");
        table.set(key, Value::nil());
        let hash = ObjString::hash_bytes(b"hello");
        assert_eq!(table.find_string(b"hello", hash), Some(key));
        assert_eq!(table.find_string(b"nope", ObjString::hash_bytes(b"nope")), None);
    }
}
