//! The object model: every heap-allocated value is one variant of [`Obj`].
//! Mutable runtime state (array elements, fields, method tables, upvalue
//! contents) lives behind `RefCell`/`Cell`, since a [`GcRef`] only ever
//! hands out a shared reference to the object it points to.

use std::cell::{Cell, RefCell};
use std::fmt;

use ember_gc::{GcRef, Trace};

use crate::chunk::Chunk;
use crate::native::NativeFn;
use crate::table::Table;
use crate::value::Value;

/// An FNV-1a-hashed byte string. Interned: the VM's string table
/// guarantees exactly one live `ObjString` per distinct byte sequence at
/// creation time, so `==` on the enclosing `GcRef` is content equality.
///
/// `SET_INDEX` on a string mutates `bytes` in place (mirroring the
/// original's single-character replacement), which is why this isn't a
/// plain `Box<[u8]>` — that mutation does not rehash or re-intern, so a
/// mutated string keeps living under its original table bucket.
pub struct ObjString {
    pub bytes: RefCell<Box<[u8]>>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(bytes: &[u8]) -> Self {
        let hash = Self::hash_bytes(bytes);
        Self {
            bytes: RefCell::new(bytes.into()),
            hash,
        }
    }

    pub fn hash_bytes(bytes: &[u8]) -> u32 {
        // FNV-1a
        let mut hash: u32 = 2166136261;
        for &b in bytes {
            hash ^= b as u32;
            hash = hash.wrapping_mul(16777619);
        }
        hash
    }

    pub fn as_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }
}

pub struct ObjArray {
    pub elements: RefCell<Vec<Value>>,
}

impl ObjArray {
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            elements: RefCell::new(elements),
        }
    }
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    /// `None` for the implicit top-level script function.
    pub name: Option<GcRef<Obj>>,
    pub chunk: Chunk,
}

pub struct ObjNative {
    pub name: GcRef<Obj>,
    pub arity: u8,
    pub function: NativeFn,
}

/// Either *open* (still reading/writing a live stack slot, identified by
/// index rather than a raw pointer so the VM's stack can be a plain `Vec`)
/// or *closed* (owns its value after the enclosing frame returned).
#[derive(Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub state: Cell<UpvalueState>,
}

impl ObjUpvalue {
    pub fn new_open(stack_index: usize) -> Self {
        Self {
            state: Cell::new(UpvalueState::Open(stack_index)),
        }
    }
}

pub struct ObjClosure {
    pub function: GcRef<Obj>,
    pub upvalues: Box<[GcRef<Obj>]>,
}

pub struct ObjClass {
    pub name: GcRef<Obj>,
    pub init: Cell<Option<GcRef<Obj>>>,
    pub methods: RefCell<Table>,
}

impl ObjClass {
    pub fn new(name: GcRef<Obj>) -> Self {
        Self {
            name,
            init: Cell::new(None),
            methods: RefCell::new(Table::new()),
        }
    }
}

pub struct ObjInstance {
    pub class: GcRef<Obj>,
    pub fields: RefCell<Table>,
}

impl ObjInstance {
    pub fn new(class: GcRef<Obj>) -> Self {
        Self {
            class,
            fields: RefCell::new(Table::new()),
        }
    }
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: GcRef<Obj>,
}

/// The single heap object type the VM's [`ember_gc::Heap`] manages.
pub enum Obj {
    String(ObjString),
    Array(ObjArray),
    Function(ObjFunction),
    Native(ObjNative),
    Upvalue(ObjUpvalue),
    Closure(ObjClosure),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Array(_) => "array",
            Obj::Function(_) => "function",
            Obj::Native(_) => "native function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Closure(_) => "closure",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "bound method",
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match self {
            Obj::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ObjArray> {
        match self {
            Obj::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match self {
            Obj::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match self {
            Obj::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match self {
            Obj::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match self {
            Obj::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&ObjBoundMethod> {
        match self {
            Obj::BoundMethod(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&ObjNative> {
        match self {
            Obj::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match self {
            Obj::Upvalue(u) => Some(u),
            _ => None,
        }
    }
}

impl Trace for Obj {
    fn trace(&self, mark: &mut dyn FnMut(GcRef<Self>)) {
        match self {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Array(a) => {
                for v in a.elements.borrow().iter() {
                    if let Some(o) = v.as_obj() {
                        mark(o);
                    }
                }
            }
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    mark(name);
                }
                for v in &f.chunk.constants {
                    if let Some(o) = v.as_obj() {
                        mark(o);
                    }
                }
            }
            Obj::Upvalue(u) => {
                if let UpvalueState::Closed(v) = u.state.get() {
                    if let Some(o) = v.as_obj() {
                        mark(o);
                    }
                }
                // Open upvalues are covered by the VM marking its stack
                // directly; the slot they point at is already a root.
            }
            Obj::Closure(c) => {
                mark(c.function);
                for &uv in c.upvalues.iter() {
                    mark(uv);
                }
            }
            Obj::Class(c) => {
                mark(c.name);
                if let Some(init) = c.init.get() {
                    mark(init);
                }
                for (key, value) in c.methods.borrow().iter() {
                    mark(key);
                    if let Some(o) = value.as_obj() {
                        mark(o);
                    }
                }
            }
            Obj::Instance(i) => {
                mark(i.class);
                for (key, value) in i.fields.borrow().iter() {
                    mark(key);
                    if let Some(o) = value.as_obj() {
                        mark(o);
                    }
                }
            }
            Obj::BoundMethod(b) => {
                if let Some(o) = b.receiver.as_obj() {
                    mark(o);
                }
                mark(b.method);
            }
        }
    }

    fn size_hint(&self) -> usize {
        match self {
            Obj::String(s) => s.bytes.borrow().len(),
            Obj::Array(a) => a.elements.borrow().len() * std::mem::size_of::<Value>(),
            Obj::Function(f) => f.chunk.code.len() + f.chunk.constants.len() * std::mem::size_of::<Value>(),
            _ => std::mem::size_of::<Self>(),
        }
    }
}

/// Renders a heap object the way `print` and `+`'s implicit string
/// conversion do.
pub fn display_obj(obj: GcRef<Obj>) -> String {
    match &*obj {
        Obj::String(s) => s.as_str_lossy(),
        Obj::Array(a) => {
            let elements = a.elements.borrow();
            let items: Vec<String> = elements.iter().map(|v| v.to_string()).collect();
            if items.is_empty() {
                "[]".to_string()
            } else {
                format!("[ {} ]", items.join(", "))
            }
        }
        Obj::Function(f) => match f.name {
            Some(name) => format!("<fn {}>", name_text(name)),
            None => "<script>".to_string(),
        },
        Obj::Native(n) => format!("<native fn {}>", name_text(n.name)),
        Obj::Upvalue(_) => "<upvalue>".to_string(),
        Obj::Closure(c) => display_obj(c.function),
        Obj::Class(c) => name_text(c.name),
        Obj::Instance(i) => format!("{} instance", name_text(i.class.as_class().unwrap().name)),
        Obj::BoundMethod(b) => display_obj(b.method),
    }
}

fn name_text(sym: GcRef<Obj>) -> String {
    sym.as_string().map(|s| s.as_str_lossy()).unwrap_or_default()
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.type_name(), match self {
            Obj::String(s) => s.as_str_lossy(),
            _ => String::new(),
        })
    }
}
