//! The interpreter loop: call frames, the value stack, the open-upvalue
//! chain, globals, string interning, and opcode dispatch.

use ember_gc::{GcRef, Heap};
use tracing::{debug, warn};

use crate::chunk::OpCode;
use crate::error::{InterpretResult, RuntimeError, TraceFrame};
use crate::native::{self, NativeDef};
use crate::object::{
    Obj, ObjArray, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjString, ObjUpvalue,
    UpvalueState,
};
use crate::table::Table;
use crate::value::Value;

/// Matches the spec's call-stack ceiling.
const FRAMES_MAX: usize = 64;

#[derive(Clone, Copy)]
struct CallFrame {
    closure: GcRef<Obj>,
    ip: usize,
    /// Index into `Vm::stack` where this frame's locals begin; slot 0 is
    /// the callee itself (receiver for methods, the closure otherwise).
    slots: usize,
}

/// A singleton per program run: exclusive owner of the heap, the value
/// stack, the call-frame stack, the open-upvalue chain, globals, and the
/// string-intern table.
pub struct Vm {
    pub heap: Heap<Obj>,
    strings: Table,
    pub globals: Table,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    open_upvalues: Vec<GcRef<Obj>>,
    /// Forces a collection before every allocation (the `gc_stress`
    /// feature, or toggled at runtime by a host driver's `--gc-stress`).
    pub gc_stress: bool,
    /// Start of this VM's lifetime, so the `clock` native can report
    /// elapsed seconds instead of wall-clock epoch time.
    pub(crate) vm_start: std::time::Instant,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            heap: Heap::new(),
            strings: Table::new(),
            globals: Table::new(),
            stack: Vec::with_capacity(1024),
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: Vec::new(),
            gc_stress: cfg!(feature = "gc_stress"),
            vm_start: std::time::Instant::now(),
        };
        vm.heap.stress = vm.gc_stress;
        vm.define_natives();
        vm
    }

    fn define_natives(&mut self) {
        for def in native::NATIVES {
            self.define_native(def);
        }
    }

    fn define_native(&mut self, def: &NativeDef) {
        let name = self.alloc_string(def.name.as_bytes(), &[]);
        let native_obj = self.alloc_obj(
            Obj::Native(crate::object::ObjNative {
                name,
                arity: def.arity,
                function: def.function,
            }),
            &[Value::from_obj(name)],
        );
        self.globals.set(name, Value::from_obj(native_obj));
    }

    // ---- allocation / interning -----------------------------------

    /// Interns `bytes`, allocating a new `ObjString` only if an identical
    /// byte sequence isn't already in the string table.
    pub fn alloc_string(&mut self, bytes: &[u8], extra_roots: &[Value]) -> GcRef<Obj> {
        let hash = ObjString::hash_bytes(bytes);
        if let Some(existing) = self.strings.find_string(bytes, hash) {
            return existing;
        }
        if self.should_collect() {
            self.collect_garbage(extra_roots);
        }
        let obj = self.heap.alloc(Obj::String(ObjString::new(bytes)));
        self.strings.set(obj, Value::nil());
        obj
    }

    pub fn intern_string(&mut self, bytes: &[u8]) -> Value {
        Value::from_obj(self.alloc_string(bytes, &[]))
    }

    /// The generic allocation choke point for every non-string object.
    /// `extra_roots` covers values that are reachable only from a Rust
    /// local (not yet pushed on the VM stack or stored anywhere the
    /// collector can see) at the moment this call might trigger a GC.
    pub fn alloc_obj(&mut self, obj: Obj, extra_roots: &[Value]) -> GcRef<Obj> {
        if self.should_collect() {
            self.collect_garbage(extra_roots);
        }
        self.heap.alloc(obj)
    }

    fn should_collect(&self) -> bool {
        self.gc_stress || self.heap.should_collect()
    }

    fn collect_garbage(&mut self, extra_roots: &[Value]) {
        debug!(
            bytes_allocated = self.heap.bytes_allocated(),
            next_gc = self.heap.next_gc_threshold(),
            "collecting garbage"
        );
        for v in self.stack.iter() {
            if let Some(o) = v.as_obj() {
                self.heap.mark_object(o);
            }
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &uv in &self.open_upvalues {
            self.heap.mark_object(uv);
        }
        for (key, value) in self.globals.iter() {
            self.heap.mark_object(key);
            if let Some(o) = value.as_obj() {
                self.heap.mark_object(o);
            }
        }
        for v in extra_roots {
            if let Some(o) = v.as_obj() {
                self.heap.mark_object(o);
            }
        }
        self.heap.trace();
        let heap = &self.heap;
        self.strings.retain_marked(|k| heap.is_marked(k));
        self.heap.sweep();
    }

    // ---- stack helpers ----------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("pop on empty stack is a codegen bug, not a runtime error")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- bytecode reads, via the current frame -----------------------

    fn current_closure(&self) -> &ObjClosure {
        self.frames.last().unwrap().closure.as_closure().unwrap()
    }

    fn read_u8(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let function = frame.closure.as_closure().unwrap().function.as_function().unwrap();
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u24(&mut self) -> u32 {
        let frame = self.frames.last_mut().unwrap();
        let function = frame.closure.as_closure().unwrap().function.as_function().unwrap();
        let v = function.chunk.read_u24(frame.ip);
        frame.ip += 3;
        v
    }

    fn read_constant(&mut self, long: bool) -> Value {
        let index = if long { self.read_u24() as usize } else { self.read_u8() as usize };
        let function = self.current_closure().function.as_function().unwrap();
        function.chunk.constants[index]
    }

    fn read_string(&mut self, long: bool) -> GcRef<Obj> {
        self.read_constant(long).as_obj().expect("name constant must be a string")
    }

    fn current_line(&self) -> u32 {
        let frame = self.frames.last().unwrap();
        let function = frame.closure.as_closure().unwrap().function.as_function().unwrap();
        function.chunk.line_for_offset(frame.ip.saturating_sub(1))
    }

    // ---- errors --------------------------------------------------------

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let message = message.into();
        warn!(%message, frames = self.frames.len(), "runtime error");
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = frame.closure.as_closure().unwrap().function.as_function().unwrap();
            let line = function.chunk.line_for_offset(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(n) => n.as_string().map(|s| s.as_str_lossy()).unwrap_or_default(),
                None => "script".to_string(),
            };
            trace.push(TraceFrame { name, line });
        }
        RuntimeError {
            message,
            trace,
        }
    }

    // ---- value formatting -----------------------------------------------

    /// `%g`/`true`/`false`/`(nil)` textual form used by `+`'s implicit
    /// string conversion — distinct from `print`'s `Display`, which shows
    /// nil as `nil` rather than `(nil)`.
    fn stringify_for_concat(&self, value: Value) -> String {
        if value.is_nil() {
            "(nil)".to_string()
        } else if let Some(b) = value.as_bool() {
            b.to_string()
        } else if let Some(n) = value.as_number() {
            crate::value_fmt::format_number(n)
        } else {
            // Arrays are handled earlier by the array-append branch of `+`
            // and never reach here; any other object (closure, class,
            // instance, function) still needs a textual form rather than
            // silently vanishing from the concatenation.
            value.as_obj().map(crate::object::display_obj).unwrap_or_default()
        }
    }

    fn is_string(v: Value) -> bool {
        v.as_obj().is_some_and(|o| matches!(&*o, Obj::String(_)))
    }

    fn is_array(v: Value) -> bool {
        v.as_obj().is_some_and(|o| matches!(&*o, Obj::Array(_)))
    }

    // ---- arithmetic ------------------------------------------------------

    fn concat_bytes(&mut self, a: Value, b: Value) -> Value {
        let mut bytes = if Self::is_string(a) {
            a.as_obj().unwrap().as_string().unwrap().bytes.borrow().to_vec()
        } else {
            self.stringify_for_concat(a).into_bytes()
        };
        let tail = if Self::is_string(b) {
            b.as_obj().unwrap().as_string().unwrap().bytes.borrow().to_vec()
        } else {
            self.stringify_for_concat(b).into_bytes()
        };
        bytes.extend(tail);
        self.intern_string(&bytes)
    }

    // ---- calling -----------------------------------------------------

    fn call(&mut self, closure: GcRef<Obj>, arg_count: u8) -> Result<(), RuntimeError> {
        let function = closure.as_closure().unwrap().function.as_function().unwrap();
        if arg_count != function.arity {
            return Err(self.runtime_error(format!(
                "Expected {} arguments but got {}",
                function.arity, arg_count
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow error"));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - arg_count as usize - 1,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        if let Some(obj) = callee.as_obj() {
            match &*obj {
                Obj::Closure(_) => return self.call(obj, arg_count),
                Obj::Native(n) => {
                    let arity = n.arity;
                    let function = n.function;
                    if arg_count != arity {
                        return Err(self.runtime_error(format!(
                            "Expected {} arguments but got {}",
                            arity, arg_count
                        )));
                    }
                    let base = self.stack.len() - arg_count as usize;
                    let args: Vec<Value> = self.stack[base..].to_vec();
                    return match function(self, &args) {
                        Ok(result) => {
                            self.stack.truncate(base - 1);
                            self.push(result);
                            Ok(())
                        }
                        Err(message) => Err(self.runtime_error(message)),
                    };
                }
                Obj::Class(_) => {
                    let instance = self.alloc_obj(
                        Obj::Instance(ObjInstance::new(obj)),
                        &[callee],
                    );
                    let slot = self.stack.len() - arg_count as usize - 1;
                    self.stack[slot] = Value::from_obj(instance);
                    let init = obj.as_class().unwrap().init.get();
                    if let Some(init) = init {
                        return self.call(init, arg_count);
                    } else if arg_count != 0 {
                        return Err(self.runtime_error(format!(
                            "Expected 0 arguments but got {arg_count} arguments"
                        )));
                    }
                    return Ok(());
                }
                Obj::BoundMethod(b) => {
                    let receiver = b.receiver;
                    let method = b.method;
                    let slot = self.stack.len() - arg_count as usize - 1;
                    self.stack[slot] = receiver;
                    return self.call(method, arg_count);
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes"))
    }

    fn invoke_from_class(
        &mut self,
        class: GcRef<Obj>,
        name: GcRef<Obj>,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let class_ref = class.as_class().unwrap();
        if let Some(init) = class_ref.init.get() {
            let init_name = init.as_closure().unwrap().function.as_function().unwrap().name;
            if init_name == Some(name) {
                return self.call(init, arg_count);
            }
        }
        let method = class_ref.methods.borrow().get(name);
        match method {
            Some(m) => self.call(m.as_obj().unwrap(), arg_count),
            None => Err(self.runtime_error(format!(
                "Undefined property '{}'",
                name_str(name)
            ))),
        }
    }

    fn invoke(&mut self, name: GcRef<Obj>, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize);
        let instance_obj = receiver
            .as_obj()
            .filter(|o| matches!(&**o, Obj::Instance(_)))
            .ok_or_else(|| self.runtime_error("Only instances have methods"))?;
        let field = instance_obj.as_instance().unwrap().fields.borrow().get(name);
        if let Some(value) = field {
            let slot = self.stack.len() - arg_count as usize - 1;
            self.stack[slot] = value;
            return self.call_value(value, arg_count);
        }
        let class = instance_obj.as_instance().unwrap().class;
        self.invoke_from_class(class, name, arg_count)
    }

    fn bind_method(&mut self, class: GcRef<Obj>, name: GcRef<Obj>) -> Result<(), RuntimeError> {
        let method = class.as_class().unwrap().methods.borrow().get(name);
        match method {
            Some(method) => {
                let receiver = self.peek(0);
                let bound = self.alloc_obj(
                    Obj::BoundMethod(ObjBoundMethod {
                        receiver,
                        method: method.as_obj().unwrap(),
                    }),
                    &[receiver, method],
                );
                self.pop();
                self.push(Value::from_obj(bound));
                Ok(())
            }
            None => Err(self.runtime_error(format!("Undefined property '{}'", name_str(name)))),
        }
    }

    // ---- upvalues ----------------------------------------------------

    fn capture_upvalue(&mut self, stack_index: usize) -> GcRef<Obj> {
        let pos = self
            .open_upvalues
            .iter()
            .position(|&uv| match uv.as_upvalue().unwrap().state.get() {
                UpvalueState::Open(idx) => idx <= stack_index,
                UpvalueState::Closed(_) => false,
            });
        if let Some(pos) = pos {
            let existing = self.open_upvalues[pos];
            if let UpvalueState::Open(idx) = existing.as_upvalue().unwrap().state.get() {
                if idx == stack_index {
                    return existing;
                }
            }
            let created = self.alloc_obj(Obj::Upvalue(ObjUpvalue::new_open(stack_index)), &[]);
            self.open_upvalues.insert(pos, created);
            created
        } else {
            let created = self.alloc_obj(Obj::Upvalue(ObjUpvalue::new_open(stack_index)), &[]);
            self.open_upvalues.push(created);
            created
        }
    }

    fn close_upvalues(&mut self, boundary: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let uv = self.open_upvalues[i];
            let upvalue = uv.as_upvalue().unwrap();
            match upvalue.state.get() {
                UpvalueState::Open(idx) if idx >= boundary => {
                    let value = self.stack[idx];
                    upvalue.state.set(UpvalueState::Closed(value));
                    self.open_upvalues.remove(i);
                }
                _ => i += 1,
            }
        }
    }

    fn read_upvalue(&self, index: usize) -> Value {
        let uv = self.current_closure().upvalues[index];
        match uv.as_upvalue().unwrap().state.get() {
            UpvalueState::Open(idx) => self.stack[idx],
            UpvalueState::Closed(v) => v,
        }
    }

    fn write_upvalue(&mut self, index: usize, value: Value) {
        let uv = self.current_closure().upvalues[index];
        let upvalue = uv.as_upvalue().unwrap();
        match upvalue.state.get() {
            UpvalueState::Open(idx) => self.stack[idx] = value,
            UpvalueState::Closed(_) => upvalue.state.set(UpvalueState::Closed(value)),
        }
    }

    // ---- entry points --------------------------------------------------

    /// Wraps a compiled top-level function in a closure, installs the
    /// first call frame, and runs it to completion.
    pub fn run(&mut self, function: GcRef<Obj>) -> InterpretResult {
        let fn_value = Value::from_obj(function);
        let closure = self.alloc_obj(
            Obj::Closure(ObjClosure {
                function,
                upvalues: Box::new([]),
            }),
            &[fn_value],
        );
        self.push(Value::from_obj(closure));
        if let Err(e) = self.call(closure, 0) {
            self.stack.clear();
            self.frames.clear();
            return InterpretResult::RuntimeError(e);
        }
        match self.execute() {
            Ok(()) => InterpretResult::Ok,
            Err(e) => {
                self.stack.clear();
                self.frames.clear();
                InterpretResult::RuntimeError(e)
            }
        }
    }

    fn execute(&mut self) -> Result<(), RuntimeError> {
        loop {
            let op = OpCode::from_u8(self.read_u8());
            match op {
                OpCode::Return => {
                    let result = self.pop();
                    let base = self.frames.last().unwrap().slots;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result);
                }
                OpCode::Constant => {
                    let c = self.read_constant(false);
                    self.push(c);
                }
                OpCode::ConstantLong => {
                    let c = self.read_constant(true);
                    self.push(c);
                }
                OpCode::Nil => self.push(Value::nil()),
                OpCode::True => self.push(Value::boolean(true)),
                OpCode::False => self.push(Value::boolean(false)),
                OpCode::Negate => {
                    let v = self.peek(0);
                    match v.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::number(-n));
                        }
                        None => return Err(self.runtime_error("operand must be a number")),
                    }
                }
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::boolean(v.is_falsey()));
                }
                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if a.as_number().is_some() && b.as_number().is_some() {
                        self.pop();
                        self.pop();
                        self.push(Value::number(a.as_number().unwrap() + b.as_number().unwrap()));
                    } else if Self::is_array(a) || Self::is_array(b) {
                        self.pop();
                        self.pop();
                        let result = self.array_concat(a, b);
                        self.push(result);
                    } else if Self::is_string(a) || Self::is_string(b) {
                        let result = self.concat_bytes(a, b);
                        self.pop();
                        self.pop();
                        self.push(result);
                    } else {
                        return Err(self.runtime_error("undefined add operation"));
                    }
                }
                OpCode::Sub => self.binary_numeric(|a, b| a - b)?,
                OpCode::Mul => self.binary_numeric(|a, b| a * b)?,
                OpCode::Div => {
                    let b = self.peek(0);
                    if b.as_number() == Some(0.0) {
                        return Err(self.runtime_error("Divide by 0 error"));
                    }
                    self.binary_numeric(|a, b| a / b)?
                }
                OpCode::Mod => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    match (a.as_number(), b.as_number()) {
                        (Some(a), Some(b)) => {
                            self.pop();
                            self.pop();
                            self.push(Value::number(((a as i64) % (b as i64)) as f64));
                        }
                        _ => return Err(self.runtime_error("Operands must be numbers")),
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::boolean(a == b));
                }
                OpCode::NotEqual => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::boolean(a != b));
                }
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::LessEqual => self.binary_compare(|a, b| a <= b)?,
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::GreaterEqual => self.binary_compare(|a, b| a >= b)?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::PopN => {
                    let n = self.read_u24() as usize;
                    let new_len = self.stack.len() - n;
                    self.stack.truncate(new_len);
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                OpCode::DefineGlobal => self.define_global(false),
                OpCode::DefineGlobalLong => self.define_global(true),
                OpCode::GetGlobal => self.get_global(false)?,
                OpCode::GetGlobalLong => self.get_global(true)?,
                OpCode::SetGlobal => self.set_global(false)?,
                OpCode::SetGlobalLong => self.set_global(true)?,
                OpCode::GetLocal => {
                    let slot = self.read_u24() as usize;
                    let base = self.frames.last().unwrap().slots;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_u24() as usize;
                    let base = self.frames.last().unwrap().slots;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetUpvalue => {
                    let idx = self.read_u24() as usize;
                    self.push(self.read_upvalue(idx));
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_u24() as usize;
                    let v = self.peek(0);
                    self.write_upvalue(idx, v);
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Array => self.build_array(false),
                OpCode::ArrayLong => self.build_array(true),
                OpCode::GetIndex => self.get_index()?,
                OpCode::SetIndex => self.set_index()?,
                OpCode::Jump => {
                    let offset = self.read_u24() as usize;
                    self.frames.last_mut().unwrap().ip += offset;
                }
                OpCode::Loop => {
                    let offset = self.read_u24() as usize;
                    self.frames.last_mut().unwrap().ip -= offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u24() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset;
                    }
                }
                OpCode::Call => {
                    let arg_count = self.read_u8();
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Closure => self.make_closure(false),
                OpCode::ClosureLong => self.make_closure(true),
                OpCode::Class => {
                    let name = self.read_string(false);
                    let class = self.alloc_obj(Obj::Class(ObjClass::new(name)), &[Value::from_obj(name)]);
                    self.push(Value::from_obj(class));
                }
                OpCode::Method => {
                    let name = self.read_string(false);
                    self.define_method(name);
                }
                OpCode::GetProp => self.get_property(false)?,
                OpCode::GetPropLong => self.get_property(true)?,
                OpCode::SetProp => self.set_property(false)?,
                OpCode::SetPropLong => self.set_property(true)?,
                OpCode::Invoke => {
                    let name = self.read_string(false);
                    let arg_count = self.read_u8();
                    self.invoke(name, arg_count)?;
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    let super_obj = superclass
                        .as_obj()
                        .filter(|o| matches!(&**o, Obj::Class(_)))
                        .ok_or_else(|| self.runtime_error("Can only inherit from another class"))?;
                    let subclass = self.peek(0).as_obj().unwrap();
                    super_obj
                        .as_class()
                        .unwrap()
                        .methods
                        .borrow()
                        .copy_into(&mut subclass.as_class().unwrap().methods.borrow_mut());
                    self.pop();
                }
                OpCode::GetSuper => {
                    let name = self.read_string(false);
                    let superclass = self.pop().as_obj().unwrap();
                    self.bind_method(superclass, name)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string(false);
                    let arg_count = self.read_u8();
                    let superclass = self.pop().as_obj().unwrap();
                    self.invoke_from_class(superclass, name, arg_count)?;
                }
            }
        }
    }

    fn binary_numeric(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(Value::number(op(a, b)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers")),
        }
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(Value::boolean(op(a, b)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers")),
        }
    }

    fn array_concat(&mut self, a: Value, b: Value) -> Value {
        if Self::is_array(a) && Self::is_array(b) {
            let tail: Vec<Value> = b.as_obj().unwrap().as_array().unwrap().elements.borrow().clone();
            a.as_obj().unwrap().as_array().unwrap().elements.borrow_mut().extend(tail);
            a
        } else if Self::is_array(b) {
            b.as_obj().unwrap().as_array().unwrap().elements.borrow_mut().insert(0, a);
            b
        } else {
            a.as_obj().unwrap().as_array().unwrap().elements.borrow_mut().push(b);
            a
        }
    }

    fn define_global(&mut self, long: bool) {
        let name = self.read_string(long);
        let value = self.peek(0);
        self.globals.set(name, value);
        self.pop();
    }

    fn get_global(&mut self, long: bool) -> Result<(), RuntimeError> {
        let name = self.read_string(long);
        match self.globals.get(name) {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => Err(self.runtime_error(format!("Undefined variable '{}'", name_str(name)))),
        }
    }

    fn set_global(&mut self, long: bool) -> Result<(), RuntimeError> {
        let name = self.read_string(long);
        let value = self.peek(0);
        if self.globals.set(name, value) {
            self.globals.delete(name);
            return Err(self.runtime_error(format!("Undefined variable '{}'", name_str(name))));
        }
        Ok(())
    }

    fn build_array(&mut self, long: bool) {
        let count = if long { self.read_u24() as usize } else { self.read_u8() as usize };
        let start = self.stack.len() - count;
        let elements: Vec<Value> = self.stack[start..].to_vec();
        let array = self.alloc_obj(Obj::Array(ObjArray::new(elements.clone())), &elements);
        self.stack.truncate(start);
        self.push(Value::from_obj(array));
    }

    fn get_index(&mut self) -> Result<(), RuntimeError> {
        let index = self.peek(0);
        if let Some(n) = index.as_number() {
            if n.fract() != 0.0 {
                return Err(self.runtime_error("Index must evaluate to integer number"));
            }
            let receiver = self.peek(1);
            let obj = receiver
                .as_obj()
                .filter(|o| matches!(&**o, Obj::Array(_) | Obj::String(_)))
                .ok_or_else(|| self.runtime_error("Can only index into Array object or String literal"))?;
            self.pop();
            self.pop();
            match &*obj {
                Obj::Array(a) => {
                    let elements = a.elements.borrow();
                    let idx = (n as i64).rem_euclid(elements.len() as i64) as usize;
                    self.push(elements[idx]);
                }
                Obj::String(s) => {
                    let bytes = s.bytes.borrow();
                    let idx = (n as i64).rem_euclid(bytes.len() as i64) as usize;
                    let ch = [bytes[idx]];
                    let value = self.intern_string(&ch);
                    self.push(value);
                }
                _ => unreachable!(),
            }
            Ok(())
        } else if Self::is_string(index) {
            let receiver = self.peek(1);
            let instance = receiver
                .as_obj()
                .filter(|o| matches!(&**o, Obj::Instance(_)))
                .ok_or_else(|| self.runtime_error("Can only get field of instance"))?;
            let key = self.pop().as_obj().unwrap();
            self.pop();
            let found = instance.as_instance().unwrap().fields.borrow().get(key);
            match found {
                Some(v) => {
                    self.push(v);
                    Ok(())
                }
                None => Err(self.runtime_error(format!("Undefined property '{}'", name_str(key)))),
            }
        } else {
            Err(self.runtime_error("Undefined indexing operation"))
        }
    }

    fn set_index(&mut self) -> Result<(), RuntimeError> {
        let index = self.peek(1);
        if let Some(n) = index.as_number() {
            if n.fract() != 0.0 {
                return Err(self.runtime_error("Index must evaluate to integer number"));
            }
            let receiver = self.peek(2);
            let obj = receiver
                .as_obj()
                .filter(|o| matches!(&**o, Obj::Array(_) | Obj::String(_)))
                .ok_or_else(|| self.runtime_error("Can only index into Array object or String literal"))?;
            let new_val = self.pop();
            self.pop();
            match &*obj {
                Obj::Array(a) => {
                    let mut elements = a.elements.borrow_mut();
                    let idx = (n as i64).rem_euclid(elements.len() as i64) as usize;
                    elements[idx] = new_val;
                    drop(elements);
                    self.pop();
                    self.push(new_val);
                    Ok(())
                }
                Obj::String(s) => {
                    let replacement = new_val
                        .as_obj()
                        .filter(|o| matches!(&**o, Obj::String(r) if r.bytes.borrow().len() == 1));
                    match replacement {
                        Some(r) => {
                            let byte = r.as_string().unwrap().bytes.borrow()[0];
                            let mut bytes = s.bytes.borrow_mut();
                            let idx = (n as i64).rem_euclid(bytes.len() as i64) as usize;
                            bytes[idx] = byte;
                            drop(bytes);
                            self.pop();
                            self.push(new_val);
                            Ok(())
                        }
                        None => Err(self.runtime_error("Can only assign characters to indices of strings")),
                    }
                }
                _ => unreachable!(),
            }
        } else if Self::is_string(index) {
            let receiver = self.peek(2);
            let instance = receiver
                .as_obj()
                .filter(|o| matches!(&**o, Obj::Instance(_)))
                .ok_or_else(|| self.runtime_error("Can only set field of instance"))?;
            let key = index.as_obj().unwrap();
            let new_val = self.peek(0);
            instance.as_instance().unwrap().fields.borrow_mut().set(key, new_val);
            self.pop();
            self.pop();
            self.pop();
            self.push(new_val);
            Ok(())
        } else {
            Err(self.runtime_error("Undefined indexing operation"))
        }
    }

    fn make_closure(&mut self, long: bool) {
        let function_obj = self.read_constant(long).as_obj().unwrap();
        // Shield the function constant on the stack before resolving
        // upvalues, which may themselves allocate and trigger a GC.
        self.push(Value::from_obj(function_obj));
        let upvalue_count = function_obj.as_function().unwrap().upvalue_count;
        let mut upvalues = Vec::with_capacity(upvalue_count as usize);
        for _ in 0..upvalue_count {
            let is_local = self.read_u8() != 0;
            let index = self.read_u24() as usize;
            let uv = if is_local {
                let base = self.frames.last().unwrap().slots;
                self.capture_upvalue(base + index)
            } else {
                self.current_closure().upvalues[index]
            };
            upvalues.push(uv);
        }
        let closure = self.alloc_obj(
            Obj::Closure(ObjClosure {
                function: function_obj,
                upvalues: upvalues.into_boxed_slice(),
            }),
            &[Value::from_obj(function_obj)],
        );
        self.pop();
        self.push(Value::from_obj(closure));
    }

    fn define_method(&mut self, name: GcRef<Obj>) {
        let method = self.peek(0);
        let class = self.peek(1).as_obj().unwrap();
        let is_init = name.as_string().map(|s| &**s.bytes.borrow() == b"init").unwrap_or(false);
        if is_init {
            class.as_class().unwrap().init.set(Some(method.as_obj().unwrap()));
        } else {
            class.as_class().unwrap().methods.borrow_mut().set(name, method);
        }
        self.pop();
    }

    fn get_property(&mut self, long: bool) -> Result<(), RuntimeError> {
        let receiver = self.peek(0);
        let instance = receiver
            .as_obj()
            .filter(|o| matches!(&**o, Obj::Instance(_)))
            .ok_or_else(|| self.runtime_error("Only instances have properties"))?;
        let name = self.read_string(long);
        let field = instance.as_instance().unwrap().fields.borrow().get(name);
        match field {
            Some(v) => {
                self.pop();
                self.push(v);
                Ok(())
            }
            None => {
                let class = instance.as_instance().unwrap().class;
                self.bind_method(class, name)
            }
        }
    }

    fn set_property(&mut self, long: bool) -> Result<(), RuntimeError> {
        let receiver = self.peek(1);
        let instance = receiver
            .as_obj()
            .filter(|o| matches!(&**o, Obj::Instance(_)))
            .ok_or_else(|| self.runtime_error("Only properties of instances can be set to a value"))?;
        let name = self.read_string(long);
        let value = self.peek(0);
        instance.as_instance().unwrap().fields.borrow_mut().set(name, value);
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn name_str(sym: GcRef<Obj>) -> String {
    sym.as_string().map(|s| s.as_str_lossy()).unwrap_or_default()
}
