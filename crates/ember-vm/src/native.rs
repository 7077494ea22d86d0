//! Host routines pre-installed into every VM's globals table.

use std::io::BufRead;

use crate::object::Obj;
use crate::value::Value;
use crate::vm::Vm;

pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, String>;

pub struct NativeDef {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

pub const NATIVES: &[NativeDef] = &[
    NativeDef {
        name: "clock",
        arity: 0,
        function: clock,
    },
    NativeDef {
        name: "sqrt",
        arity: 1,
        function: sqrt,
    },
    NativeDef {
        name: "input",
        arity: 0,
        function: input,
    },
    NativeDef {
        name: "len",
        arity: 1,
        function: len,
    },
];

fn clock(vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    Ok(Value::number(vm.vm_start.elapsed().as_secs_f64()))
}

fn sqrt(_vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    match args[0].as_number() {
        Some(n) => Ok(Value::number(n.sqrt())),
        None => Err("sqrt() requires a numeric argument".to_string()),
    }
}

fn input(vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| format!("input() failed: {e}"))?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(vm.intern_string(trimmed.as_bytes()))
}

fn len(_vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    if let Some(obj) = args[0].as_obj() {
        if let Obj::String(s) = &*obj {
            return Ok(Value::number(s.bytes.borrow().len() as f64));
        }
        if let Obj::Array(a) = &*obj {
            return Ok(Value::number(a.elements.borrow().len() as f64));
        }
    }
    Err("len() requires a string or array argument".to_string())
}
