//! Chunk disassembler. Lives outside the core on purpose — a debug printer
//! has no business affecting what the VM does, only what a developer sees.
//! Mirrors the `disassemble_chunk`/`disassemble_instruction` split from
//! the reference clox implementation, one instruction kind per helper.

use std::fmt::Write as _;

use ember_vm::{Chunk, Obj, ObjFunction, OpCode};

/// Disassembles a compiled function and every function nested inside its
/// constant pool, recursively. The top-level script function prints as
/// `<script>`, matching clox's convention for the implicit outer function.
pub fn disassemble_program(function: &ObjFunction) -> String {
    let mut out = String::new();
    disassemble_function(function, &mut out);
    out
}

fn disassemble_function(function: &ObjFunction, out: &mut String) {
    let name = function_label(function);
    out.push_str(&disassemble_chunk(&function.chunk, &name));
    for constant in &function.chunk.constants {
        if let Some(obj) = constant.as_obj() {
            if let Obj::Function(nested) = &*obj {
                out.push('\n');
                disassemble_function(nested, out);
            }
        }
    }
}

fn function_label(function: &ObjFunction) -> String {
    match &function.name {
        None => "<script>".to_string(),
        Some(name_obj) => match &**name_obj {
            Obj::String(s) => String::from_utf8_lossy(&s.bytes.borrow()).into_owned(),
            _ => "<fn>".to_string(),
        },
    }
}

pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {name} ===");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, &mut out);
    }
    out
}

fn disassemble_instruction(chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{offset:04} ");
    let line = chunk.line_for_offset(offset);
    if offset > 0 && line == chunk.line_for_offset(offset - 1) {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{line:4} ");
    }

    let op = OpCode::from_u8(chunk.code[offset]);
    match op {
        OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Negate
        | OpCode::Not
        | OpCode::Equal
        | OpCode::NotEqual
        | OpCode::Less
        | OpCode::LessEqual
        | OpCode::Greater
        | OpCode::GreaterEqual
        | OpCode::Nil
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::CloseUpvalue
        | OpCode::GetIndex
        | OpCode::SetIndex
        | OpCode::Return
        | OpCode::Print
        | OpCode::Inherit => simple_instruction(op, offset, out),

        OpCode::Constant => constant_instruction_u8(op, chunk, offset, out),
        OpCode::ConstantLong => constant_instruction_u24(op, chunk, offset, out),

        OpCode::PopN => u24_operand_instruction(op, chunk, offset, out),

        OpCode::DefineGlobal | OpCode::GetGlobal | OpCode::SetGlobal => {
            constant_instruction_u8(op, chunk, offset, out)
        }
        OpCode::DefineGlobalLong | OpCode::GetGlobalLong | OpCode::SetGlobalLong => {
            constant_instruction_u24(op, chunk, offset, out)
        }

        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue => {
            u24_operand_instruction(op, chunk, offset, out)
        }

        OpCode::Array => u8_operand_instruction(op, chunk, offset, out),
        OpCode::ArrayLong => u24_operand_instruction(op, chunk, offset, out),

        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(op, chunk, offset, 1, out),
        OpCode::Loop => jump_instruction(op, chunk, offset, -1, out),

        OpCode::Call => u8_operand_instruction(op, chunk, offset, out),

        OpCode::Closure => closure_instruction(op, chunk, offset, true, out),
        OpCode::ClosureLong => closure_instruction(op, chunk, offset, false, out),

        OpCode::Class | OpCode::Method => constant_instruction_u8(op, chunk, offset, out),
        OpCode::GetPropLong | OpCode::SetPropLong => constant_instruction_u24(op, chunk, offset, out),
        OpCode::GetProp | OpCode::SetProp => constant_instruction_u8(op, chunk, offset, out),
        OpCode::GetSuper => constant_instruction_u8(op, chunk, offset, out),

        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(op, chunk, offset, out),
    }
}

fn simple_instruction(op: OpCode, offset: usize, out: &mut String) -> usize {
    let _ = writeln!(out, "{op:?}");
    offset + 1
}

fn u8_operand_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let operand = chunk.code[offset + 1];
    let _ = writeln!(out, "{op:<16?} {operand:4}");
    offset + 2
}

fn u24_operand_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let operand = chunk.read_u24(offset + 1);
    let _ = writeln!(out, "{op:<16?} {operand:4}");
    offset + 4
}

fn constant_instruction_u8(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let _ = writeln!(out, "{op:<16?} {index:4} '{}'", chunk.constants[index]);
    offset + 2
}

fn constant_instruction_u24(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.read_u24(offset + 1) as usize;
    let _ = writeln!(out, "{op:<16?} {index:4} '{}'", chunk.constants[index]);
    offset + 4
}

fn jump_instruction(op: OpCode, chunk: &Chunk, offset: usize, sign: i32, out: &mut String) -> usize {
    let delta = chunk.read_u24(offset + 1) as i32;
    let target = offset as i32 + 4 + sign * delta;
    let _ = writeln!(out, "{op:<16?} {offset:4} -> {target}");
    offset + 4
}

fn closure_instruction(
    op: OpCode,
    chunk: &Chunk,
    offset: usize,
    short: bool,
    out: &mut String,
) -> usize {
    let (index, mut next) = if short {
        (chunk.code[offset + 1] as usize, offset + 2)
    } else {
        (chunk.read_u24(offset + 1) as usize, offset + 4)
    };
    let _ = writeln!(out, "{op:<16?} {index:4} '{}'", chunk.constants[index]);

    let upvalue_count = match &*chunk.constants[index].as_obj().unwrap() {
        ember_vm::Obj::Function(f) => f.upvalue_count,
        _ => 0,
    };
    for _ in 0..upvalue_count {
        let is_local = chunk.code[next];
        let upvalue_index = chunk.read_u24(next + 1);
        let kind = if is_local != 0 { "local" } else { "upvalue" };
        let _ = writeln!(out, "{next:04}      |                     {kind} {upvalue_index}");
        next += 4;
    }
    next
}

fn invoke_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let arg_count = chunk.code[offset + 2];
    let _ = writeln!(
        out,
        "{op:<16?} ({arg_count} args) {index:4} '{}'",
        chunk.constants[index]
    );
    offset + 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_vm::Vm;

    fn disassemble(source: &str) -> String {
        let mut vm = Vm::new();
        let function = ember_compile::compile(&mut vm, source).expect("compile error");
        let f = match &*function {
            ember_vm::Obj::Function(f) => f,
            _ => panic!("expected a function"),
        };
        disassemble_chunk(&f.chunk, "test")
    }

    #[test]
    fn header_names_the_chunk() {
        let out = disassemble("1;");
        assert!(out.starts_with("=== test ===\n"));
    }

    #[test]
    fn constant_instruction_shows_resolved_value() {
        let out = disassemble("1;");
        assert!(out.contains("Constant"));
        assert!(out.contains("'1'"));
    }

    #[test]
    fn repeated_line_collapses_to_a_pipe() {
        let out = disassemble("1; 2;");
        assert!(out.contains("   | "));
    }

    #[test]
    fn jump_instruction_shows_a_resolved_target() {
        let out = disassemble("if (true) { 1; } else { 2; }");
        assert!(out.contains("JumpIfFalse"));
        assert!(out.contains("->"));
    }

    #[test]
    fn top_level_script_labels_as_script() {
        let mut vm = Vm::new();
        let function = ember_compile::compile(&mut vm, "1;").expect("compile error");
        let f = match &*function {
            ember_vm::Obj::Function(f) => f,
            _ => panic!("expected a function"),
        };
        let out = disassemble_program(f);
        assert!(out.starts_with("=== <script> ===\n"));
    }

    #[test]
    fn nested_functions_disassemble_after_their_enclosing_chunk() {
        let mut vm = Vm::new();
        let function =
            ember_compile::compile(&mut vm, "fun add(a, b) { return a + b; } add(1, 2);")
                .expect("compile error");
        let f = match &*function {
            ember_vm::Obj::Function(f) => f,
            _ => panic!("expected a function"),
        };
        let out = disassemble_program(f);
        assert!(out.contains("=== <script> ==="));
        assert!(out.contains("=== add ==="));
        assert!(out.find("=== <script> ===").unwrap() < out.find("=== add ===").unwrap());
    }

    #[test]
    fn does_not_execute_the_program() {
        // A `print` statement in the source must never reach this printer's
        // output; disassembly only describes instructions, never runs them.
        let out = disassemble("print \"should not appear\";");
        assert!(!out.contains("should not appear"));
        assert!(out.contains("Print"));
    }
}
