//! `embert disasm` — compile a script and print its bytecode without ever
//! running it. Useful for inspecting what the compiler emitted for a given
//! piece of source.

use std::path::PathBuf;

use ember_drv::DriverError;
use ember_vm::{Obj, Vm};

use crate::disasm::disassemble_program;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DisasmArgs {
    pub path: PathBuf,
}

pub fn run_disasm(args: DisasmArgs) -> Result<i32> {
    let source = std::fs::read_to_string(&args.path).map_err(|source| {
        DriverError::Io {
            path: args.path.clone(),
            source,
        }
    })?;

    let mut vm = Vm::new();
    match ember_compile::compile(&mut vm, &source) {
        Ok(function) => {
            let f = match &*function {
                Obj::Function(f) => f,
                _ => unreachable!("compile() always returns a function"),
            };
            print!("{}", disassemble_program(f));
            Ok(0)
        }
        Err(diagnostics) => {
            for diagnostic in &diagnostics {
                eprintln!("{diagnostic}");
            }
            Ok(65)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn valid_script_disassembles_successfully() {
        let file = write_script("print 1 + 2;");
        let args = DisasmArgs {
            path: file.path().to_path_buf(),
        };
        assert_eq!(run_disasm(args).unwrap(), 0);
    }

    #[test]
    fn compile_error_exits_65_without_a_chunk() {
        let file = write_script("var = 1;");
        let args = DisasmArgs {
            path: file.path().to_path_buf(),
        };
        assert_eq!(run_disasm(args).unwrap(), 65);
    }
}
