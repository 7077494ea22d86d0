//! `embert run` — compile and execute a script file to completion.

use std::path::PathBuf;

use ember_drv::{run_file_with_vm, Config};
use ember_vm::Vm;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub path: PathBuf,
    pub gc_stress: bool,
    pub config: Config,
}

pub fn run_run(args: RunArgs) -> Result<i32> {
    let mut vm = Vm::new();
    vm.gc_stress = args.gc_stress || vm.gc_stress;
    vm.heap.stress = vm.gc_stress;
    vm.heap
        .set_next_gc_threshold(args.config.gc.initial_threshold_bytes);

    let code = run_file_with_vm(&args.path, &mut vm)?;
    Ok(code)
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
    fn successful_script_exits_zero() {
        let file = write_script("var x = 1 + 2;");
        let args = RunArgs {
            path: file.path().to_path_buf(),
            gc_stress: false,
            config: Config::default(),
        };
        assert_eq!(run_run(args).unwrap(), 0);
    }

    #[test]
    fn runtime_error_exits_65() {
        let file = write_script("var x = 1 / 0;");
        let args = RunArgs {
            path: file.path().to_path_buf(),
            gc_stress: false,
            config: Config::default(),
        };
        assert_eq!(run_run(args).unwrap(), 65);
    }

    #[test]
    fn gc_stress_flag_still_runs_to_completion() {
        let file = write_script("var x = [1, 2, 3]; print x;");
        let args = RunArgs {
            path: file.path().to_path_buf(),
            gc_stress: true,
            config: Config::default(),
        };
        assert_eq!(run_run(args).unwrap(), 0);
    }
}
