//! CLI end-to-end tests: drive the real `embert` binary as a subprocess and
//! check its exit code and streams, the way a terminal user would see it.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn embert() -> Command {
    Command::cargo_bin("embert").unwrap()
}

fn write_script(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{content}").unwrap();
    file
}

#[test]
fn help_lists_the_subcommands() {
    embert()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("disasm")));
}

#[test]
fn version_flag_reports_value_representation() {
    embert()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nan-boxing"));
}

#[test]
fn run_exits_zero_on_success() {
    let file = write_script("print 1 + 1;");
    embert()
        .arg("run")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("2"));
}

#[test]
fn run_exits_65_on_a_runtime_error() {
    let file = write_script("var x = 1 / 0;");
    embert().arg("run").arg(file.path()).assert().code(65);
}

#[test]
fn run_exits_65_on_a_compile_error() {
    let file = write_script("var = 1;");
    embert().arg("run").arg(file.path()).assert().code(65);
}

#[test]
fn run_on_a_missing_file_exits_74() {
    embert()
        .arg("run")
        .arg("/nonexistent/does-not-exist.ember")
        .assert()
        .code(74);
}

#[test]
fn disasm_never_executes_the_program() {
    let file = write_script("print \"should not run\";");
    embert()
        .arg("disasm")
        .arg(file.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("should not run")
                .not()
                .and(predicate::str::contains("=== <script> ===")),
        );
}

#[test]
fn disasm_reports_compile_errors_with_exit_65() {
    let file = write_script("var = 1;");
    embert().arg("disasm").arg(file.path()).assert().code(65);
}
