//! Drives the built `seq` binary against the concrete end-to-end scenarios,
//! checking both stdout and the exit code the spec's CLI contract promises.

use std::fs;
use std::process::Command;

fn seq_bin() -> &'static str {
    env!("CARGO_BIN_EXE_seq")
}

fn run_source(source: &str) -> (String, String, i32) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("program.seq");
    fs::write(&path, source).unwrap();

    let output = Command::new(seq_bin()).arg(&path).output().unwrap();
    (
        String::from_utf8(output.stdout).unwrap(),
        String::from_utf8(output.stderr).unwrap(),
        output.status.code().unwrap(),
    )
}

#[test]
fn integer_arithmetic_precedence() {
    let (stdout, _, code) = run_source("print((10 + 5) * 3 - 2)\n");
    assert_eq!(stdout, "43\n");
    assert_eq!(code, 0);
}

#[test]
fn closure_capture_counts_up() {
    let (stdout, _, code) = run_source(
        r#"
        makeCounter() {
            count := 0
            increment() {
                count = count + 1
                return count
            }
            return increment
        }
        c := makeCounter()
        print(c())
        print(c())
        print(c())
        "#,
    );
    assert_eq!(stdout, "1\n2\n3\n");
    assert_eq!(code, 0);
}

#[test]
fn struct_with_method() {
    let (stdout, _, code) = run_source(
        r#"
        type Point {
            x: int
            y: int
            sum() int {
                return self.x + self.y
            }
        }
        p := Point(3, 4)
        print(p.sum())
        "#,
    );
    assert_eq!(stdout, "7\n");
    assert_eq!(code, 0);
}

#[test]
fn mixed_equality() {
    let (stdout, _, code) = run_source(
        "print(1 == 1.0)\nprint(\"a\" == \"a\")\nprint(nil == false)\n",
    );
    assert_eq!(stdout, "true\ntrue\nfalse\n");
    assert_eq!(code, 0);
}

#[test]
fn array_bounds_error_exits_70() {
    let (stdout, stderr, code) =
        run_source("a := [10, 20, 30]\nprint(a[1])\nprint(a[3])\n");
    assert_eq!(stdout, "20\n");
    assert!(stderr.contains("Array index 3 out of bounds [0, 3)."));
    assert_eq!(code, 70);
}

#[test]
fn string_concatenation() {
    let (stdout, _, code) = run_source("print(\"Hello, \" + \"World!\")\n");
    assert_eq!(stdout, "Hello, World!\n");
    assert_eq!(code, 0);
}

#[test]
fn missing_file_exits_74() {
    let output = Command::new(seq_bin())
        .arg("/nonexistent/path/does-not-exist.seq")
        .output()
        .unwrap();
    assert_eq!(output.status.code().unwrap(), 74);
}

#[test]
fn test_flag_runs_hand_built_sanity_check() {
    let output = Command::new(seq_bin()).arg("--test").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains('3'));
}
