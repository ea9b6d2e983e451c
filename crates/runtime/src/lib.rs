//! Seq Runtime: the bytecode virtual machine.
//!
//! Compiles nothing itself — it takes the `*mut Obj` script function handed
//! back by `seqc::compile` and drives it through a `Vm`'s dispatch loop.
//!
//! # Modules
//!
//! - `vm`: the `Vm` struct and its opcode dispatch loop.
//! - `frame`: a single call frame (`closure`, `ip`, `slots_base`).
//! - `error`: `RuntimeError` and the canonical error-message taxonomy.
//! - `config`: `VmConfig`, the knobs `seq-cli` exposes as flags.
//! - `native`: the native-function registration contract and the built-in
//!   `len`/`assert`/`error` natives.

pub mod config;
pub mod error;
pub mod frame;
pub mod native;
pub mod vm;

pub use config::VmConfig;
pub use error::{RuntimeError, TraceFrame};
pub use vm::Vm;

use seq_core::intern::Interner;
use seq_core::Heap;

/// Builds a `Vm` over a fresh heap and interner, with the standard native
/// functions (`len`, `assert`, `error`) already registered.
pub fn new_vm(heap: &Heap, config: VmConfig) -> Vm<'_> {
    let interner = Interner::new(heap);
    let mut vm = Vm::new(heap, interner, config);
    vm.define_native("len", native::native_len);
    vm.define_native("assert", native::native_assert);
    vm.define_native("error", native::native_error);
    vm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_arithmetic_and_prints_result() {
        let heap = Heap::new();
        let mut vm = new_vm(&heap, VmConfig::default());
        vm.interpret("print(1 + 2 * 3)", None).unwrap();
    }

    #[test]
    fn reports_division_by_zero() {
        let heap = Heap::new();
        let mut vm = new_vm(&heap, VmConfig::default());
        let err = vm.interpret("print(1 / 0)", None).unwrap_err();
        assert_eq!(err.message, "Division by zero.");
    }

    #[test]
    fn closure_captures_enclosing_local() {
        let heap = Heap::new();
        let mut vm = new_vm(&heap, VmConfig::default());
        let src = r#"
            make_counter() {
                n := 0
                increment() {
                    n = n + 1
                    return n
                }
                return increment
            }
            counter := make_counter()
            counter()
            counter()
            print(counter())
        "#;
        vm.interpret(src, None).unwrap();
    }

    #[test]
    fn struct_field_and_method_dispatch() {
        let heap = Heap::new();
        let mut vm = new_vm(&heap, VmConfig::default());
        let src = r#"
            type Point {
                x: int
                y: int
                sum() int {
                    return self.x + self.y
                }
            }
            p := Point(3, 4)
            print(p.sum())
        "#;
        vm.interpret(src, None).unwrap();
    }

    #[test]
    fn array_index_out_of_bounds_reports_exact_message() {
        let heap = Heap::new();
        let mut vm = new_vm(&heap, VmConfig::default());
        let err =
            vm.interpret("arr := [1, 2, 3]\nprint(arr[5])", None).unwrap_err();
        assert_eq!(err.message, "Array index 5 out of bounds [0, 3).");
    }

    #[test]
    fn mixed_equality_matches_numeric_and_identity_rules() {
        let heap = Heap::new();
        let mut vm = new_vm(&heap, VmConfig::default());
        vm.interpret(
            r#"
            print(1 == 1.0)
            print("a" == "a")
            print(nil == false)
            "#,
            None,
        )
        .unwrap();
    }

    #[test]
    fn string_concatenation_and_mixed_stringify() {
        let heap = Heap::new();
        let mut vm = new_vm(&heap, VmConfig::default());
        vm.interpret(r#"print("n=" + 7)"#, None).unwrap();
    }
}
