//! Seq Compiler: a single-pass Pratt compiler from source text directly to
//! bytecode, with no intermediate AST.
//!
//! [`compile`] is the only entry point most callers need; it scans, parses,
//! and emits in one pass, returning the finished top-level `ObjFunction` or
//! the list of compile errors collected along the way (parsing continues
//! past a syntax error by resynchronizing at the next statement boundary, so
//! a single run can report more than one).

mod compiler;
mod error;
mod precedence;
mod scanner;
mod token;

pub use compiler::{Compiler, FunctionType};
pub use error::CompileError;
pub use precedence::{infix_precedence, Precedence};
pub use scanner::{Scanner, ScannerState};
pub use token::{Token, TokenKind};

use seq_core::object::{Heap, Obj};
use seq_core::intern::Interner;
use tracing::debug;

/// Compiles `source` into a top-level script function, or the list of
/// errors encountered.
pub fn compile<'heap>(
    source: &str,
    heap: &'heap Heap,
    interner: &mut Interner<'heap>,
) -> Result<*mut Obj, Vec<CompileError>> {
    debug!(bytes = source.len(), "compiling source");
    let result = Compiler::compile(source, heap, interner);
    match &result {
        Ok(_) => debug!("compile succeeded"),
        Err(errs) => debug!(error_count = errs.len(), "compile failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use seq_core::object::ObjKind;

    fn compile_ok(src: &str) -> *mut Obj {
        let heap = Box::leak(Box::new(Heap::new()));
        let interner = Box::leak(Box::new(Interner::new(heap)));
        compile(src, heap, interner).unwrap_or_else(|errs| {
            panic!("expected successful compile, got errors: {errs:?}")
        })
    }

    fn disassemble_lengths(script: *mut Obj) -> usize {
        unsafe {
            match &(*script).kind {
                ObjKind::Function(f) => f.chunk.len(),
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn compiles_arithmetic_expression_statement() {
        let script = compile_ok("1 + 2 * 3\n");
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_inferred_declaration_and_print() {
        let script = compile_ok("x := 10\nprint(x)\n");
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_if_else_chain() {
        let script = compile_ok(
            r#"
            x := 5
            if x < 0 {
                print(-1)
            } else if x == 0 {
                print(0)
            } else {
                print(1)
            }
            "#,
        );
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_for_loop_with_break_and_continue() {
        let script = compile_ok(
            r#"
            i := 0
            for i < 10 {
                i = i + 1
                if i == 3 {
                    continue
                }
                if i == 8 {
                    break
                }
            }
            "#,
        );
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_function_declaration_and_call() {
        let script = compile_ok(
            r#"
            add(a int, b int) int {
                return a + b
            }
            print(add(1, 2))
            "#,
        );
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_closure_capturing_enclosing_local() {
        let script = compile_ok(
            r#"
            make_counter() {
                count := 0
                increment() {
                    count = count + 1
                    return count
                }
                return increment
            }
            "#,
        );
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_type_declaration_with_method() {
        let script = compile_ok(
            r#"
            type Point {
                x: int
                y: int
                sum(self) int {
                    return self.x + self.y
                }
            }
            p := Point
            print(p.sum())
            "#,
        );
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_array_literal_and_indexing() {
        let script = compile_ok(
            r#"
            arr := [1, 2, 3]
            arr[0] = 9
            print(arr[0])
            "#,
        );
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn compiles_match_statement_with_wildcard() {
        let script = compile_ok(
            r#"
            x := 2
            match x {
                1 {
                    print("one")
                }
                2 {
                    print("two")
                }
                _ {
                    print("other")
                }
            }
            "#,
        );
        assert!(disassemble_lengths(script) > 0);
    }

    #[test]
    fn reports_error_on_unclosed_block() {
        let heap = Box::leak(Box::new(Heap::new()));
        let interner = Box::leak(Box::new(Interner::new(heap)));
        let result = compile("if true {\n  print(1)\n", heap, interner);
        assert!(result.is_err());
    }

    #[test]
    fn reports_error_on_own_initializer_reference() {
        let heap = Box::leak(Box::new(Heap::new()));
        let interner = Box::leak(Box::new(Interner::new(heap)));
        let result = compile("f() {\n  x := x\n}\n", heap, interner);
        assert!(result.is_err());
    }
}
