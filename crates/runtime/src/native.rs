//! Native-function registration contract.
//!
//! Host code registers functions by source-language name into the VM's
//! globals table before execution begins. A native always operates on the
//! stable tagged-union [`Value`] interface — the VM converts to/from
//! whichever encoding `RuntimeValue` resolves to at the call boundary, so a
//! native never has to know or care which encoding is active.

use seq_core::object::{NativeFn, Obj, ObjKind, ObjNative};
use seq_core::value::Value;
use seq_core::Heap;

/// Allocates a `Native` heap object wrapping `func` under `name`, ready to
/// be inserted into the VM's globals table.
pub fn make_native(heap: &Heap, name: &str, func: NativeFn) -> *mut Obj {
    heap.alloc(ObjKind::Native(ObjNative { name: name.into(), func }))
}

/// `len(v)`: length of a string or array.
pub fn native_len(args: &[Value]) -> Result<Value, String> {
    let v = args.first().ok_or("len: expected 1 argument")?;
    match v {
        Value::Obj(ptr) => unsafe {
            match &(**ptr).kind {
                ObjKind::String(s) => Ok(Value::Int(s.len() as i64)),
                ObjKind::Array(arr) => Ok(Value::Int(arr.borrow().values.len() as i64)),
                _ => Err("len: argument must be a string or array".to_string()),
            }
        },
        _ => Err("len: argument must be a string or array".to_string()),
    }
}

/// `assert(cond, msg)`: the §7 `assert` native — terminates the process on
/// failure rather than raising a catchable runtime error.
pub fn native_assert(args: &[Value]) -> Result<Value, String> {
    let cond = args.first().ok_or("assert: expected 2 arguments")?;
    let msg = args.get(1).map(|v| v.stringify()).unwrap_or_else(|| "assertion failed".to_string());
    if !cond.is_truthy() {
        eprintln!("{msg}");
        std::process::exit(70);
    }
    Ok(Value::Nil)
}

/// `error(msg)`: the §7 `error` native — always terminates the process.
pub fn native_error(args: &[Value]) -> Result<Value, String> {
    let msg = args.first().map(|v| v.stringify()).unwrap_or_default();
    eprintln!("{msg}");
    std::process::exit(70);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_reports_string_length() {
        let heap = Heap::new();
        let obj = heap.alloc(ObjKind::String(seq_core::object::ObjString::new("hello")));
        let result = native_len(&[Value::Obj(obj)]).unwrap();
        assert!(matches!(result, Value::Int(5)));
    }
}
