//! The global string intern table.
//!
//! Every string literal the compiler emits and every string the VM
//! produces at runtime (concatenation results, `stringify`) passes through
//! [`Interner::intern`], which guarantees at most one heap `ObjString` ever
//! exists for a given sequence of bytes. That guarantee is what lets
//! [`crate::value::Value::values_equal`] compare strings by pointer.

use crate::object::{fnv1a, Heap, Obj, ObjKind, ObjString};
use crate::table::Table;

pub struct Interner<'heap> {
    heap: &'heap Heap,
    strings: Table<()>,
}

impl<'heap> Interner<'heap> {
    pub fn new(heap: &'heap Heap) -> Self {
        Interner { heap, strings: Table::new() }
    }

    /// Returns the unique heap representative for `s`, allocating one if
    /// this is the first time this content has been interned.
    pub fn intern(&mut self, s: &str) -> *mut Obj {
        let hash = fnv1a(s.as_bytes());
        if let Some(existing) = self.strings.find_string(s, hash) {
            return existing;
        }
        let ptr = self.heap.alloc(ObjKind::String(ObjString::new(s)));
        self.strings.insert(ptr, ());
        ptr
    }

    /// Concatenates `a` and `b` and interns the result in one pass, without
    /// allocating an intermediate owned `String` twice over.
    pub fn intern_concat(&mut self, a: &str, b: &str) -> *mut Obj {
        let mut buf = String::with_capacity(a.len() + b.len());
        buf.push_str(a);
        buf.push_str(b);
        self.intern(&buf)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_interning_returns_same_pointer() {
        let heap = Heap::new();
        let mut interner = Interner::new(&heap);
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert!(std::ptr::eq(a, b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_content_interns_distinct_pointers() {
        let heap = Heap::new();
        let mut interner = Interner::new(&heap);
        let a = interner.intern("a");
        let b = interner.intern("b");
        assert!(!std::ptr::eq(a, b));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn intern_concat_matches_manual_concat() {
        let heap = Heap::new();
        let mut interner = Interner::new(&heap);
        let concatenated = interner.intern_concat("foo", "bar");
        let direct = interner.intern("foobar");
        assert!(std::ptr::eq(concatenated, direct));
    }
}
