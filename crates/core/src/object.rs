//! Heap objects and the intrusive per-VM object list.
//!
//! Every heap allocation is a `Box<Obj>` immediately leaked into a raw
//! pointer and threaded onto [`Heap`]'s intrusive singly-linked list via
//! `Obj::next`. This mirrors the header-plus-variant layout described in the
//! data model: a common header (`marked`, `next`) in front of a tagged
//! payload (`ObjKind`). Nothing is freed until the `Heap` itself drops, which
//! walks the list once and reclaims every object — the "free-all-on-shutdown"
//! policy the design explicitly allows while reserving `marked` for a future
//! mark-sweep pass.

use std::cell::{Cell, RefCell};

use crate::chunk::Chunk;
use crate::value::Value;

/// Common header shared by every heap object, plus its tagged payload.
pub struct Obj {
    pub kind: ObjKind,
    pub marked: Cell<bool>,
    next: Cell<*mut Obj>,
}

pub enum ObjKind {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Array(RefCell<ObjArray>),
    StructDef(ObjStructDef),
    Struct(ObjStruct),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ObjKind::String(_) => "string",
            ObjKind::Function(_) => "function",
            ObjKind::Native(_) => "native",
            ObjKind::Closure(_) => "closure",
            ObjKind::Upvalue(_) => "upvalue",
            ObjKind::Array(_) => "array",
            ObjKind::StructDef(_) => "struct def",
            ObjKind::Struct(_) => "struct",
            ObjKind::BoundMethod(_) => "bound method",
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match &self.kind {
            ObjKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match &self.kind {
            ObjKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match &self.kind {
            ObjKind::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_struct_def(&self) -> Option<&ObjStructDef> {
        match &self.kind {
            ObjKind::StructDef(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&ObjStruct> {
        match &self.kind {
            ObjKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match &self.kind {
            ObjKind::Upvalue(u) => Some(u),
            _ => None,
        }
    }
}

/// Immutable byte sequence with a cached FNV-1a hash. Every `ObjString`
/// reachable at runtime is present in the VM's string intern table, so
/// equality between two interned strings reduces to pointer equality.
pub struct ObjString {
    bytes: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(s: &str) -> Self {
        ObjString {
            bytes: s.into(),
            hash: fnv1a(s.as_bytes()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// FNV-1a, 32-bit. Used both for interning lookups and the globals/intern
/// hash table's bucket index.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    /// None for the top-level script function.
    pub name: Option<*mut Obj>,
}

impl ObjFunction {
    pub fn new(name: Option<*mut Obj>) -> Self {
        ObjFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }

    pub fn name_str(&self) -> &str {
        match self.name {
            Some(ptr) => unsafe { (*ptr).as_string().expect("function name is a string").as_str() },
            None => "script",
        }
    }
}

pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub name: Box<str>,
    pub func: NativeFn,
}

/// Describes where an upvalue's slot lives at the moment a closure captures
/// it: either a local slot in the immediately-enclosing function, or an
/// already-captured upvalue slot in the enclosing closure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    pub is_local: bool,
    pub index: u8,
}

pub struct ObjClosure {
    pub function: *mut Obj,
    pub upvalues: Box<[*mut Obj]>,
}

/// An open upvalue aliases a VM stack slot; a closed upvalue owns its value.
/// Open upvalues additionally form a singly-linked list (via `open_next`)
/// sorted strictly descending by stack address, per the VM's open-upvalue
/// invariant.
#[derive(Clone, Copy)]
pub enum UpvalueLoc {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub loc: Cell<UpvalueLoc>,
    open_next: Cell<*mut Obj>,
}

impl ObjUpvalue {
    pub fn new_open(stack_index: usize) -> Self {
        ObjUpvalue {
            loc: Cell::new(UpvalueLoc::Open(stack_index)),
            open_next: Cell::new(std::ptr::null_mut()),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.loc.get(), UpvalueLoc::Open(_))
    }

    pub fn stack_index(&self) -> Option<usize> {
        match self.loc.get() {
            UpvalueLoc::Open(i) => Some(i),
            UpvalueLoc::Closed(_) => None,
        }
    }

    /// Next node in the VM's sorted open-upvalue list. `null` at the tail.
    pub fn open_next(&self) -> *mut Obj {
        self.open_next.get()
    }

    pub fn set_open_next(&self, next: *mut Obj) {
        self.open_next.set(next);
    }
}

pub struct ObjArray {
    pub values: Vec<Value>,
}

pub struct ObjStructDef {
    pub name: *mut Obj,
    /// Declaration-order field names.
    pub fields: Vec<*mut Obj>,
    /// name pointer -> field index, used once `fields.len() > 8`.
    pub field_index: std::collections::HashMap<*mut Obj, usize>,
    /// method name pointer -> closure object.
    pub methods: std::collections::HashMap<*mut Obj, *mut Obj>,
}

impl ObjStructDef {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Resolve a field name to its index, using a linear scan for small
    /// structs (<= 8 fields) and the index map otherwise, per the VM's
    /// `GET_FIELD`/`SET_FIELD` semantics.
    pub fn find_field(&self, name: *mut Obj) -> Option<usize> {
        if self.fields.len() <= 8 {
            self.fields.iter().position(|&f| f == name)
        } else {
            self.field_index.get(&name).copied()
        }
    }
}

pub struct ObjStruct {
    pub def: *mut Obj,
    pub fields: RefCell<Box<[Value]>>,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: *mut Obj,
}

/// Intrusive, VM-owned list of every live heap allocation. Objects are
/// linked in at allocation time and walked once, on drop, to free
/// everything — the conservative "free-all-on-shutdown" policy.
pub struct Heap {
    head: Cell<*mut Obj>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            head: Cell::new(std::ptr::null_mut()),
        }
    }

    pub fn alloc(&self, kind: ObjKind) -> *mut Obj {
        let obj = Box::new(Obj {
            kind,
            marked: Cell::new(false),
            next: Cell::new(self.head.get()),
        });
        let ptr = Box::into_raw(obj);
        self.head.set(ptr);
        ptr
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut cur = self.head.get();
        while !cur.is_null() {
            unsafe {
                let next = (*cur).next.get();
                drop(Box::from_raw(cur));
                cur = next;
            }
        }
    }
}
