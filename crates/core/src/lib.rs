//! Seq Core: value representation, heap object model, and string interning.
//!
//! This crate is the shared foundation beneath the compiler and the VM. It
//! owns no control flow of its own — it defines what a `Value` *is*, how
//! heap objects are laid out and tracked, and the open-addressing hash table
//! used for both string interning and the VM's globals table.
//!
//! # Modules
//!
//! - `value`: the tagged-union `Value` encoding (one `Value` per type tag).
//! - `nanbox`: the 8-byte NaN-boxed encoding, used when `feature = "tagged"`
//!   is not enabled. Both encodings expose the same operations.
//! - `object`: heap object variants (`ObjString`, `ObjFunction`, `ObjClosure`,
//!   `ObjUpvalue`, `ObjArray`, `ObjStructDef`, `ObjStruct`, `ObjBoundMethod`)
//!   and the intrusive per-VM object list.
//! - `intern`: the global string intern table.
//! - `table`: the open-addressing hash table shared by the intern table and
//!   the VM's globals table.
//! - `chunk`: the bytecode container (`Chunk`) owned by every `ObjFunction`.
//! - `opcode`: the instruction set.

pub mod chunk;
pub mod intern;
pub mod nanbox;
pub mod object;
pub mod opcode;
pub mod table;
pub mod value;

pub use chunk::Chunk;
pub use object::{
    Heap, Obj, ObjArray, ObjBoundMethod, ObjClosure, ObjFunction, ObjKind, ObjNative, ObjStruct,
    ObjStructDef, ObjUpvalue, UpvalueLoc,
};
pub use opcode::OpCode;
pub use table::Table;
pub use value::Value;

#[cfg(not(feature = "tagged"))]
pub use nanbox::NanValue as RuntimeValue;
#[cfg(feature = "tagged")]
pub use value::Value as RuntimeValue;
