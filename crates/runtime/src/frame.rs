//! A single live function invocation: `{closure, instruction_pointer,
//! slots_base}`.

use seq_core::Obj;

pub struct CallFrame {
    pub closure: *mut Obj,
    pub ip: usize,
    /// Index into the VM's value stack where this frame's slot 0 lives.
    pub slots_base: usize,
}
