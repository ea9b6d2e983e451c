//! The bytecode instruction set emitted by the compiler and dispatched by
//! the VM. Each variant documents its immediate operand widths; operands
//! are encoded as raw bytes immediately following the opcode byte in a
//! `Chunk`'s code stream, little-endian except jump/loop offsets, which are
//! big-endian 16-bit per the component design.

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    // -- literals/constants ------------------------------------------------
    Constant,    // u8 constant index
    Nil,
    True,
    False,

    // -- stack ------------------------------------------------------------
    Pop,
    Dup,

    // -- variables ----------------------------------------------------------
    GetLocal,     // u8 slot
    SetLocal,     // u8 slot
    GetGlobal,    // u8 constant index (name)
    DefineGlobal, // u8 constant index (name)
    SetGlobal,    // u8 constant index (name)
    GetUpvalue,   // u8 index
    SetUpvalue,   // u8 index

    // -- comparison ---------------------------------------------------------
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // -- generic arithmetic (type-dispatching at runtime) --------------------
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,

    // -- typed arithmetic, reserved for a future inlining pass. The
    // compiler never emits these; the VM decodes and executes them
    // identically to their generic counterparts minus the type dispatch,
    // so an inliner can start producing them without a VM change.
    AddInt,
    SubtractInt,
    MultiplyInt,
    DivideInt,
    ModuloInt,
    NegateInt,
    AddFloat,
    SubtractFloat,
    MultiplyFloat,
    DivideFloat,
    NegateFloat,

    // -- conversion/logical ---------------------------------------------------
    IntToFloat,
    FloatToInt,
    Not,

    // -- control --------------------------------------------------------------
    Jump,        // u16 offset, forward, big-endian
    JumpIfFalse, // u16 offset, forward, big-endian
    Loop,        // u16 offset, backward, big-endian

    // -- calls/closures ---------------------------------------------------
    Call,         // u8 arg count
    Closure,      // u8 constant index (function), then upvalue_count * (u8 is_local, u8 index)
    CloseUpvalue,
    Return,

    // -- i/o ----------------------------------------------------------------
    Print,

    // -- records --------------------------------------------------------------
    StructDef,   // u8 field count, u8 constant index (name)
    StructField, // u8 constant index (field name); one per field, follows StructDef
    GetField,    // u8 constant index (name)
    SetField,    // u8 constant index (name)
    Method,      // u8 constant index (method name)
    Invoke,      // u8 constant index (method name), u8 arg count

    // -- arrays --------------------------------------------------------------
    Array, // u16 element count
    IndexGet,
    IndexSet,

    // -- modules --------------------------------------------------------------
    Import, // u8 constant index (path string)

    // -- peephole superinstructions -------------------------------------------
    GetLocal0,
    GetLocal1,
    GetLocal2,
    GetLocal3,
    IncLocal,       // u8 slot: slot += 1
    AddLocalConst,  // u8 slot, u8 constant index: push slot + constant
    LessLocalConst, // u8 slot, u8 constant index: push slot < constant
    IndexGetLocal,  // u8 slot: push slot[TOS]
}

impl OpCode {
    /// Number of immediate operand bytes following this opcode, for opcodes
    /// with a fixed-width operand encoding. `Closure` has a
    /// variable-length trailer (`upvalue_count` pairs) the caller must
    /// decode using the function constant it names; `StructDef` is
    /// followed by `field_count` separate `StructField` instructions
    /// rather than an inline trailer.
    pub fn operand_len(self) -> usize {
        use OpCode::*;
        match self {
            Nil | True | False | Pop | Dup | Equal | NotEqual | Greater | GreaterEqual | Less
            | LessEqual | Add | Subtract | Multiply | Divide | Modulo | Negate | AddInt
            | SubtractInt | MultiplyInt | DivideInt | ModuloInt | NegateInt | AddFloat
            | SubtractFloat | MultiplyFloat | DivideFloat | NegateFloat | IntToFloat
            | FloatToInt | Not | CloseUpvalue | Return | Print | IndexGet | IndexSet
            | GetLocal0 | GetLocal1 | GetLocal2 | GetLocal3 => 0,

            Constant | GetLocal | SetLocal | GetGlobal | DefineGlobal | SetGlobal | GetUpvalue
            | SetUpvalue | Call | GetField | SetField | Method | StructField | Import
            | IncLocal | IndexGetLocal => 1,

            Invoke | AddLocalConst | LessLocalConst | StructDef => 2,

            Jump | JumpIfFalse | Loop | Array => 2,

            Closure => 0, // variable-length; see above
        }
    }
}

const TABLE: &[OpCode] = {
    use OpCode::*;
    &[
        Constant, Nil, True, False, Pop, Dup, GetLocal, SetLocal, GetGlobal, DefineGlobal,
        SetGlobal, GetUpvalue, SetUpvalue, Equal, NotEqual, Greater, GreaterEqual, Less,
        LessEqual, Add, Subtract, Multiply, Divide, Modulo, Negate, AddInt, SubtractInt,
        MultiplyInt, DivideInt, ModuloInt, NegateInt, AddFloat, SubtractFloat, MultiplyFloat,
        DivideFloat, NegateFloat, IntToFloat, FloatToInt, Not, Jump, JumpIfFalse, Loop, Call,
        Closure, CloseUpvalue, Return, Print, StructDef, StructField, GetField, SetField, Method,
        Invoke, Array, IndexGet, IndexSet, Import, GetLocal0, GetLocal1, GetLocal2, GetLocal3,
        IncLocal, AddLocalConst, LessLocalConst, IndexGetLocal,
    ]
};

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        TABLE.get(byte as usize).copied().ok_or(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_variant_through_its_discriminant() {
        for raw in 0u8..(TABLE.len() as u8) {
            let op = OpCode::try_from(raw).unwrap();
            assert_eq!(op as u8, raw);
        }
    }

    #[test]
    fn out_of_range_byte_is_rejected() {
        assert!(OpCode::try_from(255).is_err());
    }
}
