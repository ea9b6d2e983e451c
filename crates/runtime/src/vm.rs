//! The bytecode dispatch loop.
//!
//! One `Vm` owns the heap, the string interner, the value stack, the call
//! frame stack, the globals table, and the head of the open-upvalue list.
//! `run` drives a single `match` over the current frame's next opcode until
//! either the outermost frame returns or a runtime error unwinds the whole
//! call stack.

use std::path::{Path, PathBuf};

use seq_core::intern::Interner;
use seq_core::object::{
    NativeFn, Obj, ObjArray, ObjBoundMethod, ObjClosure, ObjKind, ObjNative, ObjStruct,
    ObjStructDef, ObjUpvalue, UpvalueLoc,
};
use seq_core::{Chunk, Heap, OpCode, RuntimeValue, Table};

use crate::config::VmConfig;
use crate::error::{RuntimeError, TraceFrame};
use crate::frame::CallFrame;

pub struct Vm<'heap> {
    heap: &'heap Heap,
    interner: Interner<'heap>,
    stack: Vec<RuntimeValue>,
    frames: Vec<CallFrame>,
    globals: Table<RuntimeValue>,
    /// Head of the open-upvalue list, sorted strictly descending by stack
    /// index so closing upvalues above a given slot is a linear scan.
    open_upvalues: *mut Obj,
    config: VmConfig,
    /// Directory imports resolve relative to; the directory of the script
    /// passed to `interpret`, or the current directory for `interpret` calls
    /// that don't name a file.
    base_dir: PathBuf,
}

type OpResult<T> = Result<T, RuntimeError>;

impl<'heap> Vm<'heap> {
    pub fn new(heap: &'heap Heap, interner: Interner<'heap>, config: VmConfig) -> Self {
        Vm {
            heap,
            interner,
            stack: Vec::with_capacity(config.initial_stack_capacity),
            frames: Vec::with_capacity(config.max_frames),
            globals: Table::new(),
            open_upvalues: std::ptr::null_mut(),
            config,
            base_dir: PathBuf::from("."),
        }
    }

    /// Registers a native function under `name` in the globals table, ready
    /// to be called before any source is interpreted.
    pub fn define_native(&mut self, name: &str, func: NativeFn) {
        let name_ptr = self.interner.intern(name);
        let native = crate::native::make_native(self.heap, name, func);
        self.globals.insert(name_ptr, RuntimeValue::from_value(seq_core::Value::Obj(native)));
    }

    pub fn interner_mut(&mut self) -> &mut Interner<'heap> {
        &mut self.interner
    }

    pub fn heap(&self) -> &'heap Heap {
        self.heap
    }

    /// Compiles and runs `source` as the top-level script. `path` is used
    /// only to resolve relative `import` statements and in error messages.
    pub fn interpret(&mut self, source: &str, path: Option<&Path>) -> OpResult<()> {
        if let Some(p) = path {
            if let Some(dir) = p.parent() {
                self.base_dir = dir.to_path_buf();
            }
        }
        let script = seqc::compile(source, self.heap, &mut self.interner)
            .map_err(|errs| RuntimeError::new(join_compile_errors(&errs)))?;
        self.call_script(script)?;
        self.run()
    }

    /// Runs an already-built top-level function without going through the
    /// compiler, for embedders that hand-assemble a `Chunk` directly (the
    /// CLI's `--test` bytecode sanity check).
    pub fn run_function(&mut self, function: *mut Obj) -> OpResult<()> {
        self.call_script(function)?;
        self.run()
    }

    fn call_script(&mut self, function: *mut Obj) -> OpResult<()> {
        let closure = self.heap.alloc(ObjKind::Closure(ObjClosure {
            function,
            upvalues: Box::new([]),
        }));
        self.push(RuntimeValue::from_value(seq_core::Value::Obj(closure)));
        self.call(closure, 0)
    }

    // -- stack helpers --------------------------------------------------

    fn push(&mut self, v: RuntimeValue) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> RuntimeValue {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> RuntimeValue {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = unsafe { closure_function(frame.closure) };
            let line = unsafe { function_chunk(function).line_at(frame.ip.saturating_sub(1)) };
            let name = unsafe { (*function).as_function().unwrap().name_str().to_string() };
            trace.push(TraceFrame { line, function_name: name });
        }
        RuntimeError::with_trace(message, trace)
    }

    // -- the dispatch loop ------------------------------------------------

    fn run(&mut self) -> OpResult<()> {
        let base_depth = self.frames.len() - 1;
        loop {
            if self.frames.len() <= base_depth {
                return Ok(());
            }
            let op = self.read_op()?;
            match op {
                OpCode::Constant => {
                    let idx = self.read_u8();
                    let v = self.current_chunk().constants[idx as usize];
                    self.push(RuntimeValue::from_value(v));
                }
                OpCode::Nil => self.push(RuntimeValue::nil()),
                OpCode::True => self.push(RuntimeValue::from_bool(true)),
                OpCode::False => self.push(RuntimeValue::from_bool(false)),

                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    let v = self.peek(0);
                    self.push(v);
                }

                OpCode::GetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frame().slots_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::GetLocal0 | OpCode::GetLocal1 | OpCode::GetLocal2 | OpCode::GetLocal3 => {
                    let slot = match op {
                        OpCode::GetLocal0 => 0,
                        OpCode::GetLocal1 => 1,
                        OpCode::GetLocal2 => 2,
                        _ => 3,
                    };
                    let base = self.frame().slots_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frame().slots_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_name_const();
                    match self.globals.get(name) {
                        Some(v) => {
                            let v = *v;
                            self.push(v);
                        }
                        None => return Err(self.runtime_error_for(RuntimeError::undefined_variable(self.name_str(name)))),
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_name_const();
                    let v = self.pop();
                    self.globals.insert(name, v);
                }
                OpCode::SetGlobal => {
                    let name = self.read_name_const();
                    let v = self.peek(0);
                    if self.globals.insert(name, v) {
                        self.globals.delete(name);
                        return Err(self.runtime_error_for(RuntimeError::undefined_variable(self.name_str(name))));
                    }
                }
                OpCode::GetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let upvalue = unsafe { closure_upvalues(self.frame().closure)[idx] };
                    self.push(self.read_upvalue(upvalue));
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let upvalue = unsafe { closure_upvalues(self.frame().closure)[idx] };
                    let v = self.peek(0);
                    self.write_upvalue(upvalue, v);
                }

                OpCode::Equal => self.binary_bool(|a, b| RuntimeValue::values_equal(a, b))?,
                OpCode::NotEqual => self.binary_bool(|a, b| !RuntimeValue::values_equal(a, b))?,
                OpCode::Greater => self.binary_compare(|o| o == std::cmp::Ordering::Greater)?,
                OpCode::GreaterEqual => self.binary_compare(|o| o != std::cmp::Ordering::Less)?,
                OpCode::Less => self.binary_compare(|o| o == std::cmp::Ordering::Less)?,
                OpCode::LessEqual => self.binary_compare(|o| o != std::cmp::Ordering::Greater)?,

                OpCode::Add => self.add()?,
                OpCode::Subtract => self.arithmetic(|a, b| a - b, |a, b| a - b)?,
                OpCode::Multiply => self.arithmetic(|a, b| a * b, |a, b| a * b)?,
                OpCode::Divide => self.divide()?,
                OpCode::Modulo => self.modulo()?,
                OpCode::Negate => self.negate()?,

                OpCode::AddInt | OpCode::AddFloat => self.add()?,
                OpCode::SubtractInt | OpCode::SubtractFloat => {
                    self.arithmetic(|a, b| a - b, |a, b| a - b)?
                }
                OpCode::MultiplyInt | OpCode::MultiplyFloat => {
                    self.arithmetic(|a, b| a * b, |a, b| a * b)?
                }
                OpCode::DivideInt | OpCode::DivideFloat => self.divide()?,
                OpCode::ModuloInt => self.modulo()?,
                OpCode::NegateInt | OpCode::NegateFloat => self.negate()?,

                OpCode::IntToFloat => {
                    let v = self.pop();
                    if !v.is_int() {
                        return Err(self.runtime_error_for(RuntimeError::operand_must_be_number()));
                    }
                    self.push(RuntimeValue::from_float(v.as_int() as f64));
                }
                OpCode::FloatToInt => {
                    let v = self.pop();
                    if !v.is_float() {
                        return Err(self.runtime_error_for(RuntimeError::operand_must_be_number()));
                    }
                    self.push(RuntimeValue::from_int(v.as_float() as i64));
                }
                OpCode::Not => {
                    let v = self.pop();
                    self.push(RuntimeValue::from_bool(!v.is_truthy()));
                }

                OpCode::Jump => {
                    let offset = self.read_u16_be();
                    self.frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16_be();
                    if !self.peek(0).is_truthy() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16_be();
                    self.frame_mut().ip -= offset as usize;
                }

                OpCode::Call => {
                    let arg_count = self.read_u8();
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Closure => {
                    let fn_idx = self.read_u8();
                    let function_val = self.current_chunk().constants[fn_idx as usize];
                    let function = function_val.as_obj();
                    let upvalue_count = unsafe { (*function).as_function().unwrap().upvalue_count };
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_u8() != 0;
                        let index = self.read_u8();
                        let upvalue = if is_local {
                            let base = self.frame().slots_base;
                            self.capture_upvalue(base + index as usize)
                        } else {
                            unsafe { closure_upvalues(self.frame().closure)[index as usize] }
                        };
                        upvalues.push(upvalue);
                    }
                    let closure = self.heap.alloc(ObjKind::Closure(ObjClosure {
                        function,
                        upvalues: upvalues.into_boxed_slice(),
                    }));
                    self.push(RuntimeValue::from_value(seq_core::Value::Obj(closure)));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return with no active frame");
                    self.close_upvalues(frame.slots_base);
                    self.stack.truncate(frame.slots_base);
                    self.push(result);
                    if self.frames.len() <= base_depth {
                        return Ok(());
                    }
                }

                OpCode::Print => {
                    let v = self.pop();
                    println!("{}", self.stringify(v));
                }

                OpCode::StructDef => {
                    let field_count = self.read_u8();
                    let name_idx = self.read_u8();
                    let name = self.current_chunk().constants[name_idx as usize].as_obj();
                    let def = ObjStructDef {
                        name,
                        fields: Vec::with_capacity(field_count as usize),
                        field_index: std::collections::HashMap::new(),
                        methods: std::collections::HashMap::new(),
                    };
                    let def_ptr = self.heap.alloc(ObjKind::StructDef(def));
                    self.push(RuntimeValue::from_value(seq_core::Value::Obj(def_ptr)));
                }
                OpCode::StructField => {
                    let name_idx = self.read_u8();
                    let field_name = self.current_chunk().constants[name_idx as usize].as_obj();
                    let def_ptr = self.peek(0).as_obj();
                    unsafe {
                        let kind = &mut (*def_ptr).kind;
                        if let ObjKind::StructDef(def) = kind {
                            let idx = def.fields.len();
                            def.fields.push(field_name);
                            if def.fields.len() > 8 {
                                def.field_index.insert(field_name, idx);
                            }
                        }
                    }
                }
                OpCode::Method => {
                    let name_idx = self.read_u8();
                    let method_name = self.current_chunk().constants[name_idx as usize].as_obj();
                    let method = self.pop().as_obj();
                    let def_ptr = self.peek(0).as_obj();
                    unsafe {
                        if let ObjKind::StructDef(def) = &mut (*def_ptr).kind {
                            def.methods.insert(method_name, method);
                        }
                    }
                }
                OpCode::GetField => {
                    let name_idx = self.read_u8();
                    let name = self.current_chunk().constants[name_idx as usize].as_obj();
                    let receiver = self.pop();
                    self.get_field(receiver, name)?;
                }
                OpCode::SetField => {
                    let name_idx = self.read_u8();
                    let name = self.current_chunk().constants[name_idx as usize].as_obj();
                    let value = self.pop();
                    let receiver = self.pop();
                    self.set_field(receiver, name, value)?;
                }
                OpCode::Invoke => {
                    let name_idx = self.read_u8();
                    let arg_count = self.read_u8();
                    let name = self.current_chunk().constants[name_idx as usize].as_obj();
                    self.invoke(name, arg_count)?;
                }

                OpCode::Array => {
                    let count = self.read_u16() as usize;
                    let start = self.stack.len() - count;
                    let values: Vec<_> =
                        self.stack.drain(start..).map(|v| v.to_value()).collect();
                    let arr = self
                        .heap
                        .alloc(ObjKind::Array(std::cell::RefCell::new(ObjArray { values })));
                    self.push(RuntimeValue::from_value(seq_core::Value::Obj(arr)));
                }
                OpCode::IndexGet => {
                    let index = self.pop();
                    let receiver = self.pop();
                    self.index_get(receiver, index)?;
                }
                OpCode::IndexGetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frame().slots_base;
                    let receiver = self.stack[base + slot];
                    let index = self.pop();
                    self.index_get(receiver, index)?;
                }
                OpCode::IndexSet => {
                    let value = self.pop();
                    let index = self.pop();
                    let receiver = self.pop();
                    self.index_set(receiver, index, value)?;
                }

                OpCode::Import => {
                    let path_idx = self.read_u8();
                    let path_str = {
                        let v = self.current_chunk().constants[path_idx as usize];
                        v.as_obj()
                    };
                    let path_str = unsafe { (*path_str).as_string().unwrap().as_str().to_string() };
                    self.import_module(&path_str)?;
                }

                OpCode::IncLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frame().slots_base;
                    let v = self.stack[base + slot];
                    if !v.is_int() {
                        return Err(self.runtime_error_for(RuntimeError::operands_must_be_numbers()));
                    }
                    self.stack[base + slot] = RuntimeValue::from_int(v.as_int() + 1);
                }
                OpCode::AddLocalConst => {
                    let slot = self.read_u8() as usize;
                    let const_idx = self.read_u8();
                    let base = self.frame().slots_base;
                    let local = self.stack[base + slot];
                    let constant = RuntimeValue::from_value(self.current_chunk().constants[const_idx as usize]);
                    self.push(self.numeric_binary(local, constant, |a, b| a + b, |a, b| a + b)?);
                }
                OpCode::LessLocalConst => {
                    let slot = self.read_u8() as usize;
                    let const_idx = self.read_u8();
                    let base = self.frame().slots_base;
                    let local = self.stack[base + slot];
                    let constant = RuntimeValue::from_value(self.current_chunk().constants[const_idx as usize]);
                    let ord = self.numeric_compare(local, constant)?;
                    self.push(RuntimeValue::from_bool(ord == std::cmp::Ordering::Less));
                }
            }
        }
    }

    // -- reading the instruction stream ------------------------------------

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active frame")
    }

    fn current_chunk(&self) -> &Chunk {
        unsafe { function_chunk(closure_function(self.frame().closure)) }
    }

    fn read_op(&mut self) -> OpResult<OpCode> {
        let byte = self.read_u8();
        OpCode::try_from(byte).map_err(|b| self.runtime_error_now(format!("invalid opcode byte {b}")))
    }

    fn runtime_error_now(&self, message: impl Into<String>) -> RuntimeError {
        self.runtime_error(message)
    }

    fn runtime_error_for(&self, err: RuntimeError) -> RuntimeError {
        self.runtime_error(err.message)
    }

    fn read_u8(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active frame");
        let chunk = unsafe { function_chunk(closure_function(frame.closure)) };
        let byte = chunk.read_u8(frame.ip);
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("no active frame");
        let chunk = unsafe { function_chunk(closure_function(frame.closure)) };
        let v = chunk.read_u16(frame.ip);
        frame.ip += 2;
        v
    }

    fn read_u16_be(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("no active frame");
        let chunk = unsafe { function_chunk(closure_function(frame.closure)) };
        let v = chunk.read_u16_be(frame.ip);
        frame.ip += 2;
        v
    }

    fn read_name_const(&mut self) -> *mut Obj {
        let idx = self.read_u8();
        self.current_chunk().constants[idx as usize].as_obj()
    }

    fn name_str(&self, ptr: *mut Obj) -> &str {
        unsafe { (*ptr).as_string().unwrap().as_str() }
    }

    // -- arithmetic/comparison --------------------------------------------

    fn numeric_binary(
        &self,
        a: RuntimeValue,
        b: RuntimeValue,
        int_op: impl Fn(i64, i64) -> i64,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> OpResult<RuntimeValue> {
        if a.is_int() && b.is_int() {
            Ok(RuntimeValue::from_int(int_op(a.as_int(), b.as_int())))
        } else if a.is_number() && b.is_number() {
            let x = if a.is_int() { a.as_int() as f64 } else { a.as_float() };
            let y = if b.is_int() { b.as_int() as f64 } else { b.as_float() };
            Ok(RuntimeValue::from_float(float_op(x, y)))
        } else {
            Err(self.runtime_error_for(RuntimeError::operands_must_be_numbers()))
        }
    }

    fn numeric_compare(&self, a: RuntimeValue, b: RuntimeValue) -> OpResult<std::cmp::Ordering> {
        if !a.is_number() || !b.is_number() {
            return Err(self.runtime_error_for(RuntimeError::operands_must_be_numbers()));
        }
        if a.is_int() && b.is_int() {
            Ok(a.as_int().cmp(&b.as_int()))
        } else {
            let x = if a.is_int() { a.as_int() as f64 } else { a.as_float() };
            let y = if b.is_int() { b.as_int() as f64 } else { b.as_float() };
            x.partial_cmp(&y).ok_or_else(|| self.runtime_error_for(RuntimeError::operands_must_be_numbers()))
        }
    }

    fn arithmetic(
        &mut self,
        int_op: impl Fn(i64, i64) -> i64,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        let v = self.numeric_binary(a, b, int_op, float_op)?;
        self.push(v);
        Ok(())
    }

    fn add(&mut self) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        if a.is_number() && b.is_number() {
            let v = self.numeric_binary(a, b, |x, y| x.wrapping_add(y), |x, y| x + y)?;
            self.push(v);
            return Ok(());
        }
        if a.is_obj() || b.is_obj() {
            let a_str = a.to_value().as_string().map(|s| s.to_string());
            let b_str = b.to_value().as_string().map(|s| s.to_string());
            if a_str.is_some() || b_str.is_some() {
                let left = a_str.unwrap_or_else(|| self.stringify(a));
                let right = b_str.unwrap_or_else(|| self.stringify(b));
                let ptr = self.interner.intern_concat(&left, &right);
                self.push(RuntimeValue::from_value(seq_core::Value::Obj(ptr)));
                return Ok(());
            }
        }
        Err(self.runtime_error_for(RuntimeError::operands_must_be_strings_or_numbers()))
    }

    fn divide(&mut self) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        if a.is_int() && b.is_int() {
            if b.as_int() == 0 {
                return Err(self.runtime_error_for(RuntimeError::division_by_zero()));
            }
            self.push(RuntimeValue::from_int(a.as_int() / b.as_int()));
            return Ok(());
        }
        if a.is_number() && b.is_number() {
            let x = if a.is_int() { a.as_int() as f64 } else { a.as_float() };
            let y = if b.is_int() { b.as_int() as f64 } else { b.as_float() };
            self.push(RuntimeValue::from_float(x / y));
            return Ok(());
        }
        Err(self.runtime_error_for(RuntimeError::operands_must_be_numbers()))
    }

    fn modulo(&mut self) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        if a.is_int() && b.is_int() {
            if b.as_int() == 0 {
                return Err(self.runtime_error_for(RuntimeError::division_by_zero()));
            }
            self.push(RuntimeValue::from_int(a.as_int() % b.as_int()));
            return Ok(());
        }
        Err(self.runtime_error_for(RuntimeError::operands_must_be_numbers()))
    }

    fn negate(&mut self) -> OpResult<()> {
        let v = self.pop();
        if v.is_int() {
            self.push(RuntimeValue::from_int(-v.as_int()));
        } else if v.is_float() {
            self.push(RuntimeValue::from_float(-v.as_float()));
        } else {
            return Err(self.runtime_error_for(RuntimeError::operand_must_be_number()));
        }
        Ok(())
    }

    fn binary_bool(&mut self, f: impl Fn(RuntimeValue, RuntimeValue) -> bool) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        self.push(RuntimeValue::from_bool(f(a, b)));
        Ok(())
    }

    fn binary_compare(&mut self, f: impl Fn(std::cmp::Ordering) -> bool) -> OpResult<()> {
        let b = self.pop();
        let a = self.pop();
        let ord = self.numeric_compare(a, b)?;
        self.push(RuntimeValue::from_bool(f(ord)));
        Ok(())
    }

    fn stringify(&self, v: RuntimeValue) -> String {
        v.to_value().stringify()
    }

    // -- calls --------------------------------------------------------------

    fn call_value(&mut self, callee: RuntimeValue, arg_count: u8) -> OpResult<()> {
        if !callee.is_obj() {
            return Err(self.runtime_error_for(RuntimeError::can_only_call_functions()));
        }
        let obj = callee.as_obj();
        match unsafe { &(*obj).kind } {
            ObjKind::Closure(_) => self.call(obj, arg_count),
            ObjKind::Native(native) => self.call_native(native, arg_count),
            ObjKind::StructDef(_) => self.instantiate(obj, arg_count),
            ObjKind::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                let base = self.stack.len() - arg_count as usize - 1;
                self.stack[base] = RuntimeValue::from_value(receiver);
                self.call(method, arg_count)
            }
            _ => Err(self.runtime_error_for(RuntimeError::can_only_call_functions())),
        }
    }

    fn call(&mut self, closure: *mut Obj, arg_count: u8) -> OpResult<()> {
        let function = unsafe { closure_function(closure) };
        let arity = unsafe { (*function).as_function().unwrap().arity };
        if arg_count != arity {
            return Err(self.runtime_error_for(RuntimeError::arity_mismatch(arity, arg_count)));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(self.runtime_error_for(RuntimeError::stack_overflow()));
        }
        let slots_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slots_base });
        Ok(())
    }

    fn call_native(&mut self, native: &ObjNative, arg_count: u8) -> OpResult<()> {
        let start = self.stack.len() - arg_count as usize;
        let args: Vec<_> = self.stack[start..].iter().map(|v| v.to_value()).collect();
        let result = (native.func)(&args).map_err(|msg| self.runtime_error_now(msg))?;
        self.stack.truncate(start - 1);
        self.push(RuntimeValue::from_value(result));
        Ok(())
    }

    fn instantiate(&mut self, def_ptr: *mut Obj, arg_count: u8) -> OpResult<()> {
        let def = unsafe { (*def_ptr).as_struct_def().unwrap() };
        let field_count = def.field_count();
        if arg_count as usize != field_count {
            return Err(self.runtime_error_for(RuntimeError::arity_mismatch(field_count as u8, arg_count)));
        }
        let start = self.stack.len() - arg_count as usize;
        let fields: Vec<_> = self.stack[start..].iter().map(|v| v.to_value()).collect();
        self.stack.truncate(start - 1);
        let instance = self.heap.alloc(ObjKind::Struct(ObjStruct {
            def: def_ptr,
            fields: std::cell::RefCell::new(fields.into_boxed_slice()),
        }));
        self.push(RuntimeValue::from_value(seq_core::Value::Obj(instance)));
        Ok(())
    }

    fn get_field(&mut self, receiver: RuntimeValue, name: *mut Obj) -> OpResult<()> {
        if !receiver.is_obj() {
            return Err(self.runtime_error_for(RuntimeError::only_struct_instances_have_fields()));
        }
        let obj = receiver.as_obj();
        let instance = match unsafe { (*obj).as_struct() } {
            Some(s) => s,
            None => return Err(self.runtime_error_for(RuntimeError::only_struct_instances_have_fields())),
        };
        let def = unsafe { (*instance.def).as_struct_def().unwrap() };
        if let Some(idx) = def.find_field(name) {
            let v = instance.fields.borrow()[idx];
            self.push(RuntimeValue::from_value(v));
            return Ok(());
        }
        if let Some(&method) = def.methods.get(&name) {
            let bound = self.heap.alloc(ObjKind::BoundMethod(ObjBoundMethod {
                receiver: receiver.to_value(),
                method,
            }));
            self.push(RuntimeValue::from_value(seq_core::Value::Obj(bound)));
            return Ok(());
        }
        Err(self.runtime_error_for(RuntimeError::undefined_property(self.name_str(name))))
    }

    fn set_field(&mut self, receiver: RuntimeValue, name: *mut Obj, value: RuntimeValue) -> OpResult<()> {
        if !receiver.is_obj() {
            return Err(self.runtime_error_for(RuntimeError::only_struct_instances_have_fields()));
        }
        let obj = receiver.as_obj();
        let instance = match unsafe { (*obj).as_struct() } {
            Some(s) => s,
            None => return Err(self.runtime_error_for(RuntimeError::only_struct_instances_have_fields())),
        };
        let def = unsafe { (*instance.def).as_struct_def().unwrap() };
        match def.find_field(name) {
            Some(idx) => {
                instance.fields.borrow_mut()[idx] = value.to_value();
                Ok(())
            }
            None => Err(self.runtime_error_for(RuntimeError::undefined_field(self.name_str(name)))),
        }
    }

    fn invoke(&mut self, name: *mut Obj, arg_count: u8) -> OpResult<()> {
        let receiver = self.peek(arg_count as usize);
        if !receiver.is_obj() {
            return Err(self.runtime_error_for(RuntimeError::only_struct_instances_have_methods()));
        }
        let obj = receiver.as_obj();
        let instance = match unsafe { (*obj).as_struct() } {
            Some(s) => s,
            None => return Err(self.runtime_error_for(RuntimeError::only_struct_instances_have_methods())),
        };
        let def = unsafe { (*instance.def).as_struct_def().unwrap() };
        if let Some(idx) = def.find_field(name) {
            let v = instance.fields.borrow()[idx];
            let base = self.stack.len() - arg_count as usize - 1;
            let callee = RuntimeValue::from_value(v);
            self.stack[base] = callee;
            return self.call_value(callee, arg_count);
        }
        match def.methods.get(&name).copied() {
            Some(method) => self.call(method, arg_count),
            None => Err(self.runtime_error_for(RuntimeError::undefined_method(self.name_str(name)))),
        }
    }

    // -- arrays --------------------------------------------------------------

    fn index_get(&mut self, receiver: RuntimeValue, index: RuntimeValue) -> OpResult<()> {
        if !receiver.is_obj() {
            return Err(self.runtime_error_for(RuntimeError::can_only_index_arrays()));
        }
        let arr = match unsafe { &(*receiver.as_obj()).kind } {
            ObjKind::Array(a) => a,
            _ => return Err(self.runtime_error_for(RuntimeError::can_only_index_arrays())),
        };
        if !index.is_int() {
            return Err(self.runtime_error_for(RuntimeError::array_index_must_be_integer()));
        }
        let i = index.as_int();
        let arr_ref = arr.borrow();
        let values = &arr_ref.values;
        if i < 0 || i as usize >= values.len() {
            let count = values.len();
            drop(arr_ref);
            return Err(self.runtime_error_for(RuntimeError::array_index_out_of_bounds(i, count)));
        }
        let v = values[i as usize];
        drop(arr_ref);
        self.push(RuntimeValue::from_value(v));
        Ok(())
    }

    fn index_set(&mut self, receiver: RuntimeValue, index: RuntimeValue, value: RuntimeValue) -> OpResult<()> {
        if !receiver.is_obj() {
            return Err(self.runtime_error_for(RuntimeError::can_only_index_arrays()));
        }
        let arr = match unsafe { &(*receiver.as_obj()).kind } {
            ObjKind::Array(a) => a,
            _ => return Err(self.runtime_error_for(RuntimeError::can_only_index_arrays())),
        };
        if !index.is_int() {
            return Err(self.runtime_error_for(RuntimeError::array_index_must_be_integer()));
        }
        let i = index.as_int();
        let mut arr = arr.borrow_mut();
        if i < 0 || i as usize >= arr.values.len() {
            return Err(self.runtime_error_for(RuntimeError::array_index_out_of_bounds(i, arr.values.len())));
        }
        arr.values[i as usize] = value.to_value();
        Ok(())
    }

    // -- upvalues --------------------------------------------------------------

    fn capture_upvalue(&mut self, stack_index: usize) -> *mut Obj {
        let mut prev: *mut Obj = std::ptr::null_mut();
        let mut cur = self.open_upvalues;
        while !cur.is_null() {
            let upvalue = unsafe { (*cur).as_upvalue().expect("open_upvalues list holds only upvalues") };
            match upvalue.stack_index() {
                Some(idx) if idx == stack_index => return cur,
                Some(idx) if idx < stack_index => break,
                _ => {}
            }
            prev = cur;
            cur = upvalue.open_next();
        }
        let created = self.heap.alloc(ObjKind::Upvalue(ObjUpvalue::new_open(stack_index)));
        unsafe {
            (*created).as_upvalue().unwrap().set_open_next(cur);
        }
        if prev.is_null() {
            self.open_upvalues = created;
        } else {
            unsafe { (*prev).as_upvalue().unwrap().set_open_next(created) };
        }
        created
    }

    fn close_upvalues(&mut self, from_stack_index: usize) {
        while !self.open_upvalues.is_null() {
            let upvalue = unsafe { (*self.open_upvalues).as_upvalue().unwrap() };
            let idx = match upvalue.stack_index() {
                Some(idx) if idx >= from_stack_index => idx,
                _ => break,
            };
            let value = self.stack[idx].to_value();
            upvalue.loc.set(UpvalueLoc::Closed(value));
            self.open_upvalues = upvalue.open_next();
        }
    }

    fn read_upvalue(&self, upvalue: *mut Obj) -> RuntimeValue {
        let u = unsafe { (*upvalue).as_upvalue().unwrap() };
        match u.loc.get() {
            UpvalueLoc::Open(idx) => self.stack[idx],
            UpvalueLoc::Closed(v) => RuntimeValue::from_value(v),
        }
    }

    fn write_upvalue(&mut self, upvalue: *mut Obj, value: RuntimeValue) {
        let u = unsafe { (*upvalue).as_upvalue().unwrap() };
        match u.loc.get() {
            UpvalueLoc::Open(idx) => self.stack[idx] = value,
            UpvalueLoc::Closed(_) => u.loc.set(UpvalueLoc::Closed(value.to_value())),
        }
    }

    // -- modules --------------------------------------------------------------

    fn import_module(&mut self, path: &str) -> OpResult<()> {
        let full_path = self.base_dir.join(path);
        let source = std::fs::read_to_string(&full_path)
            .map_err(|_| self.runtime_error_for(RuntimeError::could_not_open_module(path)))?;
        let module = seqc::compile(&source, self.heap, &mut self.interner)
            .map_err(|_| self.runtime_error_for(RuntimeError::error_compiling_module(path)))?;
        self.call_script(module)
    }
}

fn join_compile_errors(errs: &[seqc::CompileError]) -> String {
    errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

unsafe fn closure_function(closure: *mut Obj) -> *mut Obj {
    (*closure).as_closure().expect("call target is a closure").function
}

unsafe fn function_chunk(function: *mut Obj) -> &'static Chunk {
    &(*function).as_function().expect("closure target is a function").chunk
}

unsafe fn closure_upvalues(closure: *mut Obj) -> &'static [*mut Obj] {
    &(*closure).as_closure().expect("call target is a closure").upvalues
}
