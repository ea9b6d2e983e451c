//! The single-pass Pratt compiler: source text in, a top-level `ObjFunction`
//! out. There is no intermediate AST — every grammar production emits
//! bytecode as it is recognized, directly into the `Chunk` of whichever
//! function is currently being compiled.

use seq_core::chunk::MAX_CONSTANTS;
use seq_core::intern::Interner;
use seq_core::nanbox::{MAX_NANBOX_INT, MIN_NANBOX_INT};
use seq_core::object::{Heap, Obj, ObjFunction, ObjKind, UpvalueDescriptor};
use seq_core::value::Value;
use seq_core::{Chunk, OpCode};

use crate::error::CompileError;
use crate::precedence::{infix_precedence, Precedence};
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_ARGS: usize = 255;
const MAX_FIELDS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    Script,
    Function,
    Method,
}

struct Local<'src> {
    name: &'src str,
    /// `-1` (sentinel) while the initializer is still being compiled, so a
    /// reference to the name inside its own initializer is caught.
    depth: i32,
    captured: bool,
}

struct LoopCtx {
    continue_target: usize,
    break_jumps: Vec<usize>,
    locals_depth: usize,
}

struct FunctionScope<'src> {
    function: *mut Obj,
    fn_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDescriptor>,
    scope_depth: i32,
    loops: Vec<LoopCtx>,
}

impl<'src> FunctionScope<'src> {
    fn new(function: *mut Obj, fn_type: FunctionType) -> Self {
        let receiver_name = if fn_type == FunctionType::Method { "self" } else { "" };
        FunctionScope {
            function,
            fn_type,
            locals: vec![Local { name: receiver_name, depth: 0, captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

pub struct Compiler<'src, 'heap, 'intern> {
    src: &'src str,
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: &'heap Heap,
    interner: &'intern mut Interner<'heap>,
    scopes: Vec<FunctionScope<'src>>,
}

impl<'src, 'heap, 'intern> Compiler<'src, 'heap, 'intern> {
    pub fn compile(
        source: &'src str,
        heap: &'heap Heap,
        interner: &'intern mut Interner<'heap>,
    ) -> Result<*mut Obj, Vec<CompileError>> {
        let script = heap.alloc(ObjKind::Function(ObjFunction::new(None)));
        let mut compiler = Compiler {
            src: source,
            scanner: Scanner::new(source),
            previous: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            current: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            interner,
            scopes: vec![FunctionScope::new(script, FunctionType::Script)],
        };
        compiler.advance();
        while !compiler.check(TokenKind::Eof) {
            compiler.statement();
        }
        compiler.consume(TokenKind::Eof, "Expect end of expression.");
        compiler.emit_return();
        if compiler.had_error {
            Err(compiler.errors)
        } else {
            Ok(script)
        }
    }

    // -- token stream plumbing -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError::new(message.to_string(), token.line));
    }

    /// Resynchronizes at the next statement boundary after a syntax error.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            use TokenKind::*;
            match self.current.kind {
                KwIf | KwFor | KwReturn | KwType | KwPrint | KwImport | KwMatch | KwBreak
                | KwContinue => return,
                RightBrace => {
                    self.advance();
                    return;
                }
                _ => self.advance(),
            }
        }
    }

    // -- bytecode emission --------------------------------------------------

    fn chunk_mut(&mut self) -> &mut Chunk {
        let ptr = self.scopes.last().unwrap().function;
        unsafe {
            match &mut (*ptr).kind {
                ObjKind::Function(f) => &mut f.chunk,
                _ => unreachable!("compiler function scope always wraps an ObjFunction"),
            }
        }
    }

    fn chunk_len(&mut self) -> usize {
        self.chunk_mut().len()
    }

    fn emit(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.chunk_mut().write(op as u8, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk_mut().write(byte, line);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit(op);
        self.emit_byte(byte);
    }

    fn emit_return(&mut self) {
        self.emit(OpCode::Nil);
        self.emit(OpCode::Return);
    }

    /// Adds `value` to the current chunk's constant pool, surfacing a
    /// compile error instead of panicking if the pool is full.
    fn add_constant(&mut self, value: Value) -> u8 {
        if self.chunk_mut().constants.len() >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.chunk_mut().add_constant(value)
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.add_constant(value);
        self.emit(OpCode::Constant);
        self.emit_byte(idx);
    }

    /// Emits a jump with a placeholder offset, returning the offset of the
    /// first operand byte so it can be patched once the target is known.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.chunk_mut().patch_u16_be(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit(OpCode::Loop);
        let offset = self.chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Too much code to jump over.");
            self.emit_byte(0);
            self.emit_byte(0);
            return;
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    fn intern_name(&mut self, s: &str) -> *mut Obj {
        self.interner.intern(s)
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let ptr = self.intern_name(name);
        self.add_constant(Value::Obj(ptr))
    }

    // -- scope management ------------------------------------------------------

    fn scope(&self) -> &FunctionScope<'src> {
        self.scopes.last().unwrap()
    }

    fn scope_mut(&mut self) -> &mut FunctionScope<'src> {
        self.scopes.last_mut().unwrap()
    }

    fn begin_scope(&mut self) {
        self.scope_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_mut().scope_depth -= 1;
        let depth = self.scope().scope_depth;
        while let Some(local) = self.scope().locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.captured {
                self.emit(OpCode::CloseUpvalue);
            } else {
                self.emit(OpCode::Pop);
            }
            self.scope_mut().locals.pop();
        }
    }

    /// Emits cleanup for every local declared since `depth_floor` locals
    /// existed, without touching the compile-time locals table — used by
    /// `break`/`continue`, which leave lexical scope intact for code that
    /// follows them.
    fn emit_pop_locals_above(&mut self, depth_floor: usize) {
        let locals_len = self.scope().locals.len();
        for i in (depth_floor..locals_len).rev() {
            if self.scope().locals[i].captured {
                self.emit(OpCode::CloseUpvalue);
            } else {
                self.emit(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.scope().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.scope_mut().locals.push(Local { name, depth: -1, captured: false });
    }

    fn declare_variable(&mut self, name: Token<'src>) {
        if self.scope().scope_depth == 0 {
            return;
        }
        let depth = self.scope().scope_depth;
        for local in self.scope().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name.lexeme {
                self.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(name.lexeme);
    }

    fn mark_initialized(&mut self) {
        if self.scope().scope_depth == 0 {
            return;
        }
        let depth = self.scope().scope_depth;
        if let Some(local) = self.scope_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global_const: u8) {
        if self.scope().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global_const);
    }

    // -- name resolution ---------------------------------------------------

    fn resolve_local(&mut self, scope_idx: usize, name: &str) -> Option<u8> {
        let locals = &self.scopes[scope_idx].locals;
        for (i, local) in locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, scope_idx: usize, name: &str) -> Option<u8> {
        if scope_idx == 0 {
            return None;
        }
        let enclosing = scope_idx - 1;
        if let Some(local_slot) = self.resolve_local(enclosing, name) {
            self.scopes[enclosing].locals[local_slot as usize].captured = true;
            return Some(self.add_upvalue(scope_idx, local_slot, true));
        }
        if let Some(up_slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(scope_idx, up_slot, false));
        }
        None
    }

    fn add_upvalue(&mut self, scope_idx: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &self.scopes[scope_idx].upvalues;
        for (i, up) in upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.scopes[scope_idx].upvalues.push(UpvalueDescriptor { is_local, index });
        let count = self.scopes[scope_idx].upvalues.len() as u8;
        unsafe {
            if let ObjKind::Function(f) = &mut (*self.scopes[scope_idx].function).kind {
                f.upvalue_count = count;
            }
        }
        count - 1
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let scope_idx = self.scopes.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(scope_idx, name.lexeme)
        {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(scope_idx, name.lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let slot = self.identifier_constant(name.lexeme);
            (OpCode::GetGlobal, OpCode::SetGlobal, slot)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else if get_op == OpCode::GetLocal && arg < 4 {
            let fused = match arg {
                0 => OpCode::GetLocal0,
                1 => OpCode::GetLocal1,
                2 => OpCode::GetLocal2,
                _ => OpCode::GetLocal3,
            };
            self.emit(fused);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    // -- Pratt core --------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(self.previous.kind, can_assign);
        self.run_infix_loop(precedence, can_assign);
        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn run_infix_loop(&mut self, precedence: Precedence, can_assign: bool) {
        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            LeftBracket => self.array_literal(),
            Minus | Bang | KwNot => self.unary(),
            Int => self.number_int(),
            Float => self.number_float(),
            String => self.string_literal(),
            KwTrue | KwFalse | KwNil => self.literal(),
            Identifier => {
                let tok = self.previous;
                self.named_variable(tok, can_assign);
            }
            KwSelf => self.self_expr(),
            _ => self.error("Expect expression."),
        }
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            Plus | Minus | Star | Slash | Percent | EqualEqual | BangEqual | Less | LessEqual
            | Greater | GreaterEqual => self.binary(kind),
            KwAnd => self.and(),
            KwOr => self.or(),
            LeftParen => self.call(),
            Dot => self.dot(can_assign),
            LeftBracket => self.index(can_assign),
            _ => self.error("Unexpected token."),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Minus => self.emit(OpCode::Negate),
            TokenKind::Bang | TokenKind::KwNot => self.emit(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, op: TokenKind) {
        let rule_prec = infix_precedence(op);
        self.parse_precedence(rule_prec.next());
        use TokenKind::*;
        match op {
            Plus => self.emit(OpCode::Add),
            Minus => self.emit(OpCode::Subtract),
            Star => self.emit(OpCode::Multiply),
            Slash => self.emit(OpCode::Divide),
            Percent => self.emit(OpCode::Modulo),
            EqualEqual => self.emit(OpCode::Equal),
            BangEqual => self.emit(OpCode::NotEqual),
            Less => self.emit(OpCode::Less),
            LessEqual => self.emit(OpCode::LessEqual),
            Greater => self.emit(OpCode::Greater),
            GreaterEqual => self.emit(OpCode::GreaterEqual),
            _ => unreachable!(),
        }
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let argc = self.arg_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    fn arg_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                count += 1;
                if count > MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetField, name_const);
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.arg_list();
            self.emit(OpCode::Invoke);
            self.emit_byte(name_const);
            self.emit_byte(argc);
        } else {
            self.emit_op_byte(OpCode::GetField, name_const);
        }
    }

    fn index(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(OpCode::IndexSet);
        } else {
            self.emit(OpCode::IndexGet);
        }
    }

    fn array_literal(&mut self) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression();
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after array elements.");
        if count > u16::MAX as usize {
            self.error("Too many elements in array literal.");
        }
        self.emit(OpCode::Array);
        let bytes = (count as u16).to_le_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    fn number_int(&mut self) {
        let value = parse_int_literal(self.previous.lexeme);
        if !(MIN_NANBOX_INT..=MAX_NANBOX_INT).contains(&value) {
            self.error("Integer literal out of range.");
            return;
        }
        self.emit_constant(Value::Int(value));
    }

    fn number_float(&mut self) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Float(value));
    }

    fn string_literal(&mut self) {
        let lexeme = self.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        let ptr = self.intern_name(content);
        self.emit_constant(Value::Obj(ptr));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::KwTrue => self.emit(OpCode::True),
            TokenKind::KwFalse => self.emit(OpCode::False),
            TokenKind::KwNil => self.emit(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn self_expr(&mut self) {
        if self.scope().fn_type != FunctionType::Method {
            self.error("Can't use 'self' outside a type method.");
        }
        let tok = Token { kind: TokenKind::KwSelf, lexeme: "self", line: self.previous.line };
        self.named_variable(tok, false);
    }

    // -- statements --------------------------------------------------------

    fn statement(&mut self) {
        use TokenKind::*;
        match self.current.kind {
            KwIf => self.if_statement(),
            KwFor => self.for_statement(),
            KwMatch => self.match_statement(),
            KwReturn => self.return_statement(),
            KwBreak => self.break_statement(),
            KwContinue => self.continue_statement(),
            KwPrint => self.print_statement(),
            KwType => {
                self.advance();
                self.type_declaration();
            }
            KwImport => self.import_statement(),
            KwExport => {
                self.advance();
                self.statement();
            }
            KwExtern => self.extern_declaration(),
            LeftBrace => {
                self.advance();
                self.begin_scope();
                self.block();
                self.end_scope();
            }
            Identifier => self.identifier_statement(),
            _ => self.expression_statement(),
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.statement();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.advance();
        self.expression();
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.consume(TokenKind::LeftBrace, "Expect '{' after condition.");
        self.begin_scope();
        self.block();
        self.end_scope();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);
        if self.matches(TokenKind::KwElse) {
            if self.check(TokenKind::KwIf) {
                self.if_statement();
            } else {
                self.consume(TokenKind::LeftBrace, "Expect '{' after 'else'.");
                self.begin_scope();
                self.block();
                self.end_scope();
            }
        }
        self.patch_jump(else_jump);
    }

    fn for_statement(&mut self) {
        self.advance();
        self.begin_scope();
        let loop_start = self.chunk_len();
        self.scope_mut().loops.push(LoopCtx {
            continue_target: loop_start,
            break_jumps: Vec::new(),
            locals_depth: self.scope().locals.len(),
        });

        let mut exit_jump: Option<usize> = None;
        if !self.check(TokenKind::LeftBrace) {
            self.expression();
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit(OpCode::Pop);
        }
        self.consume(TokenKind::LeftBrace, "Expect '{' to start loop body.");
        self.begin_scope();
        self.block();
        self.end_scope();
        self.emit_loop(loop_start);

        if let Some(ej) = exit_jump {
            self.patch_jump(ej);
            self.emit(OpCode::Pop);
        }
        let loop_ctx = self.scope_mut().loops.pop().unwrap();
        for bj in loop_ctx.break_jumps {
            self.patch_jump(bj);
        }
        self.end_scope();
    }

    fn break_statement(&mut self) {
        self.advance();
        if self.scope().loops.is_empty() {
            self.error("Can't break outside a loop.");
            return;
        }
        let depth = self.scope().loops.last().unwrap().locals_depth;
        self.emit_pop_locals_above(depth);
        let jump = self.emit_jump(OpCode::Jump);
        self.scope_mut().loops.last_mut().unwrap().break_jumps.push(jump);
    }

    fn continue_statement(&mut self) {
        self.advance();
        if self.scope().loops.is_empty() {
            self.error("Can't continue outside a loop.");
            return;
        }
        let (depth, target) = {
            let l = self.scope().loops.last().unwrap();
            (l.locals_depth, l.continue_target)
        };
        self.emit_pop_locals_above(depth);
        self.emit_loop(target);
    }

    fn return_statement(&mut self) {
        self.advance();
        if self.scope().fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.check(TokenKind::RightBrace) {
            self.emit_return();
        } else {
            self.expression();
            self.emit(OpCode::Return);
        }
    }

    fn print_statement(&mut self) {
        self.advance();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'print'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after value.");
        self.emit(OpCode::Print);
    }

    fn import_statement(&mut self) {
        self.advance();
        self.consume(TokenKind::String, "Expect module path string.");
        let lexeme = self.previous.lexeme;
        let path = &lexeme[1..lexeme.len() - 1];
        let ptr = self.intern_name(path);
        let idx = self.add_constant(Value::Obj(ptr));
        self.emit_op_byte(OpCode::Import, idx);
        self.emit(OpCode::Pop);
    }

    fn extern_declaration(&mut self) {
        self.advance();
        self.consume(TokenKind::Identifier, "Expect native function name.");
        self.consume(TokenKind::LeftParen, "Expect '(' after native function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.consume(TokenKind::Identifier, "Expect parameter name.");
                if !self.check(TokenKind::Comma) && !self.check(TokenKind::RightParen) {
                    self.advance(); // discard type annotation
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.skip_return_type_annotation();
    }

    /// Discards an optional return-type annotation, written either as a bare
    /// type token or as `-> type`.
    fn skip_return_type_annotation(&mut self) {
        if self.matches(TokenKind::Arrow) {
            self.advance();
        } else if !self.check(TokenKind::LeftBrace) && !self.starts_statement() {
            self.advance();
        }
    }

    fn starts_statement(&self) -> bool {
        use TokenKind::*;
        matches!(
            self.current.kind,
            KwIf | KwFor | KwMatch | KwReturn | KwBreak | KwContinue | KwPrint | KwType
                | KwImport | KwExport | KwExtern | LeftBrace | Identifier | Eof | RightBrace
        )
    }

    // -- identifier-led statements: declarations, assignment, calls --------

    fn identifier_statement(&mut self) {
        self.advance(); // consume the identifier into `previous`
        let name = self.previous;
        match self.current.kind {
            TokenKind::ColonEqual => {
                self.advance();
                self.finish_inferred_declaration(name);
            }
            TokenKind::Colon => {
                self.advance();
                self.finish_typed_declaration(name);
            }
            TokenKind::LeftParen if self.looks_like_function_decl() => {
                self.finish_function_declaration(name);
            }
            _ => {
                self.named_variable(name, true);
                self.run_infix_loop(Precedence::Assignment, true);
                self.emit(OpCode::Pop);
            }
        }
    }

    fn finish_inferred_declaration(&mut self, name: Token<'src>) {
        self.declare_variable(name);
        self.expression();
        let global_const =
            if self.scope().scope_depth == 0 { self.identifier_constant(name.lexeme) } else { 0 };
        self.define_variable(global_const);
    }

    /// Handles `x : T = e`, `x : T : e`, and `x : e`. The type, when
    /// present, is parsed and discarded — only its presence (signaled by an
    /// `=` or `:` immediately following it) distinguishes it from a bare
    /// initializer expression that happens to start with an identifier.
    fn finish_typed_declaration(&mut self, name: Token<'src>) {
        let saved_scanner = self.scanner.save_state();
        let tok1 = self.current;
        let tok2 = self.scanner.scan_token();
        self.scanner.restore_state(saved_scanner);

        let tok1_is_typeish = matches!(
            tok1.kind,
            TokenKind::Identifier
                | TokenKind::KwInt
                | TokenKind::KwFloat
                | TokenKind::KwBool
                | TokenKind::KwStr
                | TokenKind::KwPtr
                | TokenKind::KwByte
                | TokenKind::KwVoid
        );
        let has_type =
            tok1_is_typeish && matches!(tok2.kind, TokenKind::Equal | TokenKind::Colon);

        self.declare_variable(name);
        if has_type {
            self.advance(); // consume the type token, discarding it
            if !self.matches(TokenKind::Equal) {
                self.consume(TokenKind::Colon, "Expect '=' or ':' after type annotation.");
            }
        }
        self.expression();
        let global_const =
            if self.scope().scope_depth == 0 { self.identifier_constant(name.lexeme) } else { 0 };
        self.define_variable(global_const);
    }

    /// Disambiguates a function declaration `name(params) ret? { … }` from a
    /// call expression statement `name(args)`: peeks at most one parameter
    /// past `(` looking for a type token following the first parameter
    /// name, matching the documented `name(x int)` declares / `name(x)`
    /// calls distinction. Pure lookahead — always restores parser state.
    fn looks_like_function_decl(&mut self) -> bool {
        let saved_scanner = self.scanner.save_state();
        let saved_current = self.current;
        let saved_previous = self.previous;

        self.advance(); // consume '('
        let result = if self.check(TokenKind::RightParen) {
            self.advance(); // consume ')'
            self.check(TokenKind::LeftBrace) || !self.starts_statement()
        } else if self.check(TokenKind::Identifier) {
            self.advance(); // consume first parameter name
            !(self.check(TokenKind::Comma) || self.check(TokenKind::RightParen))
        } else {
            false
        };

        self.scanner.restore_state(saved_scanner);
        self.current = saved_current;
        self.previous = saved_previous;
        result
    }

    fn finish_function_declaration(&mut self, name: Token<'src>) {
        let name_const = self.identifier_constant(name.lexeme);
        self.declare_variable(name);
        self.mark_initialized();
        self.compile_function(FunctionType::Function, name.lexeme);
        self.define_variable(name_const);
    }

    fn compile_function(&mut self, fn_type: FunctionType, name: &str) {
        let name_ptr = self.intern_name(name);
        let function = self.heap.alloc(ObjKind::Function(ObjFunction::new(Some(name_ptr))));
        self.scopes.push(FunctionScope::new(function, fn_type));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        let mut arity: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                arity += 1;
                if arity > MAX_ARGS {
                    self.error("Can't have more than 255 parameters.");
                }
                self.consume(TokenKind::Identifier, "Expect parameter name.");
                let param = self.previous;
                self.declare_variable(param);
                self.mark_initialized();
                if !self.check(TokenKind::Comma) && !self.check(TokenKind::RightParen) {
                    self.advance(); // discard type annotation
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.skip_return_type_annotation();
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        unsafe {
            if let ObjKind::Function(f) = &mut (*function).kind {
                f.arity = arity as u8;
            }
        }

        self.emit_return();
        let finished = self.scopes.pop().unwrap();
        let upvalues = finished.upvalues;

        let func_const = self.add_constant(Value::Obj(function));
        self.emit(OpCode::Closure);
        self.emit_byte(func_const);
        for up in &upvalues {
            self.emit_byte(up.is_local as u8);
            self.emit_byte(up.index);
        }
    }

    // -- type (struct) declarations -----------------------------------------

    /// Pre-scans the braced body of a `type` declaration to gather field
    /// names in declaration order, without compiling anything — the
    /// `STRUCT_DEF` instruction needs the field count up front. Method
    /// bodies are skipped by brace/paren depth tracking.
    fn collect_field_names(&self) -> Vec<&'src str> {
        let mut pre = Scanner::new(self.src);
        pre.restore_state(self.scanner.save_state());
        let mut fields = Vec::new();
        let mut depth: i32 = 0;
        // `self.current` is already one token past the opening '{'; the
        // freshly restored `pre` scanner's cursor picks up right after it.
        let mut tok = self.current;
        loop {
            match tok.kind {
                TokenKind::Eof => break,
                TokenKind::RightBrace if depth == 0 => break,
                TokenKind::LeftBrace | TokenKind::LeftParen => {
                    depth += 1;
                    tok = pre.scan_token();
                }
                TokenKind::RightBrace | TokenKind::RightParen => {
                    depth -= 1;
                    tok = pre.scan_token();
                }
                TokenKind::Identifier if depth == 0 => {
                    let name = tok.lexeme;
                    let next = pre.scan_token();
                    if next.kind == TokenKind::Colon {
                        fields.push(name);
                    }
                    tok = next;
                }
                _ => {
                    tok = pre.scan_token();
                }
            }
        }
        fields
    }

    fn type_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect type name.");
        let name = self.previous;
        let name_const = self.identifier_constant(name.lexeme);
        self.declare_variable(name);

        self.consume(TokenKind::LeftBrace, "Expect '{' before type body.");
        let fields = self.collect_field_names();
        if fields.len() >= MAX_FIELDS {
            self.error("Too many fields in type.");
        }

        self.emit(OpCode::StructDef);
        self.emit_byte(fields.len() as u8);
        self.emit_byte(name_const);
        let field_consts: Vec<u8> =
            fields.iter().map(|f| self.identifier_constant(f)).collect();
        for fc in field_consts {
            self.emit_op_byte(OpCode::StructField, fc);
        }

        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.consume(TokenKind::Identifier, "Expect field or method name.");
            let member = self.previous;
            if self.check(TokenKind::Colon) {
                self.advance(); // ':'
                self.advance(); // type annotation, discarded (already counted above)
                self.matches(TokenKind::Comma);
            } else if self.check(TokenKind::LeftParen) {
                let method_const = self.identifier_constant(member.lexeme);
                self.compile_function(FunctionType::Method, member.lexeme);
                self.emit_op_byte(OpCode::Method, method_const);
            } else {
                self.error("Expect ':' for a field or '(' for a method.");
                self.advance();
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after type body.");
        self.define_variable(name_const);
    }

    // -- match statement ------------------------------------------------------

    fn match_statement(&mut self) {
        self.advance();
        self.expression();
        self.consume(TokenKind::LeftBrace, "Expect '{' after match subject.");
        self.begin_scope();
        self.add_local("");
        self.mark_initialized();
        let subject_slot = (self.scope().locals.len() - 1) as u8;

        let mut end_jumps = Vec::new();
        loop {
            if self.check(TokenKind::RightBrace) || self.check(TokenKind::Eof) {
                break;
            }
            if self.check(TokenKind::Identifier) && self.current.lexeme == "_" {
                self.advance();
                self.consume(TokenKind::LeftBrace, "Expect '{' for match arm body.");
                self.begin_scope();
                self.block();
                self.end_scope();
                end_jumps.push(self.emit_jump(OpCode::Jump));
                break;
            } else if self.check(TokenKind::Identifier) {
                self.advance();
                let bind_name = self.previous;
                self.begin_scope();
                self.emit_op_byte(OpCode::GetLocal, subject_slot);
                self.declare_variable(bind_name);
                self.mark_initialized();
                self.consume(TokenKind::LeftBrace, "Expect '{' for match arm body.");
                self.block();
                self.end_scope();
                end_jumps.push(self.emit_jump(OpCode::Jump));
                break;
            } else {
                self.emit_op_byte(OpCode::GetLocal, subject_slot);
                self.advance();
                let pattern_kind = self.previous.kind;
                self.prefix(pattern_kind, false);
                self.emit(OpCode::Equal);
                let next_arm = self.emit_jump(OpCode::JumpIfFalse);
                self.emit(OpCode::Pop);
                self.consume(TokenKind::LeftBrace, "Expect '{' for match arm body.");
                self.begin_scope();
                self.block();
                self.end_scope();
                end_jumps.push(self.emit_jump(OpCode::Jump));
                self.patch_jump(next_arm);
                self.emit(OpCode::Pop);
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after match arms.");
        for j in end_jumps {
            self.patch_jump(j);
        }
        self.end_scope();
    }
}

fn parse_int_literal(lexeme: &str) -> i64 {
    if let Some(hex) = lexeme.strip_prefix("0x").or_else(|| lexeme.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else if let Some(bin) = lexeme.strip_prefix("0b").or_else(|| lexeme.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).unwrap_or(0)
    } else {
        lexeme.parse().unwrap_or(0)
    }
}
