//! The single-pass compiler: one `Compiler` drives a recursive-descent
//! parser with Pratt-style expression parsing, emitting bytecode directly
//! into a [`Chunk`] rather than building an intermediate tree.
//!
//! Per-function state (locals, scope depth, upvalues) lives in a stack of
//! [`FunctionScope`]s rather than the teacher's process-wide `current`
//! pointer — the enclosing-pointer chain becomes a `Vec`, walked from the
//! top down wherever the original recurses through `compiler->enclosing`.

use ember_gc::GcRef;
use ember_lex::{Lexer, Token, TokenKind};
use ember_util::{Diagnostic, Span};
use ember_vm::{Chunk, Obj, ObjFunction, OpCode, Value, Vm};

use crate::precedence::Precedence;
use crate::rules::get_rule;

const MAX_LOCALS: usize = 4096;
const MAX_ARGS: usize = 255;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    Script,
    Function,
    Method,
}

/// A local's name, either a slice of the source (ordinary user variables)
/// or a fixed string for the synthetic `this`/`super` slots a method or
/// inheriting class declares without any corresponding source token.
#[derive(Clone, Copy)]
enum LocalName {
    Span(Span),
    Static(&'static str),
}

struct LocalVar {
    name: LocalName,
    depth: i32,
    is_captured: bool,
}

struct UpvalueDesc {
    index: u32,
    is_local: bool,
}

/// One function's worth of in-progress compilation state: the chunk being
/// filled in, its locals/upvalues, and enough identity to assemble an
/// `ObjFunction` once the body is fully parsed.
struct FunctionScope {
    chunk: Chunk,
    arity: u8,
    name: Option<GcRef<Obj>>,
    function_type: FunctionType,
    locals: Vec<LocalVar>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
}

impl FunctionScope {
    fn new(function_type: FunctionType, name: Option<GcRef<Obj>>) -> Self {
        // Slot 0 is reserved for the callee itself (or, in a method, the
        // receiver) — never addressable by user code except through the
        // `this` keyword in a method body, which overwrites this name.
        Self {
            chunk: Chunk::new(),
            arity: 0,
            name,
            function_type,
            locals: vec![LocalVar { name: LocalName::Static(""), depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

/// Tracks whether the class currently being compiled has a superclass, so
/// `super` outside any inheriting class is a compile error. Forms its own
/// enclosing chain, independent of [`FunctionScope`]'s, since a method's
/// function scope nests inside the class that declares it.
struct ClassScope {
    has_superclass: bool,
}

pub struct Compiler<'vm, 'src> {
    vm: &'vm mut Vm,
    source: &'src str,
    lexer: Lexer<'src>,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    scopes: Vec<FunctionScope>,
    classes: Vec<ClassScope>,
}

impl<'vm, 'src> Compiler<'vm, 'src> {
    pub fn new(vm: &'vm mut Vm, source: &'src str) -> Self {
        let dummy = Token { kind: TokenKind::Eof, span: Span::new(0, 0), line: 0, message: None };
        Self {
            vm,
            source,
            lexer: Lexer::new(source),
            previous: dummy.clone(),
            current: dummy,
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            scopes: vec![FunctionScope::new(FunctionType::Script, None)],
            classes: Vec::new(),
        }
    }

    pub fn compile(mut self) -> Result<GcRef<Obj>, Vec<Diagnostic>> {
        self.advance();
        while !self.match_token(TokenKind::Eof) {
            self.declaration();
        }
        let function = self.end_function();
        if self.had_error {
            Err(self.diagnostics)
        } else {
            Ok(function)
        }
    }

    // ---- token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.message.unwrap_or("unexpected character");
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
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

    fn lexeme(&self, token: &Token) -> &'src str {
        self.text_at(token.span)
    }

    fn text_at(&self, span: Span) -> &'src str {
        &self.source[span.start as usize..span.end as usize]
    }

    // ---- diagnostics ----------------------------------------------------

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let text = match token.kind {
            TokenKind::Eof => "at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!("at '{}'", self.lexeme(token)),
        };
        let full = if text.is_empty() { message.to_string() } else { format!("{text}: {message}") };
        self.diagnostics.push(Diagnostic::error(full, token.span, token.line));
        tracing::debug!(line = token.line, message, "compile error");
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- chunk access / emission ------------------------------------

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.scopes.last_mut().unwrap().chunk
    }

    fn line(&self) -> u32 {
        self.previous.line
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.chunk().write_op(op, line);
    }

    fn emit_u8(&mut self, byte: u8) {
        let line = self.line();
        self.chunk().write_u8(byte, line);
    }

    fn emit_u24(&mut self, value: u32) {
        let line = self.line();
        self.chunk().write_u24(value, line);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    /// Reserves 3 operand bytes after `op` and returns the offset to
    /// back-patch once the jump target is known.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_u24(0);
        self.chunk().code.len() - 3
    }

    fn patch_jump(&mut self, offset: usize) {
        let target = self.chunk().code.len() as u32;
        let delta = target - offset as u32 - 3;
        self.chunk().patch_u24(offset, delta);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.line();
        self.chunk().write_op(OpCode::Loop, line);
        let diff = self.chunk().code.len() as u32 - loop_start as u32 + 3;
        self.chunk().write_u24(diff, line);
    }

    /// Roots for every heap string this compile has interned into a chunk
    /// constant pool that isn't yet reachable from any runtime root — the
    /// "compiler-in-progress" root category. Collected on demand right
    /// before any allocation the compiler itself triggers.
    fn in_progress_roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        for scope in &self.scopes {
            roots.extend(scope.chunk.constants.iter().copied());
            if let Some(name) = scope.name {
                roots.push(Value::from_obj(name));
            }
        }
        roots
    }

    fn intern(&mut self, bytes: &[u8]) -> Value {
        let roots = self.in_progress_roots();
        Value::from_obj(self.vm.alloc_string(bytes, &roots))
    }

    /// Adds `value` to the current function's constant pool and emits
    /// whichever of `op`/`op_long` fits the resulting index width.
    fn emit_constant_op(&mut self, op: OpCode, op_long: OpCode, value: Value) {
        let index = self.chunk().add_constant(value);
        if index < 256 {
            self.emit_op(op);
            self.emit_u8(index as u8);
        } else {
            self.emit_op(op_long);
            self.emit_u24(index);
        }
    }

    /// Pools `value` and returns its index as a single byte. Used by the
    /// handful of opcodes (`CLASS`, `METHOD`, `GET_SUPER`, `INVOKE`,
    /// `SUPER_INVOKE`) that have no `_LONG` counterpart — a method or
    /// class name count past 255 in one compile unit is a compile error,
    /// not a wider encoding.
    fn constant_index_u8(&mut self, value: Value) -> u8 {
        let index = self.chunk().add_constant(value);
        if index > u8::MAX as u32 {
            self.error("Too many constants in one chunk");
        }
        index as u8
    }

    fn identifier_constant(&mut self, token: &Token) -> Value {
        let text = self.lexeme(token).as_bytes().to_vec();
        self.intern(&text)
    }

    // ---- scopes -------------------------------------------------------

    fn begin_scope(&mut self) {
        self.scopes.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let mut closes = Vec::new();
        {
            let scope = self.scopes.last_mut().unwrap();
            scope.scope_depth -= 1;
            let depth = scope.scope_depth;
            while let Some(local) = scope.locals.last() {
                if local.depth <= depth {
                    break;
                }
                closes.push(local.is_captured);
                scope.locals.pop();
            }
        }
        for captured in closes {
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    // ---- locals / upvalues --------------------------------------------

    fn local_text(&self, name: LocalName) -> &'src str {
        match name {
            LocalName::Span(span) => self.text_at(span),
            LocalName::Static(s) => s,
        }
    }

    fn resolve_local(&mut self, depth_from_top: usize, name: &str) -> Option<u32> {
        let scope_idx = self.scopes.len() - 1 - depth_from_top;
        let found = {
            let scope = &self.scopes[scope_idx];
            scope
                .locals
                .iter()
                .enumerate()
                .rev()
                .find_map(|(i, local)| (self.local_text(local.name) == name).then_some((i as u32, local.depth)))
        };
        let (index, depth) = found?;
        if depth == -1 {
            self.error("Can't read local variable in its own initializer");
        }
        Some(index)
    }

    fn add_upvalue(scope: &mut FunctionScope, index: u32, is_local: bool) -> u32 {
        for (i, uv) in scope.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u32;
            }
        }
        scope.upvalues.push(UpvalueDesc { index, is_local });
        (scope.upvalues.len() - 1) as u32
    }

    /// Mirrors `resolve_upvalue`'s recursion through `compiler->enclosing`
    /// by walking `self.scopes` from `depth_from_top` outward instead.
    fn resolve_upvalue(&mut self, depth_from_top: usize, name: &str) -> Option<u32> {
        if depth_from_top + 1 >= self.scopes.len() {
            return None;
        }
        if let Some(local) = self.resolve_local(depth_from_top + 1, name) {
            let enclosing_idx = self.scopes.len() - 1 - (depth_from_top + 1);
            self.scopes[enclosing_idx].locals[local as usize].is_captured = true;
            let idx = self.scopes.len() - 1 - depth_from_top;
            return Some(Self::add_upvalue(&mut self.scopes[idx], local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(depth_from_top + 1, name) {
            let idx = self.scopes.len() - 1 - depth_from_top;
            return Some(Self::add_upvalue(&mut self.scopes[idx], upvalue, false));
        }
        None
    }

    fn add_local(&mut self, name: LocalName) {
        if self.scopes.last().unwrap().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function");
            return;
        }
        self.scopes.last_mut().unwrap().locals.push(LocalVar { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.scopes.last().unwrap().scope_depth == 0 {
            return;
        }
        let span = self.previous.span;
        let name_text = self.text_at(span);
        let duplicate = {
            let scope = self.scopes.last().unwrap();
            let depth = scope.scope_depth;
            let mut duplicate = false;
            for local in scope.locals.iter().rev() {
                if local.depth != -1 && local.depth < depth {
                    break;
                }
                if self.local_text(local.name) == name_text {
                    duplicate = true;
                    break;
                }
            }
            duplicate
        };
        if duplicate {
            self.error("Already a variable with this name in this scope");
        }
        self.add_local(LocalName::Span(span));
    }

    /// Parses an identifier, declares it, and — for globals — returns the
    /// interned-name constant `define_variable` will need. Locals don't
    /// need one; the scope-depth stamp in `define_variable` is enough.
    fn parse_variable(&mut self, message: &str) -> Value {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.scopes.last().unwrap().scope_depth > 0 {
            return Value::nil();
        }
        self.identifier_constant(&self.previous.clone())
    }

    fn mark_initialized(&mut self) {
        let scope = self.scopes.last_mut().unwrap();
        if scope.scope_depth == 0 {
            return;
        }
        let depth = scope.scope_depth;
        scope.locals.last_mut().unwrap().depth = depth;
    }

    fn define_variable(&mut self, global: Value) {
        if self.scopes.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_constant_op(OpCode::DefineGlobal, OpCode::DefineGlobalLong, global);
    }

    // ---- expressions ----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        if self.previous.kind == TokenKind::Eof {
            return;
        }
        let prefix = get_rule(self.previous.kind).prefix;
        let Some(prefix) = prefix else {
            self.error("Expected an expression");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind).infix.unwrap();
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target");
        }
    }

    pub(crate) fn number(&mut self, _can_assign: bool) {
        let text = self.lexeme(&self.previous.clone());
        let value: f64 = text.parse().unwrap_or(0.0);
        self.emit_constant_op(OpCode::Constant, OpCode::ConstantLong, Value::number(value));
    }

    pub(crate) fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            _ => unreachable!(),
        }
    }

    pub(crate) fn string(&mut self, _can_assign: bool) {
        let token = self.previous.clone();
        let lexeme = self.lexeme(&token);
        // Strip the surrounding quotes; the language does no escape
        // processing, so the remaining bytes are used verbatim.
        let bytes = lexeme.as_bytes()[1..lexeme.len() - 1].to_vec();
        let value = self.intern(&bytes);
        self.emit_constant_op(OpCode::Constant, OpCode::ConstantLong, value);
    }

    pub(crate) fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after expression");
    }

    pub(crate) fn array(&mut self, _can_assign: bool) {
        let mut count: usize = 0;
        if !self.match_token(TokenKind::RightBracket) {
            self.expression();
            count += 1;
            while !self.match_token(TokenKind::RightBracket) {
                self.consume(TokenKind::Comma, "Expected ',' in list");
                if self.match_token(TokenKind::RightBracket) {
                    break;
                }
                self.expression();
                count += 1;
            }
        }
        if count < 256 {
            self.emit_op(OpCode::Array);
            self.emit_u8(count as u8);
        } else {
            self.emit_op(OpCode::ArrayLong);
            self.emit_u24(count as u32);
        }
    }

    pub(crate) fn index(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expected ']' after array index");
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetIndex);
        } else {
            self.emit_op(OpCode::GetIndex);
        }
    }

    pub(crate) fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    pub(crate) fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(rule.precedence.next());
        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Sub),
            TokenKind::Star => self.emit_op(OpCode::Mul),
            TokenKind::Slash => self.emit_op(OpCode::Div),
            TokenKind::Percent => self.emit_op(OpCode::Mod),
            TokenKind::BangEqual => self.emit_op(OpCode::NotEqual),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_op(OpCode::LessEqual),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_op(OpCode::GreaterEqual),
            _ => unreachable!(),
        }
    }

    pub(crate) fn ternary(&mut self, _can_assign: bool) {
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.expression();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.consume(TokenKind::Colon, "expected ':' in ternary expression");
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        // Right-associative: the else-branch parses at assignment
        // precedence, so `a ? b : c ? d : e` nests as expected.
        self.parse_precedence(Precedence::Assignment);
        self.patch_jump(else_jump);
    }

    pub(crate) fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    pub(crate) fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count as usize == MAX_ARGS {
                    self.error("Can't have more than 255 arguments in function call");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after arguments");
        count as u8
    }

    pub(crate) fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_u8(arg_count);
    }

    pub(crate) fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expected property name after '.'");
        let name = self.identifier_constant(&self.previous.clone());
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_constant_op(OpCode::SetProp, OpCode::SetPropLong, name);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            let index = self.constant_index_u8(name);
            self.emit_op(OpCode::Invoke);
            self.emit_u8(index);
            self.emit_u8(arg_count);
        } else {
            self.emit_constant_op(OpCode::GetProp, OpCode::GetPropLong, name);
        }
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get_op, set_op, arg);
        if let Some(local) = self.resolve_local(0, name) {
            get_op = OpCode::GetLocal;
            set_op = OpCode::SetLocal;
            arg = local;
        } else if let Some(upvalue) = self.resolve_upvalue(0, name) {
            get_op = OpCode::GetUpvalue;
            set_op = OpCode::SetUpvalue;
            arg = upvalue;
        } else {
            let global = self.intern(name.as_bytes());
            if can_assign && self.match_token(TokenKind::Equal) {
                self.expression();
                self.emit_constant_op(OpCode::SetGlobal, OpCode::SetGlobalLong, global);
                return;
            }
            self.emit_constant_op(OpCode::GetGlobal, OpCode::GetGlobalLong, global);
            return;
        }
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
            self.emit_u24(arg);
        } else {
            self.emit_op(get_op);
            self.emit_u24(arg);
        }
    }

    pub(crate) fn variable(&mut self, can_assign: bool) {
        let token = self.previous.clone();
        let text = self.lexeme(&token);
        self.named_variable(text, can_assign);
    }

    pub(crate) fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class method");
            return;
        }
        self.named_variable("this", false);
    }

    pub(crate) fn super_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass");
        }
        self.consume(TokenKind::Dot, "Expected '.' after 'super'");
        self.consume(TokenKind::Identifier, "Expected superclass method name");
        let method_name = self.identifier_constant(&self.previous.clone());

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable("super", false);
            let index = self.constant_index_u8(method_name);
            self.emit_op(OpCode::SuperInvoke);
            self.emit_u8(index);
            self.emit_u8(arg_count);
        } else {
            self.named_variable("super", false);
            let index = self.constant_index_u8(method_name);
            self.emit_op(OpCode::GetSuper);
            self.emit_u8(index);
        }
    }

    // ---- statements -----------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.function_declaration();
        } else if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expected a variable name identifier");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expected ';' after variable declaration");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after value");
        self.emit_op(OpCode::Print);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expected '(' after if keyword");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' in if statement");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expected '(' after while keyword");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' in while statement");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expected '(' after for keyword");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after condition in for statement");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expected ')' after for clause");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after block");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after value");
        self.emit_op(OpCode::Pop);
    }

    fn return_statement(&mut self) {
        if self.scopes.last().unwrap().function_type == FunctionType::Script {
            self.error("Can't return from top-level code");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after return statement");
            self.emit_op(OpCode::Return);
        }
    }

    // ---- functions / classes --------------------------------------------

    /// Pops the current scope and allocates its `ObjFunction`. The scope's
    /// own constant pool (and name) are rooted explicitly for this one
    /// call: by the time we pop, `in_progress_roots` no longer walks it.
    fn end_function(&mut self) -> GcRef<Obj> {
        self.emit_return();
        let scope = self.scopes.pop().unwrap();
        let upvalue_count = scope.upvalues.len() as u8;
        let mut roots = self.in_progress_roots();
        roots.extend(scope.chunk.constants.iter().copied());
        if let Some(name) = scope.name {
            roots.push(Value::from_obj(name));
        }
        let obj_function =
            ObjFunction { arity: scope.arity, upvalue_count, name: scope.name, chunk: scope.chunk };
        self.vm.alloc_obj(Obj::Function(obj_function), &roots)
    }

    fn function(&mut self, function_type: FunctionType) {
        let name_token = self.previous.clone();
        let name = self.identifier_constant(&name_token).as_obj();
        self.scopes.push(FunctionScope::new(function_type, name));
        if function_type == FunctionType::Method {
            self.scopes.last_mut().unwrap().locals[0].name = LocalName::Static("this");
        }
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' after function name");
        let mut arity: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                arity += 1;
                if arity > MAX_ARGS {
                    self.error_at_current("Can't have more than 255 parameters in function");
                }
                let param = self.parse_variable("Expected parameter name");
                self.define_variable(param);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.scopes.last_mut().unwrap().arity = arity.min(MAX_ARGS) as u8;
        self.consume(TokenKind::RightParen, "Expected ')' after parameters");
        self.consume(TokenKind::LeftBrace, "Expected '{' before function body");
        self.block();

        let upvalues: Vec<(bool, u32)> = {
            let scope = self.scopes.last().unwrap();
            scope.upvalues.iter().map(|uv| (uv.is_local, uv.index)).collect()
        };
        let function = self.end_function();
        let value = Value::from_obj(function);
        self.emit_constant_op(OpCode::Closure, OpCode::ClosureLong, value);
        for (is_local, index) in upvalues {
            self.emit_u8(if is_local { 1 } else { 0 });
            self.emit_u24(index);
        }
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("Expected valid function name");
        // Mark the name initialized before compiling the body so a
        // recursive local function can resolve its own name as a local
        // instead of tripping the own-initializer guard in `resolve_local`.
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expected valid class name");
        let name_token = self.previous.clone();
        let name_constant = self.identifier_constant(&name_token);
        self.declare_variable();

        let index = self.constant_index_u8(name_constant);
        self.emit_op(OpCode::Class);
        self.emit_u8(index);
        self.define_variable(name_constant);

        self.classes.push(ClassScope { has_superclass: false });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expected superclass name");
            self.variable(false);

            if self.lexeme(&name_token) == self.lexeme(&self.previous.clone()) {
                self.error("A class can't inherit from itself");
            }

            self.begin_scope();
            self.add_local(LocalName::Static("super"));
            self.define_variable(Value::nil());

            self.named_variable(self.lexeme(&name_token), false);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(self.lexeme(&name_token), false);
        self.consume(TokenKind::LeftBrace, "Expected '{' before class body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after class body");
        self.emit_op(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expected method name");
        let name = self.identifier_constant(&self.previous.clone());
        self.function(FunctionType::Method);
        let index = self.constant_index_u8(name);
        self.emit_op(OpCode::Method);
        self.emit_u8(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_vm::ObjFunction;

    fn compile_ok(source: &str) -> (Vm, GcRef<Obj>) {
        let mut vm = Vm::new();
        let result = Compiler::new(&mut vm, source).compile();
        match result {
            Ok(function) => (vm, function),
            Err(diagnostics) => panic!("unexpected compile error(s): {diagnostics:?}"),
        }
    }

    fn compile_err(source: &str) -> Vec<Diagnostic> {
        let mut vm = Vm::new();
        match Compiler::new(&mut vm, source).compile() {
            Ok(_) => panic!("expected a compile error"),
            Err(diagnostics) => diagnostics,
        }
    }

    fn as_function(obj: &GcRef<Obj>) -> &ObjFunction {
        match &**obj {
            Obj::Function(f) => f,
            other => panic!("expected a function, got {}", other.type_name()),
        }
    }

    fn opcodes(chunk: &Chunk) -> Vec<OpCode> {
        // Walks `chunk.code` decoding just the opcode byte of each
        // instruction, skipping over its operand bytes by width. Good
        // enough for asserting shape without duplicating the VM's decoder.
        let mut out = Vec::new();
        let mut i = 0;
        while i < chunk.code.len() {
            let op = OpCode::from_u8(chunk.code[i]);
            let operand_len = match op {
                OpCode::Constant
                | OpCode::DefineGlobal
                | OpCode::GetGlobal
                | OpCode::SetGlobal
                | OpCode::GetProp
                | OpCode::SetProp
                | OpCode::Array
                | OpCode::Call
                | OpCode::Class
                | OpCode::Method
                | OpCode::GetSuper => 1,
                OpCode::Invoke | OpCode::SuperInvoke => 2,
                OpCode::ConstantLong
                | OpCode::DefineGlobalLong
                | OpCode::GetGlobalLong
                | OpCode::SetGlobalLong
                | OpCode::GetLocal
                | OpCode::SetLocal
                | OpCode::GetUpvalue
                | OpCode::SetUpvalue
                | OpCode::GetPropLong
                | OpCode::SetPropLong
                | OpCode::ArrayLong
                | OpCode::PopN
                | OpCode::Jump
                | OpCode::JumpIfFalse
                | OpCode::Loop => 3,
                OpCode::Closure | OpCode::ClosureLong => {
                    // Variable-width: a fixed prefix plus one (is_local, index)
                    // pair per upvalue, which the constant pool tells us about
                    // only indirectly. Tests that care about upvalue encoding
                    // read `chunk.code` directly instead of using this helper.
                    out.push(op);
                    break;
                }
                _ => 0,
            };
            out.push(op);
            i += 1 + operand_len;
        }
        out
    }

    #[test]
    fn number_literal_emits_constant() {
        let (_vm, function) = compile_ok("1;");
        let f = as_function(&function);
        assert_eq!(opcodes(&f.chunk), vec![OpCode::Constant, OpCode::Pop, OpCode::Nil, OpCode::Return]);
        assert_eq!(f.chunk.constants[0].as_number(), Some(1.0));
    }

    #[test]
    fn arithmetic_precedence() {
        let (_vm, function) = compile_ok("1 + 2 * 3;");
        let f = as_function(&function);
        assert_eq!(
            opcodes(&f.chunk),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Mul,
                OpCode::Add,
                OpCode::Pop,
                OpCode::Nil,
                OpCode::Return,
            ]
        );
    }

    #[test]
    fn global_variable_roundtrip() {
        let (_vm, function) = compile_ok("var x = 1; x = 2; print x;");
        let f = as_function(&function);
        assert_eq!(
            opcodes(&f.chunk),
            vec![
                OpCode::Constant,
                OpCode::DefineGlobal,
                OpCode::Constant,
                OpCode::SetGlobal,
                OpCode::Pop,
                OpCode::GetGlobal,
                OpCode::Print,
                OpCode::Nil,
                OpCode::Return,
            ]
        );
    }

    #[test]
    fn local_variable_uses_slot_opcodes() {
        let (_vm, function) = compile_ok("{ var x = 1; x = x + 1; print x; }");
        let f = as_function(&function);
        assert_eq!(
            opcodes(&f.chunk),
            vec![
                OpCode::Constant,
                OpCode::GetLocal,
                OpCode::Constant,
                OpCode::Add,
                OpCode::SetLocal,
                OpCode::Pop,
                OpCode::GetLocal,
                OpCode::Print,
                OpCode::Pop,
                OpCode::Nil,
                OpCode::Return,
            ]
        );
    }

    #[test]
    fn redeclaring_local_in_same_scope_is_an_error() {
        let diagnostics = compile_err("{ var x = 1; var x = 2; }");
        assert!(diagnostics.iter().any(|d| d.message.contains("Already a variable")));
    }

    #[test]
    fn reading_local_in_its_own_initializer_is_an_error() {
        let diagnostics = compile_err("{ var x = x; }");
        assert!(diagnostics.iter().any(|d| d.message.contains("own initializer")));
    }

    #[test]
    fn return_outside_function_is_an_error() {
        let diagnostics = compile_err("return 1;");
        assert!(diagnostics.iter().any(|d| d.message.contains("top-level")));
    }

    #[test]
    fn panic_mode_recovers_and_collects_multiple_errors() {
        let diagnostics = compile_err("var ; var ;");
        assert!(diagnostics.len() >= 2);
    }

    #[test]
    fn if_else_emits_jump_pair() {
        let (_vm, function) = compile_ok("if (true) { 1; } else { 2; }");
        let f = as_function(&function);
        assert_eq!(
            opcodes(&f.chunk),
            vec![
                OpCode::True,
                OpCode::JumpIfFalse,
                OpCode::Pop,
                OpCode::Constant,
                OpCode::Pop,
                OpCode::Jump,
                OpCode::Pop,
                OpCode::Constant,
                OpCode::Pop,
                OpCode::Nil,
                OpCode::Return,
            ]
        );
    }

    #[test]
    fn while_loop_emits_loop_instruction() {
        let (_vm, function) = compile_ok("while (true) { 1; }");
        let f = as_function(&function);
        assert!(opcodes(&f.chunk).contains(&OpCode::Loop));
    }

    #[test]
    fn for_loop_desugars_to_while_shape() {
        let (_vm, function) = compile_ok("for (var i = 0; i < 3; i = i + 1) { print i; }");
        let f = as_function(&function);
        let ops = opcodes(&f.chunk);
        assert!(ops.contains(&OpCode::Loop));
        assert!(ops.contains(&OpCode::Less));
        assert!(ops.contains(&OpCode::Print));
    }

    #[test]
    fn ternary_is_right_associative() {
        // `a ? b : c ? d : e` must parse as `a ? b : (c ? d : e)`, so the
        // `else` branch itself contains a nested jump pair rather than the
        // expression stopping after the first `:`.
        let (_vm, function) = compile_ok("true ? 1 : false ? 2 : 3;");
        let f = as_function(&function);
        let jump_count = opcodes(&f.chunk).iter().filter(|op| **op == OpCode::JumpIfFalse).count();
        assert_eq!(jump_count, 2);
    }

    #[test]
    fn string_literal_strips_quotes() {
        let (_vm, function) = compile_ok("\"hi\";");
        let f = as_function(&function);
        let value = f.chunk.constants[0];
        let obj = value.as_obj().unwrap();
        match &*obj {
            Obj::String(s) => assert_eq!(&s.bytes.borrow()[..], b"hi"),
            _ => panic!("expected a string constant"),
        }
    }

    #[test]
    fn array_literal_emits_array_with_count() {
        let (_vm, function) = compile_ok("[1, 2, 3];");
        let f = as_function(&function);
        assert_eq!(opcodes(&f.chunk), vec![
            OpCode::Constant,
            OpCode::Constant,
            OpCode::Constant,
            OpCode::Array,
            OpCode::Pop,
            OpCode::Nil,
            OpCode::Return,
        ]);
        let array_count_offset = f.chunk.code.iter().position(|&b| b == OpCode::Array as u8).unwrap() + 1;
        assert_eq!(f.chunk.code[array_count_offset], 3);
    }

    #[test]
    fn index_get_and_set() {
        let (_vm, function) = compile_ok("var a = [1]; a[0] = 2; print a[0];");
        let f = as_function(&function);
        let ops = opcodes(&f.chunk);
        assert!(ops.contains(&OpCode::SetIndex));
        assert!(ops.contains(&OpCode::GetIndex));
    }

    #[test]
    fn function_declaration_emits_closure() {
        let (_vm, function) = compile_ok("fun add(a, b) { return a + b; }");
        let f = as_function(&function);
        assert!(f.chunk.code.contains(&(OpCode::Closure as u8)));
    }

    #[test]
    fn recursive_local_function_resolves_its_own_name_as_local() {
        // If `mark_initialized` weren't called before compiling the body,
        // this would trip the "own initializer" guard instead of compiling.
        compile_ok("{ fun fact(n) { if (n < 2) { return 1; } return n * fact(n - 1); } }");
    }

    #[test]
    fn closure_captures_enclosing_local_as_upvalue() {
        let (_vm, function) = compile_ok("fun outer() { var x = 1; fun inner() { return x; } return inner; }");
        let f = as_function(&function);
        assert!(f.chunk.code.contains(&(OpCode::Closure as u8)));
    }

    #[test]
    fn too_many_function_arguments_is_an_error() {
        let params = (0..300).map(|i| format!("a{i}")).collect::<Vec<_>>().join(", ");
        let source = format!("fun f({params}) {{}}");
        let diagnostics = compile_err(&source);
        assert!(diagnostics.iter().any(|d| d.message.contains("255 parameters")));
    }

    #[test]
    fn class_declaration_emits_class_and_methods() {
        let (_vm, function) = compile_ok("class Greeter { greet() { print \"hi\"; } }");
        let f = as_function(&function);
        assert!(f.chunk.code.contains(&(OpCode::Class as u8)));
        assert!(f.chunk.code.contains(&(OpCode::Method as u8)));
    }

    #[test]
    fn this_inside_method_resolves_as_local() {
        let (_vm, function) =
            compile_ok("class Box { value() { return this; } }");
        let _ = as_function(&function);
    }

    #[test]
    fn this_outside_method_is_an_error() {
        let diagnostics = compile_err("print this;");
        assert!(diagnostics.iter().any(|d| d.message.contains("'this'")));
    }

    #[test]
    fn inheritance_emits_inherit_and_resolves_super() {
        let source = "class Animal { speak() { print \"...\"; } } \
                       class Dog < Animal { speak() { super.speak(); } }";
        let (_vm, function) = compile_ok(source);
        let f = as_function(&function);
        assert!(f.chunk.code.contains(&(OpCode::Inherit as u8)));
    }

    #[test]
    fn super_outside_subclass_is_an_error() {
        let diagnostics = compile_err("class Animal { speak() { super.speak(); } }");
        assert!(diagnostics.iter().any(|d| d.message.contains("no superclass")));
    }

    #[test]
    fn class_inheriting_from_itself_is_an_error() {
        let diagnostics = compile_err("class Loop < Loop {}");
        assert!(diagnostics.iter().any(|d| d.message.contains("inherit from itself")));
    }

    #[test]
    fn method_call_emits_invoke() {
        let source = "class Box { get() { return 1; } } var b = Box(); print b.get();";
        let (_vm, function) = compile_ok(source);
        let f = as_function(&function);
        assert!(f.chunk.code.contains(&(OpCode::Invoke as u8)));
    }
}
