//! Contains the Lox parser and bytecode compiler.
use std::rc::Rc;

use crate::chunk::WrittenOpcode;
use crate::object::{Heap, Obj, ObjFunction};
use crate::prelude::*;

/////////////////////////////////////////// Public API ////////////////////////////////////////////

/// Maximum number of parameters (and arguments) a function may have.
pub const MAX_PARAMS: usize = 255;

/// Compiles the given Lox source code into the implicit top-level function ("script"). String and
/// identifier constants are interned into `heap`, which should be the same heap the VM will run
/// against.
pub fn compile(source: &str, heap: &mut Heap) -> crate::Result<Rc<Obj>> {
    let parser = Parser::new(source);
    let compiler = Compiler::new(parser, heap);
    compiler.compile()
}

///////////////////////////////////// Implementation details //////////////////////////////////////

const U8_COUNT: usize = u8::MAX as usize + 1;

/// Whether the chunk currently being compiled is the implicit top-level script, or a user-defined
/// function body. Only the latter may contain a `return` with a value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FunctionType {
    Script,
    Function,
}

/// One function's worth of compiler state: its own chunk, its own locals array, and its own scope
/// depth. A new [Nesting] is pushed for each nested function body, avoiding a recursive, boxed
/// compiler while still letting an inner function's compilation reach the bytecode-emitting
/// methods on [Compiler].
struct Nesting<'a> {
    function_type: FunctionType,
    name: Option<&'a str>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'a>>,
    scope_depth: isize,
}

impl<'a> Nesting<'a> {
    fn new(function_type: FunctionType, name: Option<&'a str>) -> Self {
        // Slot 0 is reserved for the function being called; it holds no user-visible name.
        let locals = vec![Local { name: Lexeme::empty(), depth: Some(0) }];
        Nesting { function_type, name, arity: 0, chunk: Chunk::default(), locals, scope_depth: 0 }
    }
}

/// Contains the compiler state: the [Parser], a stack of [Nesting]s (one per function currently
/// being compiled), and the [Heap] string/identifier constants are interned into.
struct Compiler<'a, 'h> {
    parser: Parser<'a>,
    heap: &'h mut Heap,
    nestings: Vec<Nesting<'a>>,
}

#[derive(Clone)]
struct Local<'a> {
    name: Lexeme<'a>,
    depth: Option<isize>,
}

/// Contains the parser state. For some strange reason, this also includes error status.
#[derive(Debug)]
struct Parser<'a> {
    scanner: Scanner<'a>,
    current: Lexeme<'a>,
    previous: Lexeme<'a>,
    had_error: bool,
    panic_mode: bool,
}

/// A rule in the Pratt parser table. See [Compiler::parse_precedence()] for usage.
#[derive(Copy, Clone)]
struct ParserRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

/// Any possible action taken from the parsing table. Actions take the entire compiler state, and
/// convert it, usually emitting bytecode.
type ParserFn = fn(&mut Compiler, bool) -> ();

/// Precedence rules for [Token]s in Lox.
///
/// Precedence rules have a well-defined partial ordering ([PartialOrd]), which is required for use
/// in the Pratt parsing algorithm.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq)]
enum Precedence {
    None,
    /// `=`
    Assignment,
    /// `or`
    Or,
    /// `and`
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `+` `-`
    Term,
    /// `*` `/`
    Factor,
    /// `!` `-`
    Unary,
    /// `.` `()`
    Call,
    /// Literals, and groupings
    Primary,
}

///////////////////////////////////////// Implementations /////////////////////////////////////////

impl Precedence {
    /// Returns the next higher level of precedence.
    ///
    /// # Panics
    ///
    /// Panics if trying to obtain a higher-level of precedence than the maximum,
    /// [Precedence::Primary], which is the precedence of literals and l-values.
    #[inline]
    fn higher_precedence(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => panic!("Tried to get higher precedence than primary"),
        }
    }
}

impl ParserRule {
    /// Returns one level of precedence higher than the rule's precedence.
    /// See [Precedence::higher_precedence()].
    #[inline(always)]
    fn higher_precedence(&self) -> Precedence {
        self.precedence.higher_precedence()
    }
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source code.
    fn new(source: &'a str) -> Parser<'a> {
        let mut scanner = Scanner::new(source);
        let first_token = scanner.scan_token();
        let error_token = scanner.make_sentinel("<before first token>");

        Parser { scanner, previous: error_token, current: first_token, had_error: false, panic_mode: false }
    }

    /// Update self.previous and self.current such that they move one token further in the token
    /// stream.
    fn advance(&mut self) {
        self.previous = self.current;

        loop {
            self.current = self.scanner.scan_token();
            if self.current.token() != Token::Error {
                break;
            }

            self.error_at_current(self.current.text())
        }
    }

    /// Scan the next token. If the token is not of the desired type, an error message is printed.
    fn consume(&mut self, desired_token: Token, message: &'static str) {
        if self.current.token() == desired_token {
            return self.advance();
        }

        self.error_at_current(message);
    }

    /// Return true if the current token is equal to the given token.
    fn check(&self, token: Token) -> bool {
        self.current.token() == token
    }

    /// Scan the next token. Advances if the token matches `desired_token`. Returns whether
    /// `desired_token` was matched.
    fn match_and_advance(&mut self, desired_token: Token) -> bool {
        if self.check(desired_token) {
            self.advance();
            return true;
        }
        false
    }

    /// Emit a compiler error, located at the previous [Lexeme]. In Pratt parsing, this is the
    /// handler you usually want to call, because the previous lexeme decided which [ParserRule]
    /// was accepted.
    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message)
    }

    /// Emit a compiler error, located at the current [Lexeme].
    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message)
    }

    /// Emit a compiler error, located at the given [Lexeme].
    fn error_at(&mut self, lexeme: Lexeme<'a>, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        self.had_error = true;

        eprint!("[line {}] Error", lexeme.line());
        if lexeme.token() == Token::Eof {
            eprint!(" at end");
        } else if lexeme.token() == Token::Error {
            // Nothing
        } else {
            eprint!(" at '{}'", lexeme.text());
        }
        eprintln!(": {message}");
    }

    /// Synchronize after being in panic mode.
    ///
    /// The heuristic is that we're going to gobble up and discard tokens until we **think** we're
    /// at a point that makes sense in the grammar. Points that make sense are the start of
    /// statements (statement boundaries). We could be wrong!
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.token() != Token::Eof {
            if self.previous.token() == Token::Semicolon {
                return;
            }

            match self.current.token() {
                Token::Class
                | Token::Fun
                | Token::Var
                | Token::For
                | Token::If
                | Token::While
                | Token::Print
                | Token::Return => return,
                _ => self.advance(),
            }
        }
    }
}

impl<'a, 'h> Compiler<'a, 'h> {
    /// Creates a new compiler with the given [Parser], starting its top-level nesting as the
    /// implicit script function.
    fn new(parser: Parser<'a>, heap: &'h mut Heap) -> Compiler<'a, 'h> {
        Compiler { parser, heap, nestings: vec![Nesting::new(FunctionType::Script, None)] }
    }

    /// Takes ownership of the compiler, and returns the compiled top-level function.
    fn compile(mut self) -> crate::Result<Rc<Obj>> {
        while !self.match_and_advance(Token::Eof) {
            self.declaration();
        }

        let had_error = self.parser.had_error;
        let function = self.end_compiler();

        if had_error {
            return Err(InterpretationError::CompileError);
        }

        Ok(self.heap.alloc(Obj::Function(function)))
    }

    /// Signal the end of compiling the current nesting, popping it off the stack and returning the
    /// [ObjFunction] it produced.
    fn end_compiler(&mut self) -> ObjFunction {
        self.emit_return();

        let nesting = self.nestings.pop().expect("a nesting to end");

        if cfg!(feature = "print_code") && !self.parser.had_error {
            let name = nesting.name.unwrap_or("<script>");
            crate::debug::disassemble_chunk(&nesting.chunk, name);
        }

        let name = nesting.name.map(|n| self.heap.intern_str(n));
        ObjFunction { name, arity: nesting.arity, chunk: nesting.chunk }
    }

    /// Create a new block scope. Make sure to decrement it later.
    fn begin_scope(&mut self) {
        self.current_nesting().scope_depth += 1;
    }

    /// Pop one scope from the block.
    fn end_scope(&mut self) {
        let scope_depth = {
            let nesting = self.current_nesting();
            assert!(nesting.scope_depth > 0);
            nesting.scope_depth -= 1;
            nesting.scope_depth
        };

        while self.has_locals_beyond_scope(scope_depth) {
            self.current_nesting().locals.pop();
            self.emit_instruction(OpCode::Pop);
        }
    }

    /// Returns true if there is a local variable at a scope that is no longer accessible.
    fn has_locals_beyond_scope(&mut self, scope_depth: isize) -> bool {
        self.current_nesting()
            .locals
            .last()
            .and_then(|local| local.depth)
            .map(|depth| depth > scope_depth)
            .unwrap_or(false)
    }

    /// The core of the Pratt parsing algorithm.
    ///
    /// See: <https://en.wikipedia.org/wiki/Operator-precedence_parser#Pratt_parsing>
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let can_assign = precedence <= Precedence::Assignment;

        if let Some(prefix_rule) = self.rule_from_previous().prefix {
            prefix_rule(self, can_assign);
        } else {
            self.parser.error("Expect expression.");
            return;
        }

        while precedence <= self.rule_from_current().precedence {
            self.advance();
            let infix_rule = self
                .rule_from_previous()
                .infix
                .expect("a rule with a defined precedence must always have an infix rule");

            infix_rule(self, can_assign);
        }

        if can_assign && self.match_and_advance(Token::Equal) {
            self.parser.error("Invalid assignment target.");
        }
    }

    /// Add the identifier text to the current chunk's constants table, interning it as a string.
    fn identifier_constant(&mut self, lexeme: Lexeme) -> u8 {
        let obj = self.heap.intern_str(lexeme.text());
        self.make_constant(Value::Obj(obj))
    }

    /// Finds the index in the current function's locals for a name, or returns None if it's not a
    /// local (either a global or a mistake).
    fn resolve_local(&mut self, name: Lexeme) -> Option<u8> {
        let locals = &self.current_nesting().locals;
        for (i, local) in locals.iter().enumerate().rev() {
            if local.text() == name.text() {
                if local.is_uninitialized() {
                    let message = format!("Can't read local variable '{}' in its own initializer.", name.text());
                    self.parser.error(&message);
                }
                return u8::try_from(i).ok();
            }
        }
        None
    }

    /// Indicate that we need a slot for another local variable.
    fn declare_variable(&mut self) {
        let scope_depth = self.current_nesting().scope_depth;
        if scope_depth == 0 {
            return;
        }

        let name = self.parser.previous;

        let mut messages = Vec::new();
        {
            let nesting = self.current_nesting();
            for local in nesting.locals.iter().rev() {
                if local.in_outer_scope(scope_depth) {
                    break;
                }

                if name.text() == local.text() {
                    messages.push(format!("Already a variable with this name ('{}') in this scope.", name.text()));
                }
            }
        }
        for message in &messages {
            self.parser.error(message);
        }

        self.add_local(name);
    }

    fn add_local(&mut self, name: Lexeme<'a>) {
        if self.current_nesting().locals.len() >= U8_COUNT {
            self.parser.error("Too many local variables in function.");
            return;
        }

        assert_eq!(Token::Identifier, name.token());
        let local = Local { name, depth: None };
        self.current_nesting().locals.push(local);
    }

    /// Consume the next identifier and interpret it as a variable. Returns the constant index for
    /// the identifier name (meaningless for locals, which use stack slots instead).
    fn parse_variable(&mut self, error_message: &'static str) -> u8 {
        self.parser.consume(Token::Identifier, error_message);

        self.declare_variable();
        if self.current_nesting().scope_depth > 0 {
            return 0;
        }

        self.identifier_constant(self.parser.previous)
    }

    /// Mark the last local as being initialized.
    fn mark_initialized(&mut self) {
        let nesting = self.current_nesting();
        if nesting.scope_depth == 0 {
            return;
        }
        let scope_depth = nesting.scope_depth;
        nesting.locals.last_mut().unwrap().initialize_scope_with(scope_depth);
    }

    /// Define a new variable.
    fn define_variable(&mut self, global: u8) {
        if self.current_nesting().scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_instruction(OpCode::DefineGlobal).with_operand(global);
    }

    /// Parse a variable. This could either be a variable access or an assignment, depending on
    /// `can_assign` and the syntactic context.
    fn named_variable(&mut self, name: Lexeme, can_assign: bool) {
        let (get_op, set_op, arg) = {
            if let Some(arg) = self.resolve_local(name) {
                (OpCode::GetLocal, OpCode::SetLocal, arg)
            } else {
                let arg = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, arg)
            }
        };

        if can_assign && self.match_and_advance(Token::Equal) {
            self.expression();
            self.emit_instruction(set_op).with_operand(arg);
        } else {
            self.emit_instruction(get_op).with_operand(arg);
        }
    }

    /// Parse a declaration.
    fn declaration(&mut self) {
        if self.match_and_advance(Token::Fun) {
            self.fun_declaration();
        } else if self.match_and_advance(Token::Var) {
            self.var_statement();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.parser.synchronize();
        }
    }

    /// Parse a function declaration. Assumes `fun` has already been consumed.
    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    /// Compile a function's parameter list and body into a new [Nesting], then emit it as a
    /// constant in the enclosing chunk.
    fn function(&mut self, function_type: FunctionType) {
        let name = self.parser.previous.text();
        self.nestings.push(Nesting::new(function_type, Some(name)));
        self.begin_scope();

        self.parser.consume(Token::LeftParen, "Expect '(' after function name.");
        if !self.parser.check(Token::RightParen) {
            loop {
                let at_limit = self.current_nesting().arity as usize == MAX_PARAMS;
                if at_limit {
                    self.parser.error("Can't have more than 255 parameters.");
                } else {
                    self.current_nesting().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);

                if !self.match_and_advance(Token::Comma) {
                    break;
                }
            }
        }
        self.parser.consume(Token::RightParen, "Expect ')' after parameters.");
        self.parser.consume(Token::LeftBrace, "Expect '{' before function body.");
        self.block();

        let function = self.end_compiler();
        let obj = self.heap.alloc(Obj::Function(function));
        let index = self.make_constant(Value::Obj(obj));
        self.emit_instruction(OpCode::Constant).with_operand(index);
    }

    /// Parse a statement.
    fn statement(&mut self) {
        if self.match_and_advance(Token::Print) {
            self.print_statement();
        } else if self.match_and_advance(Token::If) {
            self.if_statement();
        } else if self.match_and_advance(Token::Return) {
            self.return_statement();
        } else if self.match_and_advance(Token::While) {
            self.while_statement();
        } else if self.match_and_advance(Token::For) {
            self.for_statement();
        } else if self.match_and_advance(Token::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    /// Parse an expression.
    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// Parse a block.
    /// Assumes a new scope has already been created for this block.
    fn block(&mut self) {
        while !self.parser.check(Token::RightBrace) && !self.parser.check(Token::Eof) {
            self.declaration();
        }

        self.parser.consume(Token::RightBrace, "Expect '}' after block.");
    }

    /// Parse a variable declaration. Assumes `var` has already been consumed.
    fn var_statement(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_and_advance(Token::Equal) {
            self.expression();
        } else {
            self.emit_instruction(OpCode::Nil);
        }

        self.parser.consume(Token::Semicolon, "Expect ';' after variable declaration.");

        self.define_variable(global);
    }

    /// Parse an expression statement (e.g., assignments, function calls).
    fn expression_statement(&mut self) {
        self.expression();
        self.parser.consume(Token::Semicolon, "Expect ';' after expression.");
        self.emit_instruction(OpCode::Pop);
    }

    /// Parse a print statement. Assumes `print` has already been consumed.
    fn print_statement(&mut self) {
        self.expression();
        self.parser.consume(Token::Semicolon, "Expect ';' after value.");
        self.emit_instruction(OpCode::Print);
    }

    /// Parse an `if` statement. Assumes `if` has already been consumed.
    fn if_statement(&mut self) {
        self.parser.consume(Token::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.parser.consume(Token::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_instruction(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_instruction(OpCode::Pop);

        if self.match_and_advance(Token::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    /// Parse a `while` statement. Assumes `while` has already been consumed.
    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();

        self.parser.consume(Token::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.parser.consume(Token::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_instruction(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_instruction(OpCode::Pop);
    }

    /// Parse a `for` statement. Assumes `for` has already been consumed.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.parser.consume(Token::LeftParen, "Expect '(' after 'for'.");

        if self.match_and_advance(Token::Semicolon) {
            // No initializer.
        } else if self.match_and_advance(Token::Var) {
            self.var_statement();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump = None;

        if !self.match_and_advance(Token::Semicolon) {
            self.expression();
            self.parser.consume(Token::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_instruction(OpCode::Pop);
        }

        if !self.parser.check(Token::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();

            self.expression();
            self.emit_instruction(OpCode::Pop);
            self.parser.consume(Token::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_instruction(OpCode::Pop);
        }

        self.end_scope();
    }

    /// Parse a `return` statement. Assumes `return` has already been consumed.
    fn return_statement(&mut self) {
        if self.current_nesting().function_type == FunctionType::Script {
            self.parser.error("Can't return from top-level code.");
        }

        if self.match_and_advance(Token::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.parser.consume(Token::Semicolon, "Expect ';' after return value.");
            self.emit_instruction(OpCode::Return);
        }
    }

    /// Appends `nil` followed by [OpCode::Return] to the current [Chunk]; this is also the
    /// implicit return every function gets if control falls off its end.
    fn emit_return(&mut self) {
        self.emit_instruction(OpCode::Nil);
        self.emit_instruction(OpCode::Return);
    }

    /// Appends [OpCode::Constant] to current [Chunk], using the current value.
    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_instruction(OpCode::Constant).with_operand(index);
    }

    /// Appends a new constant to the current [Chunk].
    ///
    /// If the constant pool is already full (256 entries), signals a compiler error and returns
    /// `0u8` instead of overflowing the `u8` index.
    fn make_constant(&mut self, value: Value) -> u8 {
        if self.current_chunk().constant_count() >= U8_COUNT {
            self.parser.error("Too many constants in one chunk.");
            return 0;
        }
        self.current_chunk().add_constant(value)
    }

    /// Writes an [OpCode] to the current [Chunk].
    /// Returns a [WrittenOpcode], with which you can write an operand.
    fn emit_instruction(&mut self, opcode: OpCode) -> WrittenOpcode {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(opcode, line)
    }

    /// Writes two [OpCode]s to the current [Chunk].
    fn emit_instructions(&mut self, op1: OpCode, op2: OpCode) -> WrittenOpcode {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(op1, line);
        self.current_chunk().write_opcode(op2, line)
    }

    /// Emits a jump instruction with a placeholder operand, returning its offset for later
    /// patching.
    fn emit_jump(&mut self, opcode: OpCode) -> usize {
        let line = self.line_number_of_prefix();
        self.current_chunk().emit_jump(opcode, line)
    }

    /// Backfills a jump emitted by [Compiler::emit_jump] with the distance to the current end of
    /// the chunk.
    fn patch_jump(&mut self, offset: usize) {
        if let Err(message) = self.current_chunk().patch_jump(offset) {
            self.parser.error(message);
        }
    }

    /// Emits `OpCode::Loop` jumping backward to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.line_number_of_prefix();
        if let Err(message) = self.current_chunk().emit_loop(loop_start, line) {
            self.parser.error(message);
        }
    }

    ///////////////////////////////////////// Aliases /////////////////////////////////////////////

    /// Returns the innermost [Nesting] currently being compiled.
    #[inline(always)]
    fn current_nesting(&mut self) -> &mut Nesting<'a> {
        self.nestings.last_mut().expect("at least one nesting while compiling")
    }

    /// Returns the current [Chunk].
    #[inline(always)]
    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.current_nesting().chunk
    }

    /// Advance one token in scanner, such that:
    /// ```text
    /// (previous, current) = (current, scanner.next_token())
    /// ```
    #[inline(always)]
    fn advance(&mut self) {
        self.parser.advance()
    }

    /// Returns the line number of the prefix token, a.k.a., `self.parser.previous`.
    #[inline(always)]
    fn line_number_of_prefix(&self) -> usize {
        self.parser.previous.line()
    }

    /// Delegates to [Parser::match_and_advance]. Returns true if the token was matched.
    #[inline(always)]
    fn match_and_advance(&mut self, desired_token: Token) -> bool {
        self.parser.match_and_advance(desired_token)
    }

    /// Returns the rule for the previous token. This is useful in prefix parser functions.
    #[inline(always)]
    fn rule_from_previous(&self) -> ParserRule {
        get_rule(self.previous_token())
    }

    /// Returns the rule for the current token.
    #[inline(always)]
    fn rule_from_current(&self) -> ParserRule {
        get_rule(self.parser.current.token())
    }

    /// Return the token (type) of the previous value. This is useful in prefix parser functions.
    #[inline(always)]
    fn previous_token(&self) -> Token {
        self.parser.previous.token()
    }
}

impl<'a> Local<'a> {
    /// Returns true if the variable is not available for use yet.
    ///
    /// Use [Local::initialize_scope_with()] to initialize.
    #[inline(always)]
    fn is_uninitialized(&self) -> bool {
        self.depth.is_none()
    }

    /// Set the scope of this local. Note: the variable must not have an existing scope.
    #[inline]
    fn initialize_scope_with(&mut self, scope_depth: isize) {
        debug_assert!(self.is_uninitialized());
        self.depth = Some(scope_depth);
    }

    /// Returns true when the local is in an outer scope (thus, is accessible).
    #[inline(always)]
    fn in_outer_scope(&self, scope_depth: isize) -> bool {
        matches!(self.depth, Some(depth) if depth < scope_depth)
    }

    /// Return the name of this local.
    fn text(&self) -> &'a str {
        self.name.text()
    }
}

////////////////////////////////////////// Parser rules ///////////////////////////////////////////

/// Makes defining [ParserRule]s a bit cleaner looking.
macro_rules! rule {
    ($prefix:expr, $infix:expr, $precedence:expr) => {
        ParserRule { prefix: $prefix, infix: $infix, precedence: $precedence }
    };
}

#[rustfmt::skip]
fn get_rule(token: Token) -> ParserRule {
    use Token::*;
    match token {
        //                     Prefix          Infix         Precedence
        LeftParen    => rule!{ Some(grouping), Some(call),   Precedence::Call },
        RightParen   => rule!{ None,           None,         Precedence::None },
        LeftBrace    => rule!{ None,           None,         Precedence::None },
        RightBrace   => rule!{ None,           None,         Precedence::None },
        Comma        => rule!{ None,           None,         Precedence::None },
        Dot          => rule!{ None,           None,         Precedence::None },
        Minus        => rule!{ Some(unary),    Some(binary), Precedence::Term },
        Plus         => rule!{ None,           Some(binary), Precedence::Term },
        Semicolon    => rule!{ None,           None,         Precedence::None },
        Slash        => rule!{ None,           Some(binary), Precedence::Factor },
        Star         => rule!{ None,           Some(binary), Precedence::Factor },
        Bang         => rule!{ Some(unary),    None,         Precedence::None },
        BangEqual    => rule!{ None,           Some(binary), Precedence::Equality },
        Equal        => rule!{ None,           None,         Precedence::None },
        EqualEqual   => rule!{ None,           Some(binary), Precedence::Equality },
        Greater      => rule!{ None,           Some(binary), Precedence::Comparison },
        GreaterEqual => rule!{ None,           Some(binary), Precedence::Comparison },
        Less         => rule!{ None,           Some(binary), Precedence::Comparison },
        LessEqual    => rule!{ None,           Some(binary), Precedence::Comparison },
        Identifier   => rule!{ Some(variable), None,         Precedence::None },
        StrLiteral   => rule!{ Some(string),   None,         Precedence::None },
        Number       => rule!{ Some(number),   None,         Precedence::None },
        And          => rule!{ None,           Some(and_),   Precedence::And },
        Class        => rule!{ None,           None,         Precedence::None },
        Else         => rule!{ None,           None,         Precedence::None },
        False        => rule!{ Some(literal),  None,         Precedence::None },
        For          => rule!{ None,           None,         Precedence::None },
        Fun          => rule!{ None,           None,         Precedence::None },
        If           => rule!{ None,           None,         Precedence::None },
        Nil          => rule!{ Some(literal),  None,         Precedence::None },
        Or           => rule!{ None,           Some(or_),    Precedence::Or },
        Print        => rule!{ None,           None,         Precedence::None },
        Return       => rule!{ None,           None,         Precedence::None },
        Super        => rule!{ None,           None,         Precedence::None },
        This         => rule!{ None,           None,         Precedence::None },
        True         => rule!{ Some(literal),  None,         Precedence::None },
        Var          => rule!{ None,           None,         Precedence::None },
        While        => rule!{ None,           None,         Precedence::None },
        Error        => rule!{ None,           None,         Precedence::None },
        Eof          => rule!{ None,           None,         Precedence::None },
    }
}

/// Parse '(' as a prefix. Assumes '(' has been consumed.
fn grouping(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(Token::LeftParen, compiler.previous_token());
    compiler.expression();
    compiler.parser.consume(Token::RightParen, "Expect ')' after expression.");
}

/// Parse a number literal as a prefix. Assumes number has been consumed.
fn number(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(Token::Number, compiler.previous_token());
    let value = compiler
        .parser
        .previous
        .text()
        .parse::<f64>()
        .expect("Internal error: Token::Number MUST parse as a float, but didn't?");
    compiler.emit_constant(value.into());
}

/// Parse an unary operator as a prefix. Assumes the operator has been consumed.
fn unary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.previous_token();

    compiler.parse_precedence(Precedence::Unary);

    match operator {
        Token::Bang => compiler.emit_instruction(OpCode::Not),
        Token::Minus => compiler.emit_instruction(OpCode::Negate),
        _ => unreachable!(),
    };
}

/// Parse a binary operator as an infix. Assumes the operator has been consumed.
fn binary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.previous_token();
    let rule = get_rule(operator);

    compiler.parse_precedence(rule.higher_precedence());
    match operator {
        Token::BangEqual => compiler.emit_instructions(OpCode::Equal, OpCode::Not),
        Token::EqualEqual => compiler.emit_instruction(OpCode::Equal),
        Token::Greater => compiler.emit_instruction(OpCode::Greater),
        Token::GreaterEqual => compiler.emit_instructions(OpCode::Less, OpCode::Not),
        Token::Less => compiler.emit_instruction(OpCode::Less),
        Token::LessEqual => compiler.emit_instructions(OpCode::Greater, OpCode::Not),
        Token::Plus => compiler.emit_instruction(OpCode::Add),
        Token::Minus => compiler.emit_instruction(OpCode::Subtract),
        Token::Star => compiler.emit_instruction(OpCode::Multiply),
        Token::Slash => compiler.emit_instruction(OpCode::Divide),
        _ => unreachable!(),
    };
}

/// Parse a call expression's argument list as an infix `(`. Assumes `(` has been consumed.
fn call(compiler: &mut Compiler, _can_assign: bool) {
    let arg_count = argument_list(compiler);
    compiler.emit_instruction(OpCode::Call).with_operand(arg_count);
}

/// Parses a comma-separated argument list up to the closing `)`, returning the argument count.
fn argument_list(compiler: &mut Compiler) -> u8 {
    let mut count: usize = 0;
    if !compiler.parser.check(Token::RightParen) {
        loop {
            compiler.expression();
            if count == MAX_PARAMS {
                compiler.parser.error("Can't have more than 255 arguments.");
            } else {
                count += 1;
            }
            if !compiler.match_and_advance(Token::Comma) {
                break;
            }
        }
    }
    compiler.parser.consume(Token::RightParen, "Expect ')' after arguments.");
    count as u8
}

/// Parse a short-circuiting `and`. Assumes `and` has been consumed, and the left operand is
/// already compiled and on the stack.
fn and_(compiler: &mut Compiler, _can_assign: bool) {
    let end_jump = compiler.emit_jump(OpCode::JumpIfFalse);

    compiler.emit_instruction(OpCode::Pop);
    compiler.parse_precedence(Precedence::And);

    compiler.patch_jump(end_jump);
}

/// Parse a short-circuiting `or`. Assumes `or` has been consumed, and the left operand is already
/// compiled and on the stack.
fn or_(compiler: &mut Compiler, _can_assign: bool) {
    let else_jump = compiler.emit_jump(OpCode::JumpIfFalse);
    let end_jump = compiler.emit_jump(OpCode::Jump);

    compiler.patch_jump(else_jump);
    compiler.emit_instruction(OpCode::Pop);

    compiler.parse_precedence(Precedence::Or);
    compiler.patch_jump(end_jump);
}

/// Parse a keyword literal as a prefix. Assumes the keyword has been consumed.
fn literal(compiler: &mut Compiler, _can_assign: bool) {
    match compiler.previous_token() {
        Token::False => compiler.emit_instruction(OpCode::False),
        Token::Nil => compiler.emit_instruction(OpCode::Nil),
        Token::True => compiler.emit_instruction(OpCode::True),
        _ => unreachable!(),
    };
}

/// Parse a string literal. Interns it and adds it to the constant pool.
fn string(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(Token::StrLiteral, compiler.previous_token());

    let literal = compiler.parser.previous.text();
    debug_assert!(literal.len() >= 2);
    debug_assert!(literal.starts_with('"'));
    debug_assert!(literal.ends_with('"'));

    let last_index = literal.len() - 1;
    let contents = &literal[1..last_index];
    let obj = compiler.heap.intern_str(contents);
    compiler.emit_constant(Value::Obj(obj));
}

/// Parse a variable. It can be either a variable access or assignment, which is why `can_assign`
/// is required by all callbacks!
fn variable(compiler: &mut Compiler, can_assign: bool) {
    compiler.named_variable(compiler.parser.previous, can_assign);
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::Heap;

    fn compile_ok(source: &str) {
        let mut heap = Heap::new();
        let result = compile(source, &mut heap);
        assert!(result.is_ok(), "expected {source:?} to compile");
    }

    fn compile_err(source: &str) {
        let mut heap = Heap::new();
        let result = compile(source, &mut heap);
        assert!(result.is_err(), "expected {source:?} to fail to compile");
    }

    #[test]
    fn precedence_confidence_check() {
        assert!(Precedence::Assignment < Precedence::Or);
        assert!(Precedence::Or < Precedence::And);
        assert!(Precedence::And < Precedence::Equality);
        assert!(Precedence::Equality < Precedence::Comparison);

        assert!(Precedence::Call > Precedence::Factor);
        assert!(Precedence::Factor > Precedence::Term);

        assert_eq!(Precedence::And, Precedence::Or.higher_precedence());
        assert_eq!(Precedence::Factor, Precedence::Term.higher_precedence());
    }

    #[test]
    fn compiles_arithmetic_and_print() {
        compile_ok("print 1 + 2 * 3;");
    }

    #[test]
    fn compiles_functions_and_calls() {
        compile_ok("fun add(a, b) { return a + b; } print add(1, 2);");
    }

    #[test]
    fn compiles_control_flow() {
        compile_ok("for (var i = 0; i < 10; i = i + 1) { if (i == 5) { print i; } }");
    }

    #[test]
    fn cannot_read_local_in_own_initializer() {
        compile_err("{ var a = a; }");
    }

    #[test]
    fn cannot_redeclare_local_in_same_scope() {
        compile_err("{ var a = 1; var a = 2; }");
    }

    #[test]
    fn shadowing_in_nested_scope_is_allowed() {
        compile_ok("{ var a = 1; { var a = 2; print a; } print a; }");
    }

    #[test]
    fn cannot_return_from_top_level() {
        compile_err("return 1;");
    }

    #[test]
    fn function_with_256_parameters_is_rejected() {
        let params = (0..256).map(|i| format!("p{i}")).collect::<Vec<_>>().join(", ");
        let source = format!("fun f({params}) {{ return 0; }}");
        compile_err(&source);
    }

    #[test]
    fn function_with_255_parameters_is_accepted() {
        let params = (0..255).map(|i| format!("p{i}")).collect::<Vec<_>>().join(", ");
        let source = format!("fun f({params}) {{ return 0; }}");
        compile_ok(&source);
    }

    #[test]
    fn invalid_assignment_target_is_rejected() {
        compile_err("1 + 2 = 3;");
    }
}
