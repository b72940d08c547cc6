//! The bytecode virtual machine.

use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chunk::OpCode;
use crate::compiler;
use crate::object::{Heap, NativeFn, Obj, ObjNative};
use crate::prelude::{InterpretationError, Value};
use crate::table::Table;

/// Used as the initial capacity of the stack. Since we're using a growable [Vec], the stack size
/// can grow arbitrarily large; this just avoids early reallocation for typical programs.
const STACK_SIZE: usize = 256;

/// Maximum call depth. Exceeding this raises a runtime "Stack overflow." error rather than
/// overflowing the host's own call stack.
const MAX_FRAMES: usize = 64;

/// One activation record: which function is running, where in its chunk, and where its locals
/// begin on the shared value stack.
struct CallFrame {
    function: Rc<Obj>,
    ip: usize,
    slot_base: usize,
}

/// Maintains state for the Lox virtual machine: the call-frame stack, the value stack, the table
/// of global variables, and the heap every object compiled or allocated at runtime lives on.
pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    heap: Heap,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    /// Creates a fresh VM with its native functions already installed.
    pub fn new() -> Self {
        let mut vm =
            Vm { frames: Vec::new(), stack: Vec::with_capacity(STACK_SIZE), globals: Table::new(), heap: Heap::new() };
        vm.define_native("clock", clock_native);
        vm
    }

    /// Compiles and interprets the given Lox source, sharing this VM's heap and globals with
    /// whatever was previously interpreted (so a REPL can build up state across lines).
    pub fn interpret(&mut self, source: &str) -> crate::Result<()> {
        let function = compiler::compile(source, &mut self.heap)?;

        self.stack.clear();
        self.frames.clear();

        self.push(Value::Obj(Rc::clone(&function)));
        self.call(function, 0)?;
        self.run()
    }

    /// Number of objects allocated on this VM's heap over its lifetime.
    pub fn object_count(&self) -> usize {
        self.heap.object_count()
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_obj = self.heap.intern_str(name);
        let native = self.heap.alloc(Obj::Native(ObjNative { name: Rc::clone(&name_obj), function }));
        self.globals.set(&name_obj, Value::Obj(native));
    }

    /// The main opcode interpreter loop.
    fn run(&mut self) -> crate::Result<()> {
        use OpCode::*;

        loop {
            if cfg!(feature = "trace_execution") {
                print!("        ");
                for value in self.stack.iter() {
                    print!("[ {value:?} ]");
                }
                println!();

                let frame = self.current_frame();
                let ip = frame.ip;
                let function = Rc::clone(&frame.function);
                crate::debug::disassemble_instruction(
                    &function.as_function().expect("frame holds a function").chunk,
                    ip,
                );
            }

            let opcode = self.read_opcode();
            match opcode {
                Some(Constant) => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                Some(Nil) => self.push(Value::Nil),
                Some(True) => self.push(true.into()),
                Some(False) => self.push(false.into()),
                Some(Pop) => {
                    self.pop();
                }
                Some(GetLocal) => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slot_base;
                    self.push(self.stack[base + slot].clone());
                }
                Some(SetLocal) => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slot_base;
                    self.stack[base + slot] = self.peek(0).clone();
                }
                Some(GetGlobal) => {
                    let key = self.read_global_name();
                    match self.globals.get(&key).cloned() {
                        Some(value) => self.push(value),
                        None => return self.runtime_error(&format!("Undefined variable '{key}'.")),
                    }
                }
                Some(DefineGlobal) => {
                    let key = self.read_global_name();
                    let value = self.pop();
                    self.globals.set(&key, value);
                }
                Some(SetGlobal) => {
                    let key = self.read_global_name();
                    let value = self.peek(0).clone();
                    if self.globals.set(&key, value) {
                        self.globals.delete(&key);
                        return self.runtime_error(&format!("Undefined variable '{key}'."));
                    }
                }
                Some(Equal) => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.push(lhs.lox_equal(&rhs).into());
                }
                Some(Greater) => self.binary_op(|a, b| a > b)?,
                Some(Less) => self.binary_op(|a, b| a < b)?,
                Some(Add) => {
                    if self.peek(0).is_number() && self.peek(1).is_number() {
                        self.binary_op(|a, b| a + b)?;
                    } else if self.peek(0).as_string().is_some() && self.peek(1).as_string().is_some() {
                        self.concatenate();
                    } else {
                        return self.runtime_error("Operands must be two numbers or two strings.");
                    }
                }
                Some(Subtract) => self.binary_op(|a, b| a - b)?,
                Some(Multiply) => self.binary_op(|a, b| a * b)?,
                Some(Divide) => self.binary_op(|a, b| a / b)?,
                Some(Not) => {
                    let value = self.pop();
                    self.push(value.is_falsy().into());
                }
                Some(Negate) => {
                    if !self.peek(0).is_number() {
                        return self.runtime_error("Operand must be a number.");
                    }
                    let number = self.pop().as_number().expect("checked above");
                    self.push((-number).into());
                }
                Some(Print) => {
                    let value = self.pop();
                    println!("{value}");
                }
                Some(Jump) => {
                    let offset = self.read_short();
                    self.current_frame_mut().ip += offset as usize;
                }
                Some(JumpIfFalse) => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsy() {
                        self.current_frame_mut().ip += offset as usize;
                    }
                }
                Some(Loop) => {
                    let offset = self.read_short();
                    self.current_frame_mut().ip -= offset as usize;
                }
                Some(Call) => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize).clone();
                    self.call_value(callee, arg_count)?;
                }
                Some(Return) => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("run with no active frame");
                    self.stack.truncate(frame.slot_base);

                    if self.frames.is_empty() {
                        return Ok(());
                    }

                    self.push(result);
                }
                None => panic!("fetched invalid opcode at ip {}", self.current_frame().ip - 1),
            }
        }
    }

    fn read_global_name(&mut self) -> Rc<Obj> {
        let constant = self.read_constant();
        Rc::clone(constant.as_obj().expect("global name constant must be a string"))
    }

    fn read_byte(&mut self) -> u8 {
        let ip = self.current_frame().ip;
        self.current_frame_mut().ip += 1;
        let function = Rc::clone(&self.current_frame().function);
        function.as_function().expect("frame holds a function").chunk.get(ip).expect("ip in range").as_byte()
    }

    fn read_opcode(&mut self) -> Option<OpCode> {
        self.read_byte().try_into().ok()
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let function = Rc::clone(&self.current_frame().function);
        function.as_function().expect("frame holds a function").chunk.constants[index].clone()
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> crate::Result<()> {
        match callee.as_obj() {
            Some(obj) => match &**obj {
                Obj::Function(_) => self.call(Rc::clone(obj), arg_count),
                Obj::Native(native) => {
                    let args_start = self.stack.len() - arg_count as usize;
                    let result = (native.function)(&self.stack[args_start..]);
                    self.stack.truncate(args_start - 1);
                    self.push(result);
                    Ok(())
                }
                Obj::String(_) => {
                    self.runtime_error(&format!("Can only call functions and classes, not a {}.", obj.type_name()))
                }
            },
            None => self.runtime_error("Can only call functions and classes."),
        }
    }

    fn call(&mut self, function_obj: Rc<Obj>, arg_count: u8) -> crate::Result<()> {
        let arity = function_obj.as_function().expect("call target is a function").arity;
        if arg_count != arity {
            return self.runtime_error(&format!("Expected {arity} arguments but got {arg_count}."));
        }

        if self.frames.len() >= MAX_FRAMES {
            return self.runtime_error("Stack overflow.");
        }

        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { function: function_obj, ip: 0, slot_base });
        Ok(())
    }

    fn concatenate(&mut self) {
        let rhs = self.pop();
        let lhs = self.pop();
        let lhs_chars = Rc::clone(&lhs.as_string().expect("checked by caller").chars);
        let rhs_chars = Rc::clone(&rhs.as_string().expect("checked by caller").chars);
        let combined = format!("{lhs_chars}{rhs_chars}");
        let obj = self.heap.intern_string(combined);
        self.push(Value::Obj(obj));
    }

    fn runtime_error<T>(&mut self, message: &str) -> crate::Result<T> {
        eprintln!("{message}");

        for frame in self.frames.iter().rev() {
            let function = frame.function.as_function().expect("frame holds a function");
            let line = function.chunk.line_number_for(frame.ip.saturating_sub(1)).unwrap_or(0);
            match &function.name {
                Some(name) => eprintln!("[line {line}] in {name}()"),
                None => eprintln!("[line {line}] in script"),
            }
        }

        self.reset_stack();
        Err(InterpretationError::RuntimeError)
    }

    /// Pops two operands on the stack to perform a binary operation.
    fn binary_op<F, T>(&mut self, op: F) -> crate::Result<()>
    where
        F: Fn(f64, f64) -> T,
        T: Into<Value>,
    {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return self.runtime_error("Operands must be numbers.");
        }

        let rhs = self.pop().as_number().expect("checked above");
        let lhs = self.pop().as_number().expect("checked above");
        self.push(op(lhs, rhs).into());
        Ok(())
    }

    /// Pushes a [Value] on to the value stack.
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops and returns the top [Value] on the value stack.
    ///
    /// # Panics
    ///
    /// Panics when the value stack is empty. Given well-formed Lox bytecode, a pop cannot occur
    /// when the value stack is empty; therefore the interpreter panics if it is in this state.
    #[inline(always)]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack is empty")
    }

    /// Peeks at the value relative to the top of the stack.
    #[inline(always)]
    fn peek(&self, distance: usize) -> &Value {
        self.stack.get(self.stack.len() - 1 - distance).expect("peeked escaped bounds of the stack")
    }

    #[inline(always)]
    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("run with no active frame")
    }

    #[inline(always)]
    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run with no active frame")
    }

    #[inline(always)]
    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }
}

/// Returns the number of seconds since the Unix epoch, as a Lox number. The only native function
/// required by the host ABI.
fn clock_native(_args: &[Value]) -> Value {
    let seconds = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    Value::Number(seconds)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic_and_precedence() {
        let mut vm = Vm::new();
        assert!(vm.interpret("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let mut vm = Vm::new();
        assert!(vm.interpret("var x = 10;").is_ok());
        assert!(vm.interpret("print x + 1;").is_ok());
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        let mut vm = Vm::new();
        assert!(vm.interpret("print undefinedThing;").is_err());
    }

    #[test]
    fn function_calls_and_recursion() {
        let mut vm = Vm::new();
        let source = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);";
        assert!(vm.interpret(source).is_ok());
    }

    #[test]
    fn wrong_arity_is_a_runtime_error() {
        let mut vm = Vm::new();
        assert!(vm.interpret("fun f(a, b) { return a + b; } f(1);").is_err());
    }

    #[test]
    fn calling_a_non_function_is_a_runtime_error() {
        let mut vm = Vm::new();
        assert!(vm.interpret("var x = 1; x();").is_err());
    }

    #[test]
    fn string_concatenation() {
        let mut vm = Vm::new();
        assert!(vm.interpret(r#"print "foo" + "bar";"#).is_ok());
    }

    #[test]
    fn clock_native_returns_a_number() {
        let mut vm = Vm::new();
        assert!(vm.interpret("print clock();").is_ok());
    }

    #[test]
    fn short_circuit_and_or() {
        let mut vm = Vm::new();
        assert!(vm.interpret("print false and (1/0 == 1);").is_ok());
        assert!(vm.interpret("print true or (1/0 == 1);").is_ok());
    }
}
