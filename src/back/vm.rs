//! The stack-based virtual machine: fetch-decode-execute over a fixed
//! instruction array, with call frames, a managed heap, and pools for
//! constants, strings, and functions.

use tracing::{instrument, trace, warn};

use crate::back::bytecode::{Instr, OpCode};
use crate::back::heap::Heap;
use crate::common::{Id, Line, Map, Value};
use crate::error::RuntimeError;

pub const MAX_STACK: usize = 2048;
pub const MAX_FRAMES: usize = 256;

/// Sentinel function address marking a native builtin (`__array_new`,
/// `__array_get`) rather than a bytecode entry point. Distinct from
/// `u32::MAX`, which `function_id_or_placeholder` uses for a function that's
/// referenced but not yet defined.
const NATIVE_FN_ADDR: u32 = u32::MAX - 1;

/// Bytes backing one array element. Arrays hold plain ints (`kotha`'s
/// `IntArray` is `int*`, never a byte array), so each slot is one `i64`
/// rather than one heap byte.
const ARRAY_ELEM_BYTES: usize = 8;

/// `kotha_array_create`'s default capacity when asked to create a
/// non-positive-size array.
const DEFAULT_ARRAY_CAPACITY: i64 = 10;

#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub name: Id,
    pub address: u32,
    pub num_params: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub return_addr: usize,
    pub frame_pointer: usize,
    pub num_locals: usize,
    pub function_id: u32,
}

#[derive(Default)]
struct StringPool {
    strings: Vec<String>,
    marked: Vec<bool>,
    index: Map<String, u32>,
}

impl StringPool {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.marked.push(false);
        self.index.insert(s.to_string(), id);
        id
    }

    fn get(&self, id: u32) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    fn unmark_all(&mut self) {
        self.marked.iter_mut().for_each(|m| *m = false);
    }

    fn mark(&mut self, id: u32) {
        if let Some(m) = self.marked.get_mut(id as usize) {
            *m = true;
        }
    }

    fn sweep(&mut self) {
        for (s, m) in self.strings.iter_mut().zip(self.marked.iter()) {
            if !*m {
                s.clear();
            }
        }
    }
}

/// What happened after executing one instruction.
enum Step {
    Continue,
    Halt,
}

pub struct Vm {
    pub code: Vec<Instr>,
    pub constants: Vec<Value>,
    strings: StringPool,
    pub functions: Vec<FunctionEntry>,

    stack: Vec<Value>,
    globals: Vec<Value>,
    frames: Vec<CallFrame>,
    /// `-1` means no frame is active: locals address the stack directly
    /// ("flat mode", used for top-level code).
    fp: i64,
    ip: usize,

    heap: Heap,
    /// LIFO exception handlers: (stack depth to restore, handler address).
    handler_stack: Vec<(usize, usize)>,

    pub current_line: Line,
    pub debug: bool,
    pub instruction_count: u64,

    pub output: Vec<String>,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            code: Vec::new(),
            constants: Vec::new(),
            strings: StringPool::default(),
            functions: Vec::new(),
            stack: Vec::new(),
            globals: Vec::new(),
            frames: Vec::new(),
            fp: -1,
            ip: 0,
            heap: Heap::new(),
            handler_stack: Vec::new(),
            current_line: 0,
            debug: false,
            instruction_count: 0,
            output: Vec::new(),
        };
        // Registered up front so `function_id_or_placeholder` resolves
        // `__array_new`/`__array_get` to a real entry instead of minting a
        // placeholder the bytecode can never fill in.
        vm.add_function(Id::new("__array_new".to_string()), NATIVE_FN_ADDR, 1);
        vm.add_function(Id::new("__array_get".to_string()), NATIVE_FN_ADDR, 2);
        vm
    }

    // ---- pools ----

    pub fn add_instruction(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    pub fn add_constant(&mut self, value: Value) -> u32 {
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    pub fn get_constant(&self, id: u32) -> Option<Value> {
        self.constants.get(id as usize).copied()
    }

    pub fn intern_string(&mut self, s: &str) -> u32 {
        self.strings.intern(s)
    }

    pub fn get_string(&self, id: u32) -> Option<&str> {
        self.strings.get(id)
    }

    /// Registers a function, or updates an existing one with the same name
    /// (address and parameter count are overwritten; the id is preserved).
    pub fn add_function(&mut self, name: Id, address: u32, num_params: u32) -> u32 {
        if let Some(pos) = self.functions.iter().position(|f| f.name == name) {
            self.functions[pos].address = address;
            self.functions[pos].num_params = num_params;
            pos as u32
        } else {
            self.functions.push(FunctionEntry {
                name,
                address,
                num_params,
            });
            (self.functions.len() - 1) as u32
        }
    }

    pub fn get_function(&self, name: Id) -> Option<u32> {
        self.functions.iter().position(|f| f.name == name).map(|p| p as u32)
    }

    // ---- stack ----

    fn push(&mut self, v: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= MAX_STACK {
            return Err(RuntimeError::StackOverflow { line: self.current_line });
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow { line: self.current_line })
    }

    fn peek(&self, distance: usize) -> Result<Value, RuntimeError> {
        let len = self.stack.len();
        if distance >= len {
            return Err(RuntimeError::StackUnderflow { line: self.current_line });
        }
        Ok(self.stack[len - 1 - distance])
    }

    fn local_addr(&self, k: i64) -> usize {
        if self.fp >= 0 {
            (self.fp as usize).saturating_add(k as usize)
        } else {
            k as usize
        }
    }

    // ---- heap / GC ----

    pub fn heap_live_count(&self) -> usize {
        self.heap.live_count()
    }

    pub fn alloc_heap(&mut self, size: usize) -> Result<u32, RuntimeError> {
        if self.heap.needs_collection() {
            self.gc_collect();
        }
        self.heap.alloc(size)
    }

    /// Mark-and-sweep over every root: the operand stack, the globals, every
    /// active frame's locals, and constant-pool strings.
    pub fn gc_collect(&mut self) {
        self.heap.unmark_all();
        self.strings.unmark_all();

        let mark_value = |heap: &mut Heap, strings: &mut StringPool, v: Value| match v {
            Value::Heap(h) => heap.mark(h),
            Value::Str(s) => strings.mark(s),
            _ => {}
        };

        for &v in &self.stack {
            mark_value(&mut self.heap, &mut self.strings, v);
        }
        for &v in &self.globals {
            mark_value(&mut self.heap, &mut self.strings, v);
        }
        for frame in &self.frames {
            let start = frame.frame_pointer;
            let end = (start + frame.num_locals).min(self.stack.len());
            for v in &self.stack[start..end] {
                mark_value(&mut self.heap, &mut self.strings, *v);
            }
        }
        // Constants only ever hold string references, never heap pointers.
        for &v in &self.constants {
            if let Value::Str(s) = v {
                self.strings.mark(s);
            }
        }

        self.heap.sweep();
        self.strings.sweep();
        self.heap.on_collection_complete();
    }

    // ---- execution ----

    /// Moves the instruction pointer to `addr` without touching anything
    /// else — used by a REPL to resume execution at the start of bytecode
    /// just appended to an already-running `Vm`.
    pub fn goto(&mut self, addr: usize) {
        self.ip = addr;
    }

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            match self.step()? {
                Step::Continue => {}
                Step::Halt => return Ok(()),
            }
        }
    }

    #[instrument(name = "instruction", skip(self), fields(ip = self.ip))]
    fn step(&mut self) -> Result<Step, RuntimeError> {
        let ip = self.ip;
        let instr = *self
            .code
            .get(ip)
            .ok_or(RuntimeError::IpOutOfRange { line: self.current_line, ip: ip as u32 })?;
        self.ip += 1;
        self.current_line = instr.line;
        self.instruction_count += 1;
        trace!(op = %instr.op, arg = instr.arg, line = instr.line, "executing instruction");

        match instr.op {
            OpCode::Halt => return Ok(Step::Halt),
            OpCode::Nop => {}
            OpCode::Push => self.push(Value::Int(instr.arg))?,
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let v = self.peek(0)?;
                self.push(v)?;
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                self.exec_arith(instr.op)?;
            }
            OpCode::Neg => {
                let v = self.pop()?;
                let r = match v {
                    Value::Int(i) => Value::Int(-i),
                    Value::Float(f) => Value::Float(-f),
                    _ => Value::Int(0),
                };
                self.push(r)?;
            }
            OpCode::Eq | OpCode::Neq | OpCode::Lt | OpCode::Gt | OpCode::Lte | OpCode::Gte => {
                self.exec_compare(instr.op)?;
            }
            OpCode::And => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Int((a.is_truthy() && b.is_truthy()) as i64))?;
            }
            OpCode::Or => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Int((a.is_truthy() || b.is_truthy()) as i64))?;
            }
            OpCode::Not => {
                let a = self.pop()?;
                self.push(Value::Int(!a.is_truthy() as i64))?;
            }
            OpCode::LoadLocal => {
                let addr = self.local_addr(instr.arg);
                let v = self.stack.get(addr).copied().unwrap_or(Value::Int(0));
                self.push(v)?;
            }
            OpCode::StoreLocal => {
                let addr = self.local_addr(instr.arg);
                let v = self.pop()?;
                if addr >= self.stack.len() {
                    self.stack.resize(addr + 1, Value::Int(0));
                }
                self.stack[addr] = v;
            }
            OpCode::LoadGlobal => {
                let idx = instr.arg as usize;
                let v = self.globals.get(idx).copied().unwrap_or(Value::Int(0));
                self.push(v)?;
            }
            OpCode::StoreGlobal => {
                let idx = instr.arg as usize;
                let v = self.pop()?;
                if idx >= self.globals.len() {
                    self.globals.resize(idx + 1, Value::Int(0));
                }
                self.globals[idx] = v;
            }
            OpCode::LoadConst => {
                let v = self
                    .get_constant(instr.arg as u32)
                    .unwrap_or(Value::Null);
                self.push(v)?;
            }
            OpCode::Jmp => self.ip = instr.arg as usize,
            // Branches on a strict int-only zero check, not `Value::is_truthy`:
            // `OP_JMP_FALSE` (kotha/vm.c) only treats `VAL_INT` 0 as false, so
            // a bare `Float(0.0)` condition does not branch here either.
            OpCode::JmpFalse => {
                let v = self.pop()?;
                if matches!(v, Value::Int(0)) {
                    self.ip = instr.arg as usize;
                }
            }
            OpCode::JmpTrue => {
                let v = self.pop()?;
                if matches!(v, Value::Int(i) if i != 0) {
                    self.ip = instr.arg as usize;
                }
            }
            OpCode::Call => self.exec_call(instr.arg as usize)?,
            OpCode::Return => self.exec_return()?,
            OpCode::Enter => {
                let num_locals = instr.arg as usize;
                if let Some(frame) = self.frames.last_mut() {
                    frame.num_locals = frame.num_locals.max(num_locals);
                }
            }
            OpCode::Leave => {
                if let Some(frame) = self.frames.last() {
                    self.stack.truncate(frame.frame_pointer + frame.num_locals);
                }
            }
            OpCode::Alloc => {
                let size = self.pop()?;
                let size = match size {
                    Value::Int(i) => i.max(0) as usize,
                    _ => 0,
                };
                let handle = self.alloc_heap(size)?;
                self.push(Value::Heap(handle))?;
            }
            OpCode::Free => {
                let v = self.pop()?;
                if let Value::Heap(h) = v {
                    if let Some(obj) = self.heap.get_mut(h) {
                        obj.marked = false;
                        obj.data.clear();
                    }
                }
            }
            OpCode::LoadHeap => {
                let index = self.pop()?;
                let handle = self.pop()?;
                let (Value::Heap(h), Value::Int(i)) = (handle, index) else {
                    self.push(Value::Int(0))?;
                    return Ok(Step::Continue);
                };
                let byte = self
                    .heap
                    .get(h)
                    .and_then(|o| o.data.get(i as usize))
                    .copied()
                    .unwrap_or(0);
                self.push(Value::Int(byte as i64))?;
            }
            OpCode::StoreHeap => {
                let value = self.pop()?;
                let index = self.pop()?;
                let handle = self.pop()?;
                if let (Value::Heap(h), Value::Int(i), Value::Int(b)) = (handle, index, value) {
                    if let Some(obj) = self.heap.get_mut(h) {
                        if let Some(slot) = obj.data.get_mut(i as usize) {
                            *slot = b as u8;
                        }
                    }
                }
            }
            OpCode::LoadStr => self.push(Value::Str(instr.arg as u32))?,
            OpCode::Concat => {
                let b = self.pop()?;
                let a = self.pop()?;
                let a_s = self.value_to_display_string(a);
                let b_s = self.value_to_display_string(b);
                let id = self.intern_string(&format!("{a_s}{b_s}"));
                self.push(Value::Str(id))?;
            }
            OpCode::Print => {
                // `OP_PRINT`'s if/else-if chain (kotha/vm.c) has no branch
                // for non-numeric values — printing a string or null
                // through PRINT is silently a no-op in the original, not a
                // placeholder string. PRINT_STR is the opcode that prints
                // strings.
                let v = self.pop()?;
                if matches!(v, Value::Int(_) | Value::Float(_)) {
                    let s = format!("{v}");
                    self.output.push(s.clone());
                    println!("{s}");
                }
            }
            OpCode::PrintStr => {
                let v = self.pop()?;
                if let Value::Str(id) = v {
                    let s = self.get_string(id).unwrap_or("").to_string();
                    self.output.push(s.clone());
                    println!("{s}");
                }
            }
            OpCode::Input => {
                let mut line = String::new();
                let n = std::io::stdin().read_line(&mut line).unwrap_or(0);
                let value = if n == 0 { 0 } else { line.trim().parse().unwrap_or(0) };
                self.push(Value::Int(value))?;
            }
            OpCode::Try => {
                self.handler_stack.push((self.stack.len(), instr.arg as usize));
            }
            OpCode::EndTry => {
                self.handler_stack.pop();
            }
            OpCode::Throw => {
                let value = self.pop()?;
                match self.handler_stack.pop() {
                    Some((saved_sp, handler_addr)) => {
                        self.stack.truncate(saved_sp);
                        self.ip = handler_addr;
                    }
                    None => {
                        return Err(RuntimeError::UncaughtThrow { line: self.current_line, value });
                    }
                }
            }
            OpCode::Line => self.current_line = instr.arg as Line,
            OpCode::Breakpoint => {
                if self.debug {
                    warn!(ip, line = self.current_line, "breakpoint hit");
                }
            }
        }
        Ok(Step::Continue)
    }

    fn value_to_display_string(&self, v: Value) -> String {
        match v {
            Value::Str(id) => self.get_string(id).unwrap_or("").to_string(),
            other => other.to_string(),
        }
    }

    fn exec_arith(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let line = self.current_line;
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => match op {
                OpCode::Add => Value::Int(x.wrapping_add(y)),
                OpCode::Sub => Value::Int(x.wrapping_sub(y)),
                OpCode::Mul => Value::Int(x.wrapping_mul(y)),
                OpCode::Div => {
                    if y == 0 {
                        return Err(RuntimeError::DivisionByZero { line });
                    }
                    Value::Int(x.wrapping_div(y))
                }
                OpCode::Mod => {
                    if y == 0 {
                        return Err(RuntimeError::ModuloByZero { line });
                    }
                    Value::Int(x.wrapping_rem(y))
                }
                _ => unreachable!(),
            },
            (a, b) => {
                let x = as_float(a);
                let y = as_float(b);
                match op {
                    OpCode::Add => Value::Float(x + y),
                    OpCode::Sub => Value::Float(x - y),
                    OpCode::Mul => Value::Float(x * y),
                    OpCode::Div => {
                        if y == 0.0 {
                            return Err(RuntimeError::DivisionByZero { line });
                        }
                        Value::Float(x / y)
                    }
                    OpCode::Mod => {
                        if y == 0.0 {
                            return Err(RuntimeError::ModuloByZero { line });
                        }
                        Value::Float(x % y)
                    }
                    _ => unreachable!(),
                }
            }
        };
        self.push(result)
    }

    /// Comparisons always collapse to an `Int` 0/1, regardless of whether
    /// the operands were ints or floats — the original's float-typed
    /// comparison result was a latent bug, not a semantic requirement.
    ///
    /// `Eq`/`Neq` never promote: `OP_EQ` (kotha/vm.c) requires both operands
    /// be `VAL_INT` and is unconditionally false otherwise, so `5 == 5.0` is
    /// false here, not true. `Lt`/`Gt`/`Lte`/`Gte` do promote, matching
    /// `BINARY_OP`'s int-or-float handling (the same macro `OP_ADD` uses).
    fn exec_compare(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = if let (Value::Str(sa), Value::Str(sb)) = (a, b) {
            match op {
                OpCode::Eq => sa == sb,
                OpCode::Neq => sa != sb,
                _ => false,
            }
        } else if matches!(op, OpCode::Eq | OpCode::Neq) {
            let eq = matches!((a, b), (Value::Int(x), Value::Int(y)) if x == y);
            if op == OpCode::Eq { eq } else { !eq }
        } else {
            let x = as_float(a);
            let y = as_float(b);
            match op {
                OpCode::Lt => x < y,
                OpCode::Gt => x > y,
                OpCode::Lte => x <= y,
                OpCode::Gte => x >= y,
                _ => unreachable!(),
            }
        };
        self.push(Value::Int(result as i64))
    }

    fn exec_call(&mut self, func_id: usize) -> Result<(), RuntimeError> {
        let line = self.current_line;
        let entry = self
            .functions
            .get(func_id)
            .cloned()
            .ok_or(RuntimeError::InvalidFunction { line, index: func_id as u32 })?;
        if entry.address == NATIVE_FN_ADDR {
            return self.exec_native_call(entry.name);
        }
        if entry.address == u32::MAX {
            return Err(RuntimeError::InvalidFunction { line, index: func_id as u32 });
        }
        let num_params = entry.num_params as usize;
        if self.stack.len() < num_params {
            return Err(RuntimeError::StackUnderflow { line });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::FrameOverflow { line });
        }
        let new_fp = self.stack.len() - num_params;
        self.frames.push(CallFrame {
            return_addr: self.ip,
            frame_pointer: new_fp,
            num_locals: num_params,
            function_id: func_id as u32,
        });
        self.fp = new_fp as i64;
        self.ip = entry.address as usize;
        Ok(())
    }

    /// Runs a native builtin directly against the operand stack: pops its
    /// arguments (already pushed by `PARAM`, in declared order, so the last
    /// one is on top), pushes its result, and never touches the frame stack
    /// or `ip` — there's no bytecode body to jump into.
    fn exec_native_call(&mut self, name: Id) -> Result<(), RuntimeError> {
        match name.to_string().as_str() {
            "__array_new" => self.exec_array_new(),
            "__array_get" => self.exec_array_get(),
            _ => unreachable!("no other name is ever registered at {NATIVE_FN_ADDR}"),
        }
    }

    /// `arr := [size]` — allocates a zeroed int array on the heap.
    /// Mirrors `kotha_array_create`: a non-positive size falls back to its
    /// default capacity rather than erroring.
    fn exec_array_new(&mut self) -> Result<(), RuntimeError> {
        let size = match self.pop()? {
            Value::Int(i) => i,
            _ => 0,
        };
        let capacity = if size <= 0 { DEFAULT_ARRAY_CAPACITY } else { size } as usize;
        let handle = self.alloc_heap(capacity * ARRAY_ELEM_BYTES)?;
        self.push(Value::Heap(handle))
    }

    /// `arr[index]` — bounds-checked read, returning 0 out of range rather
    /// than erroring, matching `kotha_array_get`.
    fn exec_array_get(&mut self) -> Result<(), RuntimeError> {
        let index = self.pop()?;
        let handle = self.pop()?;
        let (Value::Heap(h), Value::Int(i)) = (handle, index) else {
            return self.push(Value::Int(0));
        };
        let elem = (i >= 0)
            .then(|| self.heap.get(h))
            .flatten()
            .and_then(|obj| {
                let start = i as usize * ARRAY_ELEM_BYTES;
                obj.data.get(start..start + ARRAY_ELEM_BYTES)
            })
            .map(|bytes| i64::from_le_bytes(bytes.try_into().unwrap()))
            .unwrap_or(0);
        self.push(Value::Int(elem))
    }

    fn exec_return(&mut self) -> Result<(), RuntimeError> {
        let retval = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or(RuntimeError::StackUnderflow { line: self.current_line })?;
        self.stack.truncate(frame.frame_pointer);
        self.ip = frame.return_addr;
        self.fp = self.frames.last().map(|f| f.frame_pointer as i64).unwrap_or(-1);
        self.push(retval)
    }

    pub fn stack_trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|f| {
                let name = self
                    .functions
                    .get(f.function_id as usize)
                    .map(|e| e.name.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                format!("  at {name} (return to {})", f.return_addr)
            })
            .collect()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn as_float(v: Value) -> f64 {
    match v {
        Value::Int(i) => i as f64,
        Value::Float(f) => f,
        _ => 0.0,
    }
}
