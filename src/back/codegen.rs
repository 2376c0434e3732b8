//! The IR-to-bytecode code generator.
//!
//! Two passes over the same IR: the first computes the bytecode address of
//! every label and registers functions; the second emits real bytecode using
//! those addresses. The two passes must agree exactly on how many bytecode
//! instructions each IR opcode turns into — see the per-opcode budgets in
//! [`budget`] — or pass 1's predicted addresses drift out from under pass 2's
//! real ones.

use crate::back::bytecode::{Instr, OpCode};
use crate::back::vm::Vm;
use crate::common::{Id, Map, Value};
use crate::error::CodegenError;
use crate::middle::ir::{Op, Operand, Program};

/// The exact number of bytecode instructions pass 2 emits for one IR
/// instruction of this opcode. Pass 1 uses this same table to predict
/// addresses, so the two passes can never disagree.
fn budget(op: Op) -> usize {
    match op {
        Op::Assign => 2,
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Eq | Op::Lt | Op::Gt => 4,
        Op::Neq | Op::Lte | Op::Gte => 6,
        Op::Print => 2,
        Op::Label => 0,
        Op::Goto => 1,
        Op::IfFalse => 2,
        Op::Param => 1,
        Op::Call => 2,
        Op::Return => 2,
        Op::TryStart => 1,
        Op::TryEnd => 1,
        Op::Throw => 2,
        Op::Nop => 1,
    }
}

/// Per-function local variable slot allocator: first-come, first-served,
/// reset at each function boundary so recursive calls never alias slots
/// across stack frames.
#[derive(Default)]
pub struct SlotTable {
    slots: Map<Id, u32>,
    next: u32,
}

impl SlotTable {
    fn slot_of(&mut self, name: Id) -> u32 {
        if let Some(s) = self.slots.get(&name) {
            *s
        } else {
            let s = self.next;
            self.next += 1;
            self.slots.insert(name, s);
            s
        }
    }
}

struct Pass1 {
    addr: usize,
    label_addrs: Map<Id, usize>,
    func_param_counts: Map<Id, u32>,
}

fn is_function_label(name: &str) -> Option<&str> {
    name.strip_prefix("func_").or_else(|| name.strip_prefix("function_"))
}

fn run_pass1(ir: &Program, base_addr: usize) -> Pass1 {
    let mut p = Pass1 {
        addr: base_addr,
        label_addrs: Map::new(),
        func_param_counts: Map::new(),
    };
    let mut i = 0;
    while i < ir.instrs.len() {
        let instr = &ir.instrs[i];
        match instr.op {
            Op::Label => {
                let label = instr.result.as_ref().and_then(Operand::as_label).expect("LABEL without a name");
                p.label_addrs.insert(*label, p.addr);
                if let Some(fname) = is_function_label(&label.to_string()) {
                    // Count the parameter-binding marker instructions that
                    // immediately follow: consecutive ASSIGNs of a name to
                    // itself (see `front::lower`'s FuncDecl lowering).
                    let mut count = 0u32;
                    let mut j = i + 1;
                    while j < ir.instrs.len() {
                        let next = &ir.instrs[j];
                        let is_marker = next.op == Op::Assign
                            && matches!((&next.arg1, &next.result), (Some(Operand::Name(a)), Some(Operand::Name(r))) if a == r);
                        if is_marker {
                            count += 1;
                            j += 1;
                        } else {
                            break;
                        }
                    }
                    p.func_param_counts.insert(Id::new(fname.to_string()), count);
                }
            }
            op => p.addr += budget(op),
        }
        i += 1;
    }
    p
}

struct Pass2<'a> {
    ir: &'a Program,
    pass1: &'a Pass1,
    vm: &'a mut Vm,
    slots: &'a mut SlotTable,
    pending_params: u32,
    current_func: Option<Id>,
}

impl<'a> Pass2<'a> {
    fn resolve_label(&self, id: &Id) -> Result<usize, CodegenError> {
        self.pass1
            .label_addrs
            .get(id)
            .copied()
            .ok_or_else(|| CodegenError::UndefinedLabel(*id))
    }

    /// The uniform operand load rule: resolves an IR operand to whichever
    /// single bytecode instruction pushes its value.
    fn emit_load(&mut self, operand: &Operand, line: u32) {
        match operand {
            Operand::Str(s) => {
                let id = self.vm.intern_string(s);
                self.vm.code.push(Instr::new(OpCode::LoadStr, id as i64, line));
            }
            Operand::Float(x) => {
                let id = self.vm.add_constant(Value::Float(*x));
                self.vm.code.push(Instr::new(OpCode::LoadConst, id as i64, line));
            }
            Operand::Int(i) => {
                self.vm.code.push(Instr::new(OpCode::Push, *i, line));
            }
            Operand::Name(name) => {
                let slot = self.slots.slot_of(*name);
                self.vm.code.push(Instr::new(OpCode::LoadLocal, slot as i64, line));
            }
            Operand::Label(name) => {
                // Only reached if a label name is erroneously used as a
                // value; treat it as a variable reference for robustness.
                let slot = self.slots.slot_of(*name);
                self.vm.code.push(Instr::new(OpCode::LoadLocal, slot as i64, line));
            }
        }
    }

    fn store_result(&mut self, result: &Operand, line: u32) {
        let name = result.as_name().copied().expect("STORE target must be a name");
        let slot = self.slots.slot_of(name);
        self.vm.code.push(Instr::new(OpCode::StoreLocal, slot as i64, line));
    }

    fn reset_slots_for_function(&mut self, func: Option<Id>) {
        *self.slots = SlotTable::default();
        self.current_func = func;
    }

    fn run(&mut self) -> Result<(), CodegenError> {
        let mut i = 0;
        while i < self.ir.instrs.len() {
            let instr = self.ir.instrs[i].clone();
            let line = instr.line;
            match instr.op {
                Op::Label => {
                    let label = instr.result.as_ref().and_then(Operand::as_label).unwrap();
                    if let Some(fname) = is_function_label(&label.to_string()) {
                        let fid = Id::new(fname.to_string());
                        let params = *self.pass1.func_param_counts.get(&fid).unwrap_or(&0);
                        let addr = self.vm.code.len() as u32;
                        self.vm.add_function(fid, addr, params);
                        self.reset_slots_for_function(Some(fid));
                    } else if label.to_string() == "__top_level_start" {
                        // Re-entry point after the hoisted function bodies:
                        // top-level code gets its own slot table rather than
                        // continuing whichever function was lowered last.
                        self.reset_slots_for_function(None);
                    }
                    // no bytecode emitted for a label itself
                }
                Op::Assign => {
                    self.emit_load(instr.arg1.as_ref().unwrap(), line);
                    self.store_result(instr.result.as_ref().unwrap(), line);
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Eq | Op::Lt | Op::Gt => {
                    self.emit_load(instr.arg1.as_ref().unwrap(), line);
                    self.emit_load(instr.arg2.as_ref().unwrap(), line);
                    let op = match instr.op {
                        Op::Add => OpCode::Add,
                        Op::Sub => OpCode::Sub,
                        Op::Mul => OpCode::Mul,
                        Op::Div => OpCode::Div,
                        Op::Mod => OpCode::Mod,
                        Op::Eq => OpCode::Eq,
                        Op::Lt => OpCode::Lt,
                        Op::Gt => OpCode::Gt,
                        _ => unreachable!(),
                    };
                    self.vm.code.push(Instr::bare(op, line));
                    self.store_result(instr.result.as_ref().unwrap(), line);
                }
                Op::Neq | Op::Lte | Op::Gte => {
                    self.emit_load(instr.arg1.as_ref().unwrap(), line);
                    self.emit_load(instr.arg2.as_ref().unwrap(), line);
                    // Compute the opposite comparison, then logically invert
                    // it by comparing the 0/1 result against 0.
                    let opposite = match instr.op {
                        Op::Neq => OpCode::Eq,
                        Op::Lte => OpCode::Gt,
                        Op::Gte => OpCode::Lt,
                        _ => unreachable!(),
                    };
                    self.vm.code.push(Instr::bare(opposite, line));
                    self.vm.code.push(Instr::new(OpCode::Push, 0, line));
                    self.vm.code.push(Instr::bare(OpCode::Eq, line));
                    self.store_result(instr.result.as_ref().unwrap(), line);
                }
                Op::Print => {
                    self.emit_load(instr.arg1.as_ref().unwrap(), line);
                    self.vm.code.push(Instr::bare(OpCode::Print, line));
                }
                Op::Goto => {
                    let label = instr.result.as_ref().and_then(Operand::as_label).unwrap();
                    let addr = self.resolve_label(label)?;
                    self.vm.code.push(Instr::new(OpCode::Jmp, addr as i64, line));
                }
                Op::IfFalse => {
                    self.emit_load(instr.arg1.as_ref().unwrap(), line);
                    let label = instr.result.as_ref().and_then(Operand::as_label).unwrap();
                    let addr = self.resolve_label(label)?;
                    self.vm.code.push(Instr::new(OpCode::JmpFalse, addr as i64, line));
                }
                Op::Param => {
                    self.emit_load(instr.arg1.as_ref().unwrap(), line);
                    self.pending_params += 1;
                }
                Op::Call => {
                    let fname = instr.arg1.as_ref().and_then(Operand::as_name).copied().unwrap();
                    let fid = self.vm.function_id_or_placeholder(fname, self.pending_params);
                    self.vm.code.push(Instr::new(OpCode::Call, fid as i64, line));
                    match &instr.result {
                        Some(result) => self.store_result(result, line),
                        None => self.vm.code.push(Instr::bare(OpCode::Pop, line)),
                    }
                    self.pending_params = 0;
                }
                Op::Return => {
                    match &instr.arg1 {
                        Some(v) => self.emit_load(v, line),
                        None => self.vm.code.push(Instr::new(OpCode::Push, 0, line)),
                    }
                    self.vm.code.push(Instr::bare(OpCode::Return, line));
                }
                Op::TryStart => {
                    let label = instr.result.as_ref().and_then(Operand::as_label).unwrap();
                    let addr = self.resolve_label(label)?;
                    self.vm.code.push(Instr::new(OpCode::Try, addr as i64, line));
                }
                Op::TryEnd => {
                    self.vm.code.push(Instr::bare(OpCode::EndTry, line));
                }
                Op::Throw => {
                    self.emit_load(instr.arg1.as_ref().unwrap(), line);
                    self.vm.code.push(Instr::bare(OpCode::Throw, line));
                }
                Op::Nop => {
                    self.vm.code.push(Instr::bare(OpCode::Nop, line));
                }
            }
            i += 1;
        }
        Ok(())
    }
}

/// Generates a fully populated VM from an IR program: code, constants,
/// strings, functions, ready to `run()`.
pub fn generate(ir: &Program) -> Result<Vm, CodegenError> {
    let mut vm = Vm::new();
    let mut slots = SlotTable::default();
    append(&mut vm, &mut slots, ir)?;
    Ok(vm)
}

/// Generates bytecode for `ir` and appends it to an already-running `Vm`,
/// continuing address prediction from the current end of `vm.code` and
/// continuing `slots`' allocation rather than starting over. Lets a REPL
/// extend a persistent session one line at a time without rebasing jump
/// targets or function-table indices after the fact: everything is already
/// computed in absolute terms against the VM being extended.
pub fn append(vm: &mut Vm, slots: &mut SlotTable, ir: &Program) -> Result<(), CodegenError> {
    let base_addr = vm.code.len();
    let pass1 = run_pass1(ir, base_addr);
    let mut pass2 = Pass2 {
        ir,
        pass1: &pass1,
        vm,
        slots,
        pending_params: 0,
        current_func: None,
    };
    pass2.run()?;
    if !matches!(vm.code.last().map(|i| i.op), Some(OpCode::Halt)) {
        let line = vm.code.last().map(|i| i.line).unwrap_or(0);
        vm.code.push(Instr::bare(OpCode::Halt, line));
    }
    Ok(())
}

impl Vm {
    fn function_id_or_placeholder(&mut self, name: Id, num_params: u32) -> u32 {
        if let Some(entry) = self.functions.iter().position(|f| f.name == name) {
            entry as u32
        } else {
            self.add_function(name, u32::MAX, num_params)
        }
    }
}
