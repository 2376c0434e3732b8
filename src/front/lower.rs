//! Lowers the AST into the three-address IR.
//!
//! Mirrors a left-to-right, innermost-first evaluation of expressions and an
//! in-order execution of statements. Expression lowering always returns the
//! operand holding the computed value: a fresh temporary for anything that
//! needs computing, or the variable's own name for a bare reference.

use crate::common::Id;
use crate::front::ast::{self, BinOp, Expr, Stmt, UnOp};
use crate::middle::ir::{Instr, Op, Operand, Program};

struct Lower {
    program: Program,
    next_temp: u32,
    next_label: u32,
}

impl Lower {
    fn new() -> Self {
        Lower {
            program: Program::new(),
            next_temp: 0,
            next_label: 0,
        }
    }

    fn fresh_temp(&mut self) -> Id {
        let id = Id::new(format!("t{}", self.next_temp));
        self.next_temp += 1;
        id
    }

    fn fresh_label(&mut self) -> Id {
        let id = Id::new(format!("L{}", self.next_label));
        self.next_label += 1;
        id
    }

    fn emit(&mut self, op: Op, arg1: Option<Operand>, arg2: Option<Operand>, result: Option<Operand>, line: u32) {
        self.program.push(Instr::new(op, arg1, arg2, result, line));
    }

    fn lower_program(&mut self, ast: &ast::Program) {
        let (funcs, rest): (Vec<&Stmt>, Vec<&Stmt>) = ast
            .stmts
            .iter()
            .partition(|s| matches!(s, Stmt::FuncDecl { .. }));

        if !funcs.is_empty() {
            // A fixed, unambiguous name (not a counter-generated `LN`) so the
            // code generator can recognize it as the top-level re-entry
            // point and give top-level code its own local slot table,
            // distinct from whichever function was lowered last.
            let after = Id::new("__top_level_start".to_string());
            self.emit(Op::Goto, None, None, Some(Operand::label(after)), 0);
            for f in &funcs {
                self.lower_stmt(f);
            }
            self.emit(Op::Label, None, None, Some(Operand::label(after)), 0);
        }
        for s in &rest {
            self.lower_stmt(s);
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { name, value, line } => {
                let rhs = self.lower_expr(value);
                self.emit(Op::Assign, Some(rhs), None, Some(Operand::name(*name)), *line);
            }
            Stmt::Print(e, line) => {
                let v = self.lower_expr(e);
                self.emit(Op::Print, Some(v), None, None, *line);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                line,
            } => {
                let c = self.lower_expr(cond);
                let l_else = self.fresh_label();
                let l_end = self.fresh_label();
                self.emit(Op::IfFalse, Some(c), None, Some(Operand::label(l_else)), *line);
                for s in then_body {
                    self.lower_stmt(s);
                }
                self.emit(Op::Goto, None, None, Some(Operand::label(l_end)), *line);
                // A single definition of the else label: the original
                // generator emitted this LABEL twice in a row, which is not
                // a requirement to preserve.
                self.emit(Op::Label, None, None, Some(Operand::label(l_else)), *line);
                for s in else_body {
                    self.lower_stmt(s);
                }
                self.emit(Op::Label, None, None, Some(Operand::label(l_end)), *line);
            }
            Stmt::While { cond, body, line } => {
                let l_start = self.fresh_label();
                let l_end = self.fresh_label();
                self.emit(Op::Label, None, None, Some(Operand::label(l_start)), *line);
                let c = self.lower_expr(cond);
                self.emit(Op::IfFalse, Some(c), None, Some(Operand::label(l_end)), *line);
                for s in body {
                    self.lower_stmt(s);
                }
                self.emit(Op::Goto, None, None, Some(Operand::label(l_start)), *line);
                self.emit(Op::Label, None, None, Some(Operand::label(l_end)), *line);
            }
            Stmt::For {
                var,
                start,
                end,
                body,
                line,
            } => {
                let start_v = self.lower_expr(start);
                self.emit(Op::Assign, Some(start_v), None, Some(Operand::name(*var)), *line);
                let l_start = self.fresh_label();
                let l_end = self.fresh_label();
                self.emit(Op::Label, None, None, Some(Operand::label(l_start)), *line);
                let end_v = self.lower_expr(end);
                let c = self.fresh_temp();
                self.emit(
                    Op::Lte,
                    Some(Operand::name(*var)),
                    Some(end_v),
                    Some(Operand::name(c)),
                    *line,
                );
                self.emit(Op::IfFalse, Some(Operand::name(c)), None, Some(Operand::label(l_end)), *line);
                for s in body {
                    self.lower_stmt(s);
                }
                let next = self.fresh_temp();
                self.emit(
                    Op::Add,
                    Some(Operand::name(*var)),
                    Some(Operand::Int(1)),
                    Some(Operand::name(next)),
                    *line,
                );
                self.emit(Op::Assign, Some(Operand::name(next)), None, Some(Operand::name(*var)), *line);
                self.emit(Op::Goto, None, None, Some(Operand::label(l_start)), *line);
                self.emit(Op::Label, None, None, Some(Operand::label(l_end)), *line);
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.lower_stmt(s);
                }
            }
            Stmt::FuncDecl {
                name,
                params,
                body,
                line,
            } => {
                let label = Id::new(format!("func_{name}"));
                self.emit(Op::Label, None, None, Some(Operand::label(label)), *line);
                // Bind each parameter to its call-order slot by touching it
                // here, in order, before the body can reference params out
                // of order. The code generator allocates local slots on
                // first mention of a name, so this fixes slot 0..n-1 to
                // match the order `CALL` pushed arguments in.
                for p in params {
                    self.emit(Op::Assign, Some(Operand::name(*p)), None, Some(Operand::name(*p)), *line);
                }
                for s in body {
                    self.lower_stmt(s);
                }
                self.emit(Op::Return, None, None, None, *line);
            }
            Stmt::Return(value, line) => {
                let v = value.as_ref().map(|e| self.lower_expr(e));
                self.emit(Op::Return, v, None, None, *line);
            }
            Stmt::Try {
                body,
                catch_body,
                line,
            } => {
                let l_catch = self.fresh_label();
                let l_end = self.fresh_label();
                self.emit(Op::TryStart, None, None, Some(Operand::label(l_catch)), *line);
                for s in body {
                    self.lower_stmt(s);
                }
                self.emit(Op::TryEnd, None, None, None, *line);
                self.emit(Op::Goto, None, None, Some(Operand::label(l_end)), *line);
                self.emit(Op::Label, None, None, Some(Operand::label(l_catch)), *line);
                for s in catch_body {
                    self.lower_stmt(s);
                }
                self.emit(Op::Label, None, None, Some(Operand::label(l_end)), *line);
            }
            Stmt::Throw(e, line) => {
                let v = self.lower_expr(e);
                self.emit(Op::Throw, Some(v), None, None, *line);
            }
            Stmt::ExprStmt(e, _line) => {
                self.lower_expr(e);
            }
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> Operand {
        match expr {
            Expr::Int(i) => {
                let t = self.fresh_temp();
                self.emit(Op::Assign, Some(Operand::Int(*i)), None, Some(Operand::name(t)), 0);
                Operand::name(t)
            }
            Expr::Float(x) => {
                let t = self.fresh_temp();
                self.emit(Op::Assign, Some(Operand::Float(*x)), None, Some(Operand::name(t)), 0);
                Operand::name(t)
            }
            Expr::Str(s) => {
                let t = self.fresh_temp();
                self.emit(Op::Assign, Some(Operand::Str(s.clone())), None, Some(Operand::name(t)), 0);
                Operand::name(t)
            }
            Expr::Var(id) => Operand::name(*id),
            Expr::Unary { op, expr, line } => self.lower_unary(*op, expr, *line),
            Expr::Binary { op, lhs, rhs, line } => {
                let l = self.lower_expr(lhs);
                let r = self.lower_expr(rhs);
                let t = self.fresh_temp();
                let irop = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    BinOp::Div => Op::Div,
                    BinOp::Mod => Op::Mod,
                    BinOp::Eq => Op::Eq,
                    BinOp::Neq => Op::Neq,
                    BinOp::Lt => Op::Lt,
                    BinOp::Gt => Op::Gt,
                    BinOp::Lte => Op::Lte,
                    BinOp::Gte => Op::Gte,
                };
                self.emit(irop, Some(l), Some(r), Some(Operand::name(t)), *line);
                Operand::name(t)
            }
            Expr::Call { name, args, line } => {
                for a in args {
                    let v = self.lower_expr(a);
                    self.emit(Op::Param, Some(v), None, None, *line);
                }
                let t = self.fresh_temp();
                self.emit(
                    Op::Call,
                    Some(Operand::name(*name)),
                    Some(Operand::Int(args.len() as i64)),
                    Some(Operand::name(t)),
                    *line,
                );
                Operand::name(t)
            }
            Expr::ArrayDecl { size, line } => {
                let s = self.lower_expr(size);
                self.emit(Op::Param, Some(s), None, None, *line);
                let t = self.fresh_temp();
                self.emit(
                    Op::Call,
                    Some(Operand::name(Id::new("__array_new".to_string()))),
                    Some(Operand::Int(1)),
                    Some(Operand::name(t)),
                    *line,
                );
                Operand::name(t)
            }
            Expr::ArrayAccess { name, index, line } => {
                let idx = self.lower_expr(index);
                self.emit(Op::Param, Some(Operand::name(*name)), None, None, *line);
                self.emit(Op::Param, Some(idx), None, None, *line);
                let t = self.fresh_temp();
                self.emit(
                    Op::Call,
                    Some(Operand::name(Id::new("__array_get".to_string()))),
                    Some(Operand::Int(2)),
                    Some(Operand::name(t)),
                    *line,
                );
                Operand::name(t)
            }
        }
    }

    fn lower_unary(&mut self, op: UnOp, expr: &Expr, line: u32) -> Operand {
        match op {
            UnOp::Neg => {
                let v = self.lower_expr(expr);
                let t = self.fresh_temp();
                self.emit(Op::Sub, Some(Operand::Int(0)), Some(v), Some(Operand::name(t)), line);
                Operand::name(t)
            }
            UnOp::Not => {
                let v = self.lower_expr(expr);
                let t = self.fresh_temp();
                self.emit(Op::Eq, Some(v), Some(Operand::Int(0)), Some(Operand::name(t)), line);
                Operand::name(t)
            }
            UnOp::Inc | UnOp::Dec => {
                if let Expr::Var(id) = expr {
                    let t = self.fresh_temp();
                    let irop = if op == UnOp::Inc { Op::Add } else { Op::Sub };
                    self.emit(irop, Some(Operand::name(*id)), Some(Operand::Int(1)), Some(Operand::name(t)), line);
                    self.emit(Op::Assign, Some(Operand::name(t)), None, Some(Operand::name(*id)), line);
                    Operand::name(*id)
                } else {
                    // Only plain variables are incrementable; anything else
                    // degrades to evaluating the operand with no write-back.
                    self.lower_expr(expr)
                }
            }
        }
    }
}

pub fn lower(ast: ast::Program) -> Program {
    let mut l = Lower::new();
    l.lower_program(&ast);
    l.program
}
