//! A tree-walking interpreter: evaluates the AST directly, without going
//! through the IR or bytecode. Shares the `Value` type with the VM but keeps
//! its own flat variable environment per call frame.

use std::collections::HashMap;

use crate::common::{Id, Value};
use crate::error::RuntimeError;
use crate::front::ast::{BinOp, Expr, Program, Stmt, UnOp};

#[derive(Default)]
struct Env {
    vars: HashMap<Id, Value>,
}

impl Env {
    fn get(&self, name: Id) -> Value {
        self.vars.get(&name).copied().unwrap_or(Value::Int(0))
    }

    fn set(&mut self, name: Id, v: Value) {
        self.vars.insert(name, v);
    }
}

enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    globals: Env,
    functions: HashMap<Id, (Vec<Id>, Vec<Stmt>)>,
    /// A small string table of its own, since the interpreter has no VM
    /// string pool backing `Value::Str`'s numeric id.
    strings: Vec<String>,
    /// Backing storage for arrays, addressed by the same handle the
    /// interpreter stores in `Value::Heap` — its own small stand-in for the
    /// VM's heap, the same way `strings` stands in for the VM's string pool.
    arrays: Vec<Vec<i64>>,
    pub output: Vec<String>,
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            globals: Env::default(),
            functions: HashMap::new(),
            strings: Vec::new(),
            arrays: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for stmt in &program.stmts {
            if let Stmt::FuncDecl { name, params, body, .. } = stmt {
                self.functions.insert(*name, (params.clone(), body.clone()));
            }
        }
        let mut env = std::mem::take(&mut self.globals);
        for stmt in &program.stmts {
            if matches!(stmt, Stmt::FuncDecl { .. }) {
                continue;
            }
            if let Flow::Return(_) = self.exec_stmt(stmt, &mut env)? {
                break;
            }
        }
        self.globals = env;
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &mut Env) -> Result<Flow, RuntimeError> {
        for s in stmts {
            match self.exec_stmt(s, env)? {
                Flow::Normal => {}
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &mut Env) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Assign { name, value, line } => {
                let v = self.eval(value, env, *line)?;
                env.set(*name, v);
                Ok(Flow::Normal)
            }
            Stmt::Print(e, line) => {
                let v = self.eval(e, env, *line)?;
                let text = self.display(v);
                self.output.push(text.clone());
                println!("{text}");
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then_body, else_body, line } => {
                if self.eval(cond, env, *line)?.is_truthy() {
                    self.exec_block(then_body, env)
                } else {
                    self.exec_block(else_body, env)
                }
            }
            Stmt::While { cond, body, line } => {
                while self.eval(cond, env, *line)?.is_truthy() {
                    match self.exec_block(body, env)? {
                        Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { var, start, end, body, line } => {
                let start_v = as_int(self.eval(start, env, *line)?);
                let end_v = as_int(self.eval(end, env, *line)?);
                let mut i = start_v;
                while i <= end_v {
                    env.set(*var, Value::Int(i));
                    match self.exec_block(body, env)? {
                        Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                    i += 1;
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(stmts) => self.exec_block(stmts, env),
            Stmt::FuncDecl { .. } => Ok(Flow::Normal),
            Stmt::Return(value, line) => {
                let v = match value {
                    Some(e) => self.eval(e, env, *line)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }
            Stmt::Try { body, catch_body, .. } => match self.exec_block(body, env) {
                Ok(flow) => Ok(flow),
                Err(_) => self.exec_block(catch_body, env),
            },
            Stmt::Throw(e, line) => {
                let v = self.eval(e, env, *line)?;
                Err(RuntimeError::UncaughtThrow { line: *line, value: v })
            }
            Stmt::ExprStmt(e, line) => {
                self.eval(e, env, *line)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn eval(&mut self, expr: &Expr, env: &mut Env, line: u32) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(x) => Ok(Value::Float(*x)),
            Expr::Str(s) => Ok(Value::Str(self.intern_string(s))),
            Expr::Var(id) => Ok(env.get(*id)),
            Expr::Unary { op, expr, line } => {
                let v = self.eval(expr, env, *line)?;
                match op {
                    UnOp::Neg => Ok(match v {
                        Value::Int(i) => Value::Int(-i),
                        Value::Float(f) => Value::Float(-f),
                        _ => Value::Int(0),
                    }),
                    UnOp::Not => Ok(Value::Int(!v.is_truthy() as i64)),
                    UnOp::Inc | UnOp::Dec => {
                        if let crate::front::ast::Expr::Var(name) = expr.as_ref() {
                            let delta = if *op == UnOp::Inc { 1 } else { -1 };
                            let new_v = Value::Int(as_int(v) + delta);
                            env.set(*name, new_v);
                            Ok(new_v)
                        } else {
                            Ok(v)
                        }
                    }
                }
            }
            Expr::Binary { op, lhs, rhs, line } => {
                let l = self.eval(lhs, env, *line)?;
                let r = self.eval(rhs, env, *line)?;
                self.apply_binop(*op, l, r, *line)
            }
            Expr::Call { name, args, line } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a, env, *line)?);
                }
                self.call_function(*name, values, *line)
            }
            Expr::ArrayDecl { size, line } => {
                let n = as_int(self.eval(size, env, *line)?);
                // Mirrors `kotha_array_create`: a non-positive size falls
                // back to its default capacity rather than erroring.
                let capacity = if n <= 0 { 10 } else { n as usize };
                let handle = self.arrays.len() as u32;
                self.arrays.push(vec![0; capacity]);
                Ok(Value::Heap(handle))
            }
            Expr::ArrayAccess { name, index, line } => {
                let i = as_int(self.eval(index, env, *line)?);
                let elem = match env.get(*name) {
                    Value::Heap(h) if i >= 0 => self
                        .arrays
                        .get(h as usize)
                        .and_then(|a| a.get(i as usize))
                        .copied()
                        .unwrap_or(0),
                    // Bounds-checked read: out of range or not an array
                    // returns 0 rather than erroring, matching
                    // `kotha_array_get`.
                    _ => 0,
                };
                Ok(Value::Int(elem))
            }
        }
    }

    fn call_function(&mut self, name: Id, args: Vec<Value>, line: u32) -> Result<Value, RuntimeError> {
        let Some((params, body)) = self.functions.get(&name).cloned() else {
            return Ok(Value::Int(0));
        };
        let mut env = Env::default();
        for (p, v) in params.iter().zip(args.into_iter()) {
            env.set(*p, v);
        }
        match self.exec_block(&body, &mut env)? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => {
                let _ = line;
                Ok(Value::Null)
            }
        }
    }

    fn apply_binop(&mut self, op: BinOp, l: Value, r: Value, line: u32) -> Result<Value, RuntimeError> {
        if let (Value::Int(x), Value::Int(y)) = (l, r) {
            return Ok(match op {
                BinOp::Add => Value::Int(x + y),
                BinOp::Sub => Value::Int(x - y),
                BinOp::Mul => Value::Int(x * y),
                BinOp::Div => {
                    if y == 0 {
                        return Err(RuntimeError::DivisionByZero { line });
                    }
                    Value::Int(x / y)
                }
                BinOp::Mod => {
                    if y == 0 {
                        return Err(RuntimeError::ModuloByZero { line });
                    }
                    Value::Int(x % y)
                }
                BinOp::Eq => Value::Int((x == y) as i64),
                BinOp::Neq => Value::Int((x != y) as i64),
                BinOp::Lt => Value::Int((x < y) as i64),
                BinOp::Gt => Value::Int((x > y) as i64),
                BinOp::Lte => Value::Int((x <= y) as i64),
                BinOp::Gte => Value::Int((x >= y) as i64),
            });
        }
        let x = as_float_val(l);
        let y = as_float_val(r);
        Ok(match op {
            BinOp::Add => Value::Float(x + y),
            BinOp::Sub => Value::Float(x - y),
            BinOp::Mul => Value::Float(x * y),
            BinOp::Div => {
                if y == 0.0 {
                    return Err(RuntimeError::DivisionByZero { line });
                }
                Value::Float(x / y)
            }
            BinOp::Mod => {
                if y == 0.0 {
                    return Err(RuntimeError::ModuloByZero { line });
                }
                Value::Float(x % y)
            }
            BinOp::Eq => Value::Int((x == y) as i64),
            BinOp::Neq => Value::Int((x != y) as i64),
            BinOp::Lt => Value::Int((x < y) as i64),
            BinOp::Gt => Value::Int((x > y) as i64),
            BinOp::Lte => Value::Int((x <= y) as i64),
            BinOp::Gte => Value::Int((x >= y) as i64),
        })
    }

    fn display(&self, v: Value) -> String {
        match v {
            Value::Str(id) => self.strings.get(id as usize).cloned().unwrap_or_default(),
            other => other.to_string(),
        }
    }

    fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(pos) = self.strings.iter().position(|x| x == s) {
            return pos as u32;
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as u32
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn as_int(v: Value) -> i64 {
    match v {
        Value::Int(i) => i,
        Value::Float(f) => f as i64,
        _ => 0,
    }
}

fn as_float_val(v: Value) -> f64 {
    match v {
        Value::Int(i) => i as f64,
        Value::Float(f) => f,
        _ => 0.0,
    }
}
