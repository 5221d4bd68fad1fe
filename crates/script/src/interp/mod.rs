//! Tree-walking interpreter with metered execution.
//!
//! Every statement and expression burns one unit of fuel, and the wall-clock
//! deadline is polled periodically. Names in [`HOST_CAPABILITIES`] are never
//! bound: touching one is a security violation rather than a reference error.

mod builtins;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::ast::{AssignOp, BinaryOp, Expr, Function, Program, Stmt, StmtKind, UnaryOp};
use crate::error::{ScriptError, TimeoutBudget};
use crate::sandbox::SandboxLimits;
use crate::value::Value;

/// Host objects and functions a migration script may not reach.
pub const HOST_CAPABILITIES: &[&str] = &[
    "System",
    "java",
    "javax",
    "Java",
    "Packages",
    "process",
    "require",
    "module",
    "exports",
    "global",
    "globalThis",
    "window",
    "eval",
    "Function",
    "Reflect",
    "Proxy",
    "load",
    "loadWithNewGlobal",
    "exit",
    "quit",
    "print",
    "fetch",
    "XMLHttpRequest",
    "importScripts",
    "setTimeout",
    "setInterval",
    "Deno",
    "Bun",
];

/// How often the wall clock is consulted, in fuel units.
const CLOCK_POLL_INTERVAL: u64 = 256;

pub fn is_host_capability(name: &str) -> bool {
    HOST_CAPABILITIES.contains(&name)
}

/// Run `entry` from `program` with `args` under `limits`.
pub(crate) fn run(
    program: &Program,
    limits: &SandboxLimits,
    entry: &str,
    args: Vec<Value>,
) -> Result<Value, ScriptError> {
    let mut interp = Interpreter::new(program, limits);
    let function = program
        .functions
        .get(entry)
        .cloned()
        .ok_or_else(|| ScriptError::runtime(format!("function '{}' is not defined", entry)))?;
    interp.call_function(&function, args)
}

type Scope = HashMap<String, Value>;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Resolved assignment target, evaluated once for read-modify-write.
enum Place {
    Var(String),
    Prop(Value, Value),
}

pub(crate) struct Interpreter<'p> {
    program: &'p Program,
    limits: &'p SandboxLimits,
    fuel: u64,
    steps: u64,
    deadline: Instant,
    frames: Vec<Vec<Scope>>,
    line: u32,
}

impl<'p> Interpreter<'p> {
    fn new(program: &'p Program, limits: &'p SandboxLimits) -> Self {
        Interpreter {
            program,
            limits,
            fuel: limits.fuel,
            steps: 0,
            deadline: Instant::now() + limits.timeout,
            frames: Vec::new(),
            line: 0,
        }
    }

    // ── Metering ──────────────────────────────────

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.charge(1)
    }

    pub(crate) fn charge(&mut self, units: u64) -> Result<(), ScriptError> {
        if self.fuel < units {
            self.fuel = 0;
            return Err(ScriptError::Timeout {
                budget: TimeoutBudget::Fuel(self.limits.fuel),
            });
        }
        self.fuel -= units;
        let before = self.steps;
        self.steps += units;
        if before / CLOCK_POLL_INTERVAL != self.steps / CLOCK_POLL_INTERVAL
            && Instant::now() >= self.deadline
        {
            return Err(ScriptError::Timeout {
                budget: TimeoutBudget::WallClock(self.limits.timeout),
            });
        }
        Ok(())
    }

    pub(crate) fn rt(&self, message: impl std::fmt::Display) -> ScriptError {
        ScriptError::runtime(format!("line {}: {}", self.line, message))
    }

    pub(crate) fn check_string(&self, len: usize) -> Result<(), ScriptError> {
        if len > self.limits.max_string_len {
            return Err(self.rt(format!(
                "string length {} exceeds the limit of {}",
                len, self.limits.max_string_len
            )));
        }
        Ok(())
    }

    pub(crate) fn check_collection(&self, len: usize) -> Result<(), ScriptError> {
        if len > self.limits.max_collection_len {
            return Err(self.rt(format!(
                "collection size {} exceeds the limit of {}",
                len, self.limits.max_collection_len
            )));
        }
        Ok(())
    }

    // ── Scopes ────────────────────────────────────

    /// Functions see only their own frame; there are no closures or globals.
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .last()?
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
    }

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.frames.last_mut().and_then(|f| f.last_mut()) {
            scope.insert(name.to_string(), value);
        }
    }

    fn set_var(&mut self, name: &str, value: Value) -> Result<(), ScriptError> {
        if let Some(frame) = self.frames.last_mut() {
            for scope in frame.iter_mut().rev() {
                if let Some(slot) = scope.get_mut(name) {
                    *slot = value;
                    return Ok(());
                }
            }
        }
        if is_host_capability(name) {
            return Err(ScriptError::SecurityViolation {
                capability: name.to_string(),
            });
        }
        Err(self.rt(format!("assignment to undeclared variable '{}'", name)))
    }

    fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(Scope::new());
        }
    }

    fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pop();
        }
    }

    // ── Functions ─────────────────────────────────

    pub(crate) fn call_function(
        &mut self,
        function: &Arc<Function>,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(self.rt(format!(
                "maximum call depth of {} exceeded",
                self.limits.max_call_depth
            )));
        }
        let mut scope = Scope::new();
        let mut args = args.into_iter();
        for param in &function.params {
            scope.insert(param.clone(), args.next().unwrap_or(Value::Undefined));
        }
        self.frames.push(vec![scope]);
        let caller_line = self.line;
        self.line = function.line;
        let flow = self.exec_block(&function.body);
        self.frames.pop();
        let out = match flow? {
            Flow::Return(v) => v,
            Flow::Normal => Value::Undefined,
            Flow::Break | Flow::Continue => {
                return Err(self.rt("'break' or 'continue' outside of a loop"))
            }
        };
        self.line = caller_line;
        Ok(out)
    }

    // ── Statements ────────────────────────────────

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_scoped(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.push_scope();
        let flow = self.exec(stmt);
        self.pop_scope();
        flow
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.tick()?;
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Declare(decls) => {
                for (name, init) in decls {
                    let value = match init {
                        Some(e) => self.eval(e)?,
                        None => Value::Undefined,
                    };
                    self.declare(name, value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(e) => {
                self.eval(e)?;
                Ok(Flow::Normal)
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.exec_scoped(then)
                } else if let Some(otherwise) = otherwise {
                    self.exec_scoped(otherwise)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    self.tick()?;
                    match self.exec_scoped(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.push_scope();
                let flow = self.exec_for(init.as_deref(), cond.as_ref(), update.as_ref(), body);
                self.pop_scope();
                flow
            }
            StmtKind::ForOf {
                binding,
                iterable,
                body,
            } => {
                let items: Vec<Value> = match self.eval(iterable)? {
                    Value::Array(items) => items.borrow().clone(),
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    other => {
                        return Err(self.rt(format!("{} is not iterable", other.type_of())))
                    }
                };
                for item in items {
                    self.tick()?;
                    self.push_scope();
                    self.declare(binding, item);
                    let flow = self.exec(body);
                    self.pop_scope();
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Block(stmts) => {
                self.push_scope();
                let flow = self.exec_block(stmts);
                self.pop_scope();
                flow
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(v))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(e) => {
                let v = self.eval(e)?;
                let shown = match &v {
                    Value::Object(_) | Value::Array(_) => v
                        .to_json()
                        .map(|j| j.to_string())
                        .unwrap_or_else(|_| v.to_display()),
                    _ => v.to_display(),
                };
                Err(self.rt(format!("uncaught exception: {}", shown)))
            }
            StmtKind::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<Flow, ScriptError> {
        if let Some(init) = init {
            self.exec(init)?;
        }
        loop {
            self.tick()?;
            if let Some(cond) = cond {
                if !self.eval(cond)?.truthy() {
                    break;
                }
            }
            match self.exec_scoped(body)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update)?;
            }
        }
        Ok(Flow::Normal)
    }

    // ── Expressions ───────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.tick()?;
        match expr {
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Array(items) => {
                self.check_collection(items.len())?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::array(out))
            }
            Expr::Object(entries) => {
                self.check_collection(entries.len())?;
                let mut map = std::collections::BTreeMap::new();
                for (k, e) in entries {
                    let v = self.eval(e)?;
                    map.insert(k.clone(), v);
                }
                Ok(Value::object(map))
            }
            Expr::Ident(name) => self.eval_ident(name),
            Expr::Member { object, property } => {
                let target = self.eval(object)?;
                self.get_property(&target, &Value::str(property.as_str()))
            }
            Expr::Index { object, index } => {
                let target = self.eval(object)?;
                let key = self.eval(index)?;
                self.get_property(&target, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand),
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.binary(*op, &l, &r)
            }
            Expr::Logical { and, left, right } => {
                let l = self.eval(left)?;
                if l.truthy() == *and {
                    self.eval(right)
                } else {
                    Ok(l)
                }
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Assign { target, op, value } => {
                let place = self.resolve_place(target)?;
                let rhs = self.eval(value)?;
                let new = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => {
                        let old = self.read_place(&place)?;
                        self.binary(BinaryOp::Add, &old, &rhs)?
                    }
                    AssignOp::Sub => {
                        let old = self.read_place(&place)?;
                        self.binary(BinaryOp::Sub, &old, &rhs)?
                    }
                };
                self.write_place(place, new.clone())?;
                Ok(new)
            }
            Expr::Update {
                target,
                delta,
                prefix,
            } => {
                let place = self.resolve_place(target)?;
                let old = self.read_place(&place)?.to_number();
                let new = old + delta;
                self.write_place(place, Value::Num(new))?;
                Ok(Value::Num(if *prefix { new } else { old }))
            }
            Expr::Delete(target) => {
                match self.resolve_place(target)? {
                    Place::Prop(Value::Object(map), key) => {
                        map.borrow_mut().remove(&key.to_display());
                    }
                    Place::Prop(Value::Array(items), key) => {
                        if let Some(i) = array_index(&key) {
                            if let Some(slot) = items.borrow_mut().get_mut(i) {
                                *slot = Value::Undefined;
                            }
                        }
                    }
                    Place::Prop(other, key) => {
                        return Err(self.rt(format!(
                            "cannot delete property '{}' of {}",
                            key.to_display(),
                            other.to_display()
                        )))
                    }
                    Place::Var(name) => {
                        return Err(self.rt(format!("cannot delete variable '{}'", name)))
                    }
                }
                Ok(Value::Bool(true))
            }
        }
    }

    fn eval_ident(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(v) = self.lookup(name) {
            return Ok(v.clone());
        }
        if is_host_capability(name) {
            return Err(ScriptError::SecurityViolation {
                capability: name.to_string(),
            });
        }
        match name {
            "undefined" => Ok(Value::Undefined),
            "NaN" => Ok(Value::Num(f64::NAN)),
            "Infinity" => Ok(Value::Num(f64::INFINITY)),
            _ if builtins::is_namespace(name)
                || builtins::is_global_function(name)
                || self.program.functions.contains_key(name) =>
            {
                Err(self.rt(format!("'{}' can only be called, not used as a value", name)))
            }
            _ => Err(self.rt(format!("{} is not defined", name))),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            out.push(self.eval(a)?);
        }
        Ok(out)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, ScriptError> {
        match callee {
            Expr::Ident(name) if self.lookup(name).is_none() => {
                if let Some(function) = self.program.functions.get(name).cloned() {
                    let argv = self.eval_args(args)?;
                    return self.call_function(&function, argv);
                }
                if is_host_capability(name) {
                    return Err(ScriptError::SecurityViolation {
                        capability: name.clone(),
                    });
                }
                let argv = self.eval_args(args)?;
                self.call_global(name, argv)
            }
            Expr::Member { object, property } => {
                if let Expr::Ident(ns) = object.as_ref() {
                    if self.lookup(ns).is_none() && builtins::is_namespace(ns) {
                        let argv = self.eval_args(args)?;
                        return self.call_namespace(ns, property, argv);
                    }
                }
                let target = self.eval(object)?;
                let argv = self.eval_args(args)?;
                self.call_method(&target, property, argv)
            }
            Expr::Index { object, index } => {
                let target = self.eval(object)?;
                let method = self.eval(index)?.to_display();
                let argv = self.eval_args(args)?;
                self.call_method(&target, &method, argv)
            }
            other => {
                let v = self.eval(other)?;
                Err(self.rt(format!("{} is not a function", v.type_of())))
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<Value, ScriptError> {
        if op == UnaryOp::Typeof {
            if let Expr::Ident(name) = operand {
                if self.lookup(name).is_none() {
                    if is_host_capability(name) {
                        return Err(ScriptError::SecurityViolation {
                            capability: name.clone(),
                        });
                    }
                    let t = if self.program.functions.contains_key(name)
                        || builtins::is_global_function(name)
                    {
                        "function"
                    } else if builtins::is_namespace(name) {
                        "object"
                    } else if name == "NaN" || name == "Infinity" {
                        "number"
                    } else {
                        "undefined"
                    };
                    return Ok(Value::str(t));
                }
            }
        }
        let v = self.eval(operand)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!v.truthy()),
            UnaryOp::Neg => Value::Num(-v.to_number()),
            UnaryOp::Plus => Value::Num(v.to_number()),
            UnaryOp::Typeof => Value::str(v.type_of()),
        })
    }

    fn binary(&mut self, op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ScriptError> {
        Ok(match op {
            BinaryOp::Add => {
                if is_numeric_operand(l) && is_numeric_operand(r) {
                    Value::Num(l.to_number() + r.to_number())
                } else {
                    let (a, b) = (l.to_display(), r.to_display());
                    self.check_string(a.len() + b.len())?;
                    self.charge(((a.len() + b.len()) / 64) as u64)?;
                    Value::str(a + &b)
                }
            }
            BinaryOp::Sub => Value::Num(l.to_number() - r.to_number()),
            BinaryOp::Mul => Value::Num(l.to_number() * r.to_number()),
            BinaryOp::Div => Value::Num(l.to_number() / r.to_number()),
            BinaryOp::Rem => Value::Num(l.to_number() % r.to_number()),
            BinaryOp::Eq => Value::Bool(l.loose_equals(r)),
            BinaryOp::NotEq => Value::Bool(!l.loose_equals(r)),
            BinaryOp::StrictEq => Value::Bool(l.strict_equals(r)),
            BinaryOp::StrictNotEq => Value::Bool(!l.strict_equals(r)),
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                let ordering = match (l, r) {
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
                    _ => l.to_number().partial_cmp(&r.to_number()),
                };
                let holds = match ordering {
                    None => false,
                    Some(o) => match op {
                        BinaryOp::Lt => o.is_lt(),
                        BinaryOp::Lte => o.is_le(),
                        BinaryOp::Gt => o.is_gt(),
                        _ => o.is_ge(),
                    },
                };
                Value::Bool(holds)
            }
        })
    }

    // ── Properties ────────────────────────────────

    pub(crate) fn get_property(&self, target: &Value, key: &Value) -> Result<Value, ScriptError> {
        match target {
            Value::Undefined | Value::Null => Err(self.rt(format!(
                "cannot read property '{}' of {}",
                key.to_display(),
                target.to_display()
            ))),
            Value::Str(s) => {
                if let Some(i) = array_index(key) {
                    return Ok(s
                        .chars()
                        .nth(i)
                        .map(|c| Value::str(c.to_string()))
                        .unwrap_or(Value::Undefined));
                }
                Ok(match key.to_display().as_str() {
                    "length" => Value::Num(s.chars().count() as f64),
                    _ => Value::Undefined,
                })
            }
            Value::Array(items) => {
                let items = items.borrow();
                if let Some(i) = array_index(key) {
                    return Ok(items.get(i).cloned().unwrap_or(Value::Undefined));
                }
                Ok(match key.to_display().as_str() {
                    "length" => Value::Num(items.len() as f64),
                    _ => Value::Undefined,
                })
            }
            Value::Object(map) => Ok(map
                .borrow()
                .get(&key.to_display())
                .cloned()
                .unwrap_or(Value::Undefined)),
            Value::Bool(_) | Value::Int(_) | Value::Num(_) => Ok(Value::Undefined),
        }
    }

    fn set_property(&self, target: &Value, key: &Value, value: Value) -> Result<(), ScriptError> {
        match target {
            Value::Object(map) => {
                let name = key.to_display();
                let mut map = map.borrow_mut();
                if !map.contains_key(&name) {
                    self.check_collection(map.len() + 1)?;
                }
                map.insert(name, value);
                Ok(())
            }
            Value::Array(items) => {
                let Some(i) = array_index(key) else {
                    return Err(self.rt(format!(
                        "cannot set property '{}' on an array",
                        key.to_display()
                    )));
                };
                self.check_collection(i + 1)?;
                let mut items = items.borrow_mut();
                if i >= items.len() {
                    items.resize(i + 1, Value::Undefined);
                }
                items[i] = value;
                Ok(())
            }
            other => Err(self.rt(format!(
                "cannot set property '{}' of {}",
                key.to_display(),
                other.to_display()
            ))),
        }
    }

    fn resolve_place(&mut self, target: &Expr) -> Result<Place, ScriptError> {
        match target {
            Expr::Ident(name) => Ok(Place::Var(name.clone())),
            Expr::Member { object, property } => {
                let obj = self.eval(object)?;
                Ok(Place::Prop(obj, Value::str(property.as_str())))
            }
            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let key = self.eval(index)?;
                Ok(Place::Prop(obj, key))
            }
            _ => Err(self.rt("invalid assignment target")),
        }
    }

    fn read_place(&self, place: &Place) -> Result<Value, ScriptError> {
        match place {
            Place::Var(name) => self.eval_ident(name),
            Place::Prop(obj, key) => self.get_property(obj, key),
        }
    }

    fn write_place(&mut self, place: Place, value: Value) -> Result<(), ScriptError> {
        match place {
            Place::Var(name) => self.set_var(&name, value),
            Place::Prop(obj, key) => self.set_property(&obj, &key, value),
        }
    }
}

fn is_numeric_operand(v: &Value) -> bool {
    matches!(
        v,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Int(_) | Value::Num(_)
    )
}

/// A non-negative integral key addresses an array slot.
pub(crate) fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Int(i) => usize::try_from(*i).ok(),
        Value::Num(n) if *n >= 0.0 && n.fract() == 0.0 && *n < usize::MAX as f64 => {
            Some(*n as usize)
        }
        Value::Str(s) => s.parse::<usize>().ok().filter(|i| i.to_string() == **s),
        _ => None,
    }
}
