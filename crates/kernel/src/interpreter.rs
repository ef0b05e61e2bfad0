//! Tree-walking evaluator.
//!
//! Loading a kernel runs its top-level statements once against a fresh
//! global namespace. After that the namespace is frozen: calls read globals
//! through a shared borrow and keep their own locals, so one loaded kernel
//! can serve any number of calls without locking.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::ast::*;
use crate::value::{Builtin, MAX_VALUE_DEPTH, Number, Value, items_weight, str_weight};

/// Stack reserved for the thread kernel code runs on.
const KERNEL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Statement plus expression recursion allowed in one run. Sized so the
/// deepest run fits in [`KERNEL_STACK_SIZE`].
const MAX_NESTING: usize = 10_000;

/// Execution limits applied to every load and call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Statements, loop iterations and calls allowed per run
    pub max_steps: u64,

    /// Maximum nesting of kernel function calls
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 200,
        }
    }
}

/// An error raised while running kernel code.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct RuntimeError {
    pub message: String,
    pub line: usize,
}

pub(crate) type Globals = BTreeMap<String, Value>;

/// Run a program's top level and return the resulting globals plus
/// anything it printed.
pub(crate) fn run_module(
    program: &Program,
    limits: Limits,
) -> Result<(Globals, Vec<String>), RuntimeError> {
    on_kernel_stack(|| {
        let mut interp = Interpreter::new(Namespace::Owned(Globals::new()), limits);
        let mut scope = Scope::Module;
        interp.exec_block(&program.body, &mut scope)?;
        let output = std::mem::take(&mut interp.output);
        match interp.globals {
            Namespace::Owned(globals) => Ok((globals, output)),
            Namespace::Frozen(globals) => Ok((globals.clone(), output)),
        }
    })
}

/// Call a value with the given arguments against frozen globals.
pub(crate) fn call_value(
    globals: &Globals,
    limits: Limits,
    callee: Value,
    args: Vec<Value>,
) -> Result<(Value, Vec<String>), RuntimeError> {
    on_kernel_stack(move || {
        let mut interp = Interpreter::new(Namespace::Frozen(globals), limits);
        let value = interp.call(callee, args)?;
        Ok((value, interp.output))
    })
}

/// Evaluate a standalone expression against frozen globals.
pub(crate) fn evaluate(
    globals: &Globals,
    limits: Limits,
    expr: &Expr,
) -> Result<(Value, Vec<String>), RuntimeError> {
    on_kernel_stack(|| {
        let mut interp = Interpreter::new(Namespace::Frozen(globals), limits);
        let value = interp.eval(expr, &Scope::Module)?;
        Ok((value, interp.output))
    })
}

/// Run `work` on a dedicated thread with [`KERNEL_STACK_SIZE`] of stack, so
/// kernel recursion never depends on the caller's stack (tokio workers and
/// test threads get 2 MiB).
fn on_kernel_stack<T, F>(work: F) -> Result<T, RuntimeError>
where
    F: FnOnce() -> Result<T, RuntimeError> + Send,
    T: Send,
{
    let host_error = |message: String| RuntimeError { message, line: 0 };
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("duet-kernel".into())
            .stack_size(KERNEL_STACK_SIZE)
            .spawn_scoped(scope, work)
            .map_err(|e| host_error(format!("cannot start kernel thread: {e}")))?;
        handle
            .join()
            .unwrap_or_else(|_| Err(host_error("kernel thread panicked".into())))
    })
}

enum Namespace<'g> {
    Owned(Globals),
    Frozen(&'g Globals),
}

enum Scope {
    Module,
    Local(HashMap<String, Value>),
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Interpreter<'g> {
    globals: Namespace<'g>,
    limits: Limits,
    steps: u64,
    depth: usize,
    nesting: usize,
    line: usize,
    output: Vec<String>,
}

impl<'g> Interpreter<'g> {
    fn new(globals: Namespace<'g>, limits: Limits) -> Self {
        Self {
            globals,
            limits,
            steps: 0,
            depth: 0,
            nesting: 0,
            line: 1,
            output: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError {
            message: message.into(),
            line: self.line,
        }
    }

    fn charge(&mut self, steps: u64) -> Result<(), RuntimeError> {
        self.steps = self.steps.saturating_add(steps);
        if self.steps > self.limits.max_steps {
            return Err(self.error(format!(
                "step limit exceeded ({} steps)",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    fn enter(&mut self) -> Result<(), RuntimeError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error("maximum recursion depth exceeded"));
        }
        self.nesting += 1;
        Ok(())
    }

    fn global(&self, name: &str) -> Option<&Value> {
        match &self.globals {
            Namespace::Owned(map) => map.get(name),
            Namespace::Frozen(map) => map.get(name),
        }
    }

    /// Reading a name copies its value, so strings and lists are charged
    /// for their size.
    fn lookup(&mut self, name: &str, scope: &Scope) -> Result<Value, RuntimeError> {
        let found = match scope {
            Scope::Local(locals) => locals.get(name),
            Scope::Module => None,
        }
        .or_else(|| self.global(name))
        .cloned();
        if let Some(value) = found {
            self.charge(value.weight() - 1)?;
            return Ok(value);
        }
        Builtin::lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| self.error(format!("name '{name}' is not defined")))
    }

    fn assign(&mut self, name: &str, value: Value, scope: &mut Scope) -> Result<(), RuntimeError> {
        match scope {
            Scope::Local(locals) => {
                locals.insert(name.to_string(), value);
                Ok(())
            }
            Scope::Module => match &mut self.globals {
                Namespace::Owned(map) => {
                    map.insert(name.to_string(), value);
                    Ok(())
                }
                Namespace::Frozen(_) => {
                    Err(self.error(format!("cannot assign to global '{name}' after load")))
                }
            },
        }
    }

    // --- Statements ---

    fn exec_block(&mut self, body: &[Stmt], scope: &mut Scope) -> Result<Flow, RuntimeError> {
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &mut Scope) -> Result<Flow, RuntimeError> {
        self.enter()?;
        let flow = self.exec_stmt(stmt, scope);
        self.nesting -= 1;
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &mut Scope) -> Result<Flow, RuntimeError> {
        self.line = stmt.line;
        self.charge(1)?;

        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.assign(&def.name, Value::Function(def.clone()), scope)?;
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { branches, orelse } => {
                for (condition, body) in branches {
                    if self.eval(condition, scope)?.is_truthy() {
                        return self.exec_block(body, scope);
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::While { condition, body } => {
                while self.eval(condition, scope)?.is_truthy() {
                    self.charge(1)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let items = match self.eval(iter, scope)? {
                    Value::List(items) => items,
                    Value::Str(s) => {
                        // Splitting allocates one value per character up front
                        self.charge(s.chars().count() as u64)?;
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    }
                    other => {
                        return Err(self.error(format!(
                            "'{}' object is not iterable",
                            other.type_name()
                        )));
                    }
                };
                for item in items {
                    self.charge(1)?;
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, scope)?;
                self.assign(target, value, scope)?;
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.lookup(target, scope)?;
                let rhs = self.eval(value, scope)?;
                let result = self.binary(*op, current, rhs)?;
                self.assign(target, result, scope)?;
            }
            StmtKind::Raise(expr) => {
                let value = self.eval(expr, scope)?;
                return Err(self.error(format!("raised {}", value.repr())));
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    // --- Expressions ---

    fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, RuntimeError> {
        self.enter()?;
        let value = self.eval_expr(expr, scope);
        self.nesting -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::Name(name) => self.lookup(name, scope),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                if values.iter().any(|v| v.depth() >= MAX_VALUE_DEPTH) {
                    return Err(self.error(format!(
                        "list nesting exceeds {MAX_VALUE_DEPTH} levels"
                    )));
                }
                self.charge(items_weight(&values))?;
                Ok(Value::List(values))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                self.unary(*op, value)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, left, right)
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first, scope)?;
                for (op, right) in rest {
                    let right = self.eval(right, scope)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.eval(left, scope)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right, scope)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left, scope)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right, scope)
            }
            Expr::Call { callee, args } => {
                let callee = self.eval(callee, scope)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                self.call(callee, values)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?;
                self.index(target, index)
            }
        }
    }

    fn unary(&self, op: UnaryOp, value: Value) -> Result<Value, RuntimeError> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!value.is_truthy()));
        }
        let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
        match (op, value.as_number()) {
            (UnaryOp::Neg, Some(Number::Int(i))) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| self.error("integer overflow")),
            (UnaryOp::Neg, Some(Number::Float(f))) => Ok(Value::Float(-f)),
            (_, Some(Number::Int(i))) => Ok(Value::Int(i)),
            (_, Some(Number::Float(f))) => Ok(Value::Float(f)),
            (_, None) => Err(self.error(format!(
                "bad operand type for unary {symbol}: '{}'",
                value.type_name()
            ))),
        }
    }

    fn binary(&mut self, op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
        if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
            return self.arithmetic(op, a, b);
        }

        match (op, left, right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.charge(str_weight(a.len() + b.len()))?;
                Ok(Value::Str(a + &b))
            }
            (BinOp::Add, Value::List(mut a), Value::List(b)) => {
                self.charge(items_weight(&a).saturating_add(items_weight(&b)))?;
                a.extend(b);
                Ok(Value::List(a))
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s))
                if matches!(n.as_number(), Some(Number::Int(_))) =>
            {
                let count = self.repeat_count(&n, str_weight(s.len()))?;
                Ok(Value::Str(s.repeat(count)))
            }
            (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
                if matches!(n.as_number(), Some(Number::Int(_))) =>
            {
                let count = self.repeat_count(&n, items_weight(&items).max(1))?;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::List(out))
            }
            (op, left, right) => Err(self.error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))),
        }
    }

    /// Number of repetitions for `seq * n`, charged against the step budget
    /// at `unit` steps per copy.
    fn repeat_count(&mut self, n: &Value, unit: u64) -> Result<usize, RuntimeError> {
        let n = match n.as_number() {
            Some(Number::Int(n)) if n > 0 => n as u64,
            _ => return Ok(0),
        };
        self.charge(n.saturating_mul(unit))?;
        usize::try_from(n).map_err(|_| self.error("repeat count too large"))
    }

    fn arithmetic(&self, op: BinOp, a: Number, b: Number) -> Result<Value, RuntimeError> {
        let overflow = || self.error("integer overflow");

        if let (Number::Int(x), Number::Int(y)) = (a, b) {
            return match op {
                BinOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
                BinOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
                BinOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
                BinOp::Div => {
                    if y == 0 {
                        return Err(self.error("division by zero"));
                    }
                    Ok(Value::Float(x as f64 / y as f64))
                }
                BinOp::FloorDiv => {
                    if y == 0 {
                        return Err(self.error("integer division or modulo by zero"));
                    }
                    let q = x.checked_div(y).ok_or_else(overflow)?;
                    let floor = if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q };
                    Ok(Value::Int(floor))
                }
                BinOp::Mod => {
                    if y == 0 {
                        return Err(self.error("integer division or modulo by zero"));
                    }
                    let r = x.checked_rem(y).ok_or_else(overflow)?;
                    let r = if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r };
                    Ok(Value::Int(r))
                }
            };
        }

        let (x, y) = (a.as_f64(), b.as_f64());
        let needs_divisor = matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod);
        if needs_divisor && y == 0.0 {
            return Err(self.error("float division by zero"));
        }
        let result = match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
            BinOp::FloorDiv => (x / y).floor(),
            BinOp::Mod => x - y * (x / y).floor(),
        };
        Ok(Value::Float(result))
    }

    fn compare(&self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, RuntimeError> {
        use std::cmp::Ordering;

        match op {
            CmpOp::Eq => Ok(left.loose_eq(right)),
            CmpOp::NotEq => Ok(!left.loose_eq(right)),
            CmpOp::In | CmpOp::NotIn => {
                let found = match right {
                    Value::List(items) => items.iter().any(|item| item.loose_eq(left)),
                    Value::Str(haystack) => match left {
                        Value::Str(needle) => haystack.contains(needle.as_str()),
                        other => {
                            return Err(self.error(format!(
                                "'in <string>' requires string as left operand, not {}",
                                other.type_name()
                            )));
                        }
                    },
                    other => {
                        return Err(self.error(format!(
                            "argument of type '{}' is not iterable",
                            other.type_name()
                        )));
                    }
                };
                Ok(found == (op == CmpOp::In))
            }
            CmpOp::Lt | CmpOp::LtEq | CmpOp::Gt | CmpOp::GtEq => {
                let symbol = match op {
                    CmpOp::Lt => "<",
                    CmpOp::LtEq => "<=",
                    CmpOp::Gt => ">",
                    _ => ">=",
                };
                let Some(ordering) = left.partial_order(right) else {
                    // NaN compares false without being a type error
                    if left.as_number().is_some() && right.as_number().is_some() {
                        return Ok(false);
                    }
                    return Err(self.error(format!(
                        "'{symbol}' not supported between instances of '{}' and '{}'",
                        left.type_name(),
                        right.type_name()
                    )));
                };
                Ok(match op {
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::LtEq => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
        }
    }

    fn index(&mut self, target: Value, index: Value) -> Result<Value, RuntimeError> {
        if let Value::Str(s) = &target {
            self.charge(str_weight(s.len()) - 1)?;
        }
        let position = |len: usize, what: &str| -> Result<usize, RuntimeError> {
            let i = match index.as_number() {
                Some(Number::Int(i)) if !matches!(index, Value::Bool(_)) => i,
                _ => {
                    return Err(self.error(format!(
                        "{what} indices must be integers, not {}",
                        index.type_name()
                    )));
                }
            };
            let resolved = if i < 0 { i + len as i64 } else { i };
            if resolved < 0 || resolved >= len as i64 {
                return Err(self.error(format!("{what} index out of range")));
            }
            Ok(resolved as usize)
        };

        match target {
            Value::List(items) => {
                let i = position(items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = position(chars.len(), "string")?;
                Ok(Value::Str(chars[i].to_string()))
            }
            other => Err(self.error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    // --- Calls ---

    fn call(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(def) => self.call_function(&def, args),
            Value::Builtin(builtin) => self.call_builtin(builtin, args),
            other => Err(self.error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, def: &FunctionDef, args: Vec<Value>) -> Result<Value, RuntimeError> {
        if args.len() != def.params.len() {
            return Err(self.error(format!(
                "{}() takes {} positional argument{} but {} were given",
                def.name,
                def.params.len(),
                if def.params.len() == 1 { "" } else { "s" },
                args.len()
            )));
        }
        if self.depth >= self.limits.max_call_depth {
            return Err(self.error(format!(
                "maximum call depth exceeded ({})",
                self.limits.max_call_depth
            )));
        }
        self.charge(1)?;

        let locals: HashMap<String, Value> = def.params.iter().cloned().zip(args).collect();
        let mut scope = Scope::Local(locals);
        let caller_line = self.line;

        self.depth += 1;
        let flow = self.exec_block(&def.body, &mut scope);
        self.depth -= 1;

        let flow = flow?;
        self.line = caller_line;
        match flow {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let arity_error = |this: &Self, expected: &str| {
            this.error(format!(
                "{}() takes {expected} ({} given)",
                builtin.name(),
                args.len()
            ))
        };

        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.charge(str_weight(line.len()))?;
                self.output.push(line);
                Ok(Value::None)
            }
            Builtin::Len => {
                let [value] = args.as_slice() else {
                    return Err(arity_error(self, "exactly one argument"));
                };
                let len = match value {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    other => {
                        return Err(self.error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Int(len as i64))
            }
            Builtin::Str => match args.as_slice() {
                [] => Ok(Value::Str(String::new())),
                [value] => {
                    let text = value.to_string();
                    self.charge(str_weight(text.len()))?;
                    Ok(Value::Str(text))
                }
                _ => Err(arity_error(self, "at most one argument")),
            },
            Builtin::Int => {
                let [value] = args.as_slice() else {
                    return Err(arity_error(self, "exactly one argument"));
                };
                match value {
                    Value::Int(i) => Ok(Value::Int(*i)),
                    Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                    Value::Float(f) if f.is_finite() && f.abs() < 9.2e18 => {
                        Ok(Value::Int(f.trunc() as i64))
                    }
                    Value::Float(f) => {
                        Err(self.error(format!("cannot convert float {} to integer", Value::Float(*f))))
                    }
                    Value::Str(s) => s
                        .trim()
                        .replace('_', "")
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| {
                            self.error(format!(
                                "invalid literal for int() with base 10: {}",
                                value.repr()
                            ))
                        }),
                    other => Err(self.error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Range => self.range(&args),
        }
    }

    fn range(&mut self, args: &[Value]) -> Result<Value, RuntimeError> {
        let mut bounds = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Int(i) => bounds.push(*i),
                Value::Bool(b) => bounds.push(i64::from(*b)),
                other => {
                    return Err(self.error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        other.type_name()
                    )));
                }
            }
        }

        let (start, stop, step) = match bounds.as_slice() {
            [stop] => (0, *stop, 1),
            [start, stop] => (*start, *stop, 1),
            [start, stop, step] => (*start, *stop, *step),
            _ => {
                return Err(self.error(format!(
                    "range expected 1 to 3 arguments, got {}",
                    args.len()
                )));
            }
        };
        if step == 0 {
            return Err(self.error("range() arg 3 must not be zero"));
        }

        let (start, stop, step) = (start as i128, stop as i128, step as i128);
        let len = if step > 0 && stop > start {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        self.charge(u64::try_from(len).unwrap_or(u64::MAX))?;

        let items = (0..len)
            .map(|k| Value::Int((start + k * step) as i64))
            .collect();
        Ok(Value::List(items))
    }
}
