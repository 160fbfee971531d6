//! Tree-walking interpreter over the parsed program.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::ast::{BinOp, BoolOp, CmpOp, Comprehension, Expr, FPart, Param as ParamDef, Stmt, StmtKind, Target, UnaryOp};
use super::builtins::{call_builtin, call_method, format_value, lookup_builtin, module_attr, module_exports};
use super::error::{ErrorKind, RunResult, RuntimeError};
use super::timeout::Deadline;
use super::value::{check_len, iterate, Function, Module, Param, Scope, Value};

/// Maximum nesting of user function calls.
pub const MAX_CALL_DEPTH: usize = 200;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

#[derive(Default)]
struct Frame {
    locals: Scope,
    /// Scopes of the functions this call's function was defined in.
    enclosing: Vec<Scope>,
    declared_globals: HashSet<String>,
    /// Comprehension scopes fall through to the enclosing frame on lookup.
    transparent: bool,
}

/// Evaluator state for one run. Borrows the global mapping and the output
/// buffer of the owning runtime.
pub struct Interpreter<'a> {
    globals: &'a mut HashMap<String, Value>,
    output: &'a mut String,
    deadline: Option<&'a Deadline>,
    frames: Vec<Frame>,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        globals: &'a mut HashMap<String, Value>,
        output: &'a mut String,
        deadline: Option<&'a Deadline>,
    ) -> Self {
        Self { globals, output, deadline, frames: Vec::new(), depth: 0 }
    }

    /// Poll the deadline. Called on every statement, expression and loop
    /// iteration.
    pub fn tick(&self) -> RunResult<()> {
        match self.deadline {
            Some(deadline) => deadline.check().map_err(RuntimeError::from),
            None => Ok(()),
        }
    }

    pub fn write_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn run(&mut self, program: &[Stmt]) -> RunResult<()> {
        self.exec_block(program).map(|_| ())
    }

    // ── Names ─────────────────────────────────────────────────────────

    /// Locals (through comprehension scopes), then enclosing function
    /// scopes innermost first, then globals.
    fn resolve(&self, name: &str) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.locals.lock().get(name) {
                return Some(v.clone());
            }
            if !frame.transparent {
                for scope in frame.enclosing.iter().rev() {
                    if let Some(v) = scope.lock().get(name) {
                        return Some(v.clone());
                    }
                }
                break;
            }
        }
        self.globals.get(name).cloned()
    }

    fn lookup(&self, name: &str) -> RunResult<Value> {
        match self.resolve(name) {
            Some(v) => Ok(v),
            None => lookup_builtin(name).ok_or_else(|| RuntimeError::name(name)),
        }
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.frames.last() {
            Some(frame) if !frame.declared_globals.contains(name) => {
                frame.locals.lock().insert(name.to_string(), value);
            }
            _ => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    // ── Statements ────────────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> RunResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> RunResult<Flow> {
        self.tick()
            .and_then(|_| self.exec_kind(&stmt.kind))
            .map_err(|e| e.at_line(stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> RunResult<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value)?,
            StmtKind::FunctionDef { name, params, body } => self.exec_def(name, params, body)?,
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { cond, body, orelse } => {
                let branch = if self.eval(cond)?.is_truthy() { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::For { target, iter, body } => return self.exec_for(target, iter, body),
            StmtKind::While { cond, body } => return self.exec_while(cond, body),
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.declared_globals.extend(names.iter().cloned());
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.is_truthy() {
                    let message = match msg {
                        Some(expr) => self.eval(expr)?.to_string(),
                        None => String::new(),
                    };
                    return Err(RuntimeError::new(ErrorKind::AssertionError, message));
                }
            }
            StmtKind::Import { module, alias } => {
                let m = import(module)?;
                self.bind(alias.as_deref().unwrap_or(module.as_str()), Value::Module(m));
            }
            StmtKind::ImportFrom { module, names } => {
                let m = import(module)?;
                if names.is_empty() {
                    for (name, value) in module_exports(m) {
                        self.bind(&name, value);
                    }
                }
                for (name, alias) in names {
                    let value = module_attr(m, name).map_err(|_| {
                        RuntimeError::new(
                            ErrorKind::ImportError,
                            format!("cannot import name '{name}' from '{}'", m.name()),
                        )
                    })?;
                    self.bind(alias.as_deref().unwrap_or(name.as_str()), value);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_def(&mut self, name: &str, params: &[ParamDef], body: &[Stmt]) -> RunResult<()> {
        let mut evaluated = Vec::with_capacity(params.len());
        for param in params {
            let default = match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            };
            evaluated.push(Param { name: param.name.clone(), default });
        }
        // Nested definitions see the defining call's locals as they evolve.
        let enclosing = match self.frames.iter().rev().find(|f| !f.transparent) {
            Some(frame) => {
                let mut chain = frame.enclosing.clone();
                chain.push(frame.locals.clone());
                chain
            }
            None => Vec::new(),
        };
        let function = Function { name: name.to_string(), params: evaluated, body: body.to_vec(), enclosing };
        self.bind(name, Value::Function(Arc::new(function)));
        Ok(())
    }

    fn exec_for(&mut self, target: &Target, iter: &Expr, body: &[Stmt]) -> RunResult<Flow> {
        let iterable = self.eval(iter)?;
        for item in iterate(&iterable)? {
            self.tick()?;
            self.assign(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_while(&mut self, cond: &Expr, body: &[Stmt]) -> RunResult<Flow> {
        loop {
            self.tick()?;
            if !self.eval(cond)?.is_truthy() {
                break;
            }
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = augmented(current, op, &rhs)?;
                self.bind(name, updated);
                Ok(())
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                let current = container.get_item(&index)?;
                let rhs = self.eval(value)?;
                let updated = augmented(current, op, &rhs)?;
                container.set_item(index, updated)
            }
            Target::Tuple(_) => Err(RuntimeError::new(
                ErrorKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> RunResult<()> {
        match target {
            Target::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            Target::Subscript { index, .. } if matches!(index, Expr::Slice { .. }) => {
                Err(RuntimeError::type_error("slice assignment is not supported"))
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                container.set_item(index, value)
            }
            Target::Tuple(targets) => {
                let items = value.iter_items().map_err(|_| {
                    RuntimeError::type_error(format!(
                        "cannot unpack non-iterable {} object",
                        value.type_name()
                    ))
                })?;
                match items.len().cmp(&targets.len()) {
                    Ordering::Less => Err(RuntimeError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ))),
                    Ordering::Greater => Err(RuntimeError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ))),
                    Ordering::Equal => {
                        for (target, item) in targets.iter().zip(items) {
                            self.assign(target, item)?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    // ── Expressions ───────────────────────────────────────────────────

    pub fn eval(&mut self, expr: &Expr) -> RunResult<Value> {
        self.tick()?;
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::FString(parts) => self.eval_fstring(parts),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::Dict(entries) => self.eval_dict(entries),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand),
            Expr::Binary { left, op, right } => {
                let lhs = self.eval(left)?;
                let rhs = self.eval(right)?;
                lhs.binary(*op, &rhs)
            }
            Expr::BoolOp { op, left, right } => {
                let lhs = self.eval(left)?;
                match (op, lhs.is_truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(lhs),
                    _ => self.eval(right),
                }
            }
            Expr::Compare { left, rest } => self.eval_compare(left, rest),
            Expr::IfExp { cond, then, orelse } => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Attribute { value, attr } => match self.eval(value)? {
                Value::Module(m) => module_attr(m, attr),
                other => Err(RuntimeError::new(
                    ErrorKind::AttributeError,
                    format!("'{}' object has no attribute '{attr}'", other.type_name()),
                )),
            },
            Expr::Subscript { value, index } => self.eval_subscript(value, index),
            Expr::Slice { .. } => Err(RuntimeError::new(ErrorKind::SyntaxError, "slice outside of a subscript")),
            Expr::ListComp { elt, generators } => self.eval_list_comp(elt, generators),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> RunResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_fstring(&mut self, parts: &[FPart]) -> RunResult<Value> {
        let mut text = String::new();
        for part in parts {
            match part {
                FPart::Literal(s) => text.push_str(s),
                FPart::Field { expr, spec, repr } => {
                    let value = self.eval(expr)?;
                    let value = if *repr { Value::Str(value.repr()) } else { value };
                    text.push_str(&format_value(&value, spec.as_deref().unwrap_or(""))?);
                }
            }
        }
        Ok(Value::Str(text))
    }

    fn eval_dict(&mut self, entries: &[(Expr, Expr)]) -> RunResult<Value> {
        let dict = Value::dict(Vec::with_capacity(entries.len()));
        for (key, value) in entries {
            let key = self.eval(key)?;
            let value = self.eval(value)?;
            dict.set_item(key, value)?;
        }
        Ok(dict)
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> RunResult<Value> {
        let value = self.eval(operand)?;
        match op {
            UnaryOp::Neg => value.negate(),
            UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
            UnaryOp::Pos => match value {
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                v if v.is_number() => Ok(v),
                v => Err(RuntimeError::type_error(format!(
                    "bad operand type for unary +: '{}'",
                    v.type_name()
                ))),
            },
        }
    }

    fn eval_compare(&mut self, left: &Expr, rest: &[(CmpOp, Expr)]) -> RunResult<Value> {
        let mut lhs = self.eval(left)?;
        for (op, right) in rest {
            let rhs = self.eval(right)?;
            if !compare(*op, &lhs, &rhs)? {
                return Ok(Value::Bool(false));
            }
            lhs = rhs;
        }
        Ok(Value::Bool(true))
    }

    fn eval_subscript(&mut self, value: &Expr, index: &Expr) -> RunResult<Value> {
        if let Expr::Slice { lower, upper, step } = index {
            let container = self.eval(value)?;
            let lower = self.eval_bound(lower.as_deref())?;
            let upper = self.eval_bound(upper.as_deref())?;
            let step = self.eval_bound(step.as_deref())?;
            return container.slice(lower, upper, step);
        }
        let container = self.eval(value)?;
        let index = self.eval(index)?;
        container.get_item(&index)
    }

    fn eval_bound(&mut self, bound: Option<&Expr>) -> RunResult<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                RuntimeError::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn eval_list_comp(&mut self, elt: &Expr, generators: &[Comprehension]) -> RunResult<Value> {
        self.frames.push(Frame { transparent: true, ..Frame::default() });
        let mut out = Vec::new();
        let result = self.comprehend(elt, generators, &mut out);
        self.frames.pop();
        result.map(|_| Value::list(out))
    }

    fn comprehend(&mut self, elt: &Expr, generators: &[Comprehension], out: &mut Vec<Value>) -> RunResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            out.push(self.eval(elt)?);
            return Ok(());
        };
        let iterable = self.eval(&first.iter)?;
        'items: for item in iterate(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item)?;
            for cond in &first.conds {
                if !self.eval(cond)?.is_truthy() {
                    continue 'items;
                }
            }
            self.comprehend(elt, rest, out)?;
        }
        Ok(())
    }

    // ── Calls ─────────────────────────────────────────────────────────

    fn eval_args(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> RunResult<(Vec<Value>, Vec<(String, Value)>)> {
        let args = self.eval_all(args)?;
        let mut named = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            named.push((name.clone(), self.eval(expr)?));
        }
        Ok((args, named))
    }

    fn eval_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> RunResult<Value> {
        if let Expr::Attribute { value, attr } = func {
            return self.eval_method_call(value, attr, args, kwargs);
        }
        let callee = self.eval(func)?;
        let (args, kwargs) = self.eval_args(args, kwargs)?;
        self.call_value(callee, args, kwargs)
    }

    fn eval_method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> RunResult<Value> {
        match self.eval(receiver)? {
            Value::Module(m) => {
                let callee = module_attr(m, method)?;
                let (args, kwargs) = self.eval_args(args, kwargs)?;
                self.call_value(callee, args, kwargs)
            }
            value => {
                let (args, kwargs) = self.eval_args(args, kwargs)?;
                call_method(&value, method, args, kwargs)
            }
        }
    }

    /// Call a function value. Used by builtins for `key=` and `map`.
    pub fn call_value(&mut self, func: Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> RunResult<Value> {
        self.tick()?;
        match func {
            Value::Builtin(builtin) => call_builtin(self, builtin, args, kwargs),
            Value::Function(function) => self.call_function(&function, args, kwargs),
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let locals = bind_arguments(function, args, kwargs)?;
        self.frames.push(Frame {
            locals: Scope::new(locals),
            enclosing: function.enclosing.clone(),
            ..Frame::default()
        });
        self.depth += 1;
        let result = self.exec_block(&function.body);
        self.depth -= 1;
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

fn bind_arguments(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<HashMap<String, Value>> {
    let name = &function.name;
    if args.len() > function.params.len() {
        return Err(RuntimeError::type_error(format!(
            "{name}() takes {} positional arguments but {} were given",
            function.params.len(),
            args.len()
        )));
    }
    let mut locals: HashMap<String, Value> = function
        .params
        .iter()
        .zip(args)
        .map(|(param, arg)| (param.name.clone(), arg))
        .collect();
    for (key, value) in kwargs {
        if !function.params.iter().any(|p| p.name == key) {
            return Err(RuntimeError::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
        if locals.contains_key(&key) {
            return Err(RuntimeError::type_error(format!(
                "{name}() got multiple values for argument '{key}'"
            )));
        }
        locals.insert(key, value);
    }
    for param in &function.params {
        if locals.contains_key(&param.name) {
            continue;
        }
        match &param.default {
            Some(default) => {
                locals.insert(param.name.clone(), default.clone());
            }
            None => {
                return Err(RuntimeError::type_error(format!(
                    "{name}() missing required positional argument: '{}'",
                    param.name
                )))
            }
        }
    }
    Ok(locals)
}

fn import(module: &str) -> RunResult<Module> {
    Module::named(module).ok_or_else(|| {
        RuntimeError::new(ErrorKind::ImportError, format!("No module named '{module}'"))
    })
}

/// `current op= rhs`. A list extended with `+=` is changed in place, so
/// every name bound to it sees the new items.
fn augmented(current: Value, op: BinOp, rhs: &Value) -> RunResult<Value> {
    if let (Value::List(list), BinOp::Add) = (&current, op) {
        let extra = rhs.iter_items()?;
        let mut items = list.lock();
        check_len(items.len().saturating_add(extra.len()))?;
        items.extend(extra);
        drop(items);
        return Ok(current);
    }
    current.binary(op, rhs)
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> RunResult<bool> {
    Ok(match op {
        CmpOp::Eq => lhs.py_eq(rhs),
        CmpOp::NotEq => !lhs.py_eq(rhs),
        CmpOp::Lt => lhs.py_cmp(rhs)? == Ordering::Less,
        CmpOp::LtE => lhs.py_cmp(rhs)? != Ordering::Greater,
        CmpOp::Gt => lhs.py_cmp(rhs)? == Ordering::Greater,
        CmpOp::GtE => lhs.py_cmp(rhs)? != Ordering::Less,
        CmpOp::In => rhs.contains(lhs)?,
        CmpOp::NotIn => !rhs.contains(lhs)?,
        CmpOp::Is => is_same(lhs, rhs),
        CmpOp::IsNot => !is_same(lhs, rhs),
    })
}

fn is_same(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => a == b,
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) => a.ptr_eq(b),
        (Value::Dict(a), Value::Dict(b)) => a.ptr_eq(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::parser::{parse_expression, parse_program};
    use super::super::timeout::testing::SteppingClock;
    use super::*;

    fn run(source: &str) -> (HashMap<String, Value>, String) {
        let program = parse_program(source).unwrap();
        let mut globals = HashMap::new();
        let mut output = String::new();
        Interpreter::new(&mut globals, &mut output, None).run(&program).unwrap();
        (globals, output)
    }

    fn run_err(source: &str) -> RuntimeError {
        let program = parse_program(source).unwrap();
        let mut globals = HashMap::new();
        let mut output = String::new();
        Interpreter::new(&mut globals, &mut output, None).run(&program).unwrap_err()
    }

    fn eval_in(globals: &mut HashMap<String, Value>, source: &str) -> Value {
        let expr = parse_expression(source).unwrap();
        let mut output = String::new();
        Interpreter::new(globals, &mut output, None).eval(&expr).unwrap()
    }

    #[test]
    fn solution_function_runs() {
        let (mut globals, _) = run(
            "def solution():\n    money_initial = 23\n    bagels = 5\n    bagel_cost = 3\n    money_spent = bagels * bagel_cost\n    result = money_initial - money_spent\n    return result\n",
        );
        assert_eq!(eval_in(&mut globals, "solution()"), Value::Int(8));
    }

    #[test]
    fn loops_and_mutation() {
        let (globals, _) = run("xs = []\nfor i in range(5):\n    if i % 2 == 0:\n        continue\n    xs.append(i * i)\ntotal = sum(xs)\n");
        assert_eq!(globals["xs"].to_string(), "[1, 9]");
        assert_eq!(globals["total"], Value::Int(10));
    }

    #[test]
    fn nested_subscript_assignment() {
        let (globals, _) = run("grid = [[0, 0], [0, 0]]\ngrid[1][0] = 5\ngrid[1][0] += 2\nd = {}\nd['a'] = 1\n");
        assert_eq!(globals["grid"].to_string(), "[[0, 0], [7, 0]]");
        assert_eq!(globals["d"], Value::dict(vec![(Value::Str("a".into()), Value::Int(1))]));
    }

    #[test]
    fn print_goes_to_buffer() {
        let (_, output) = run("x = 3\nprint('x is', x)\nprint(f'{x * 2:.1f}', end='')\n");
        assert_eq!(output, "x is 3\n6.0");
    }

    #[test]
    fn globals_and_locals() {
        let (globals, _) = run("count = 0\ndef bump(n=1):\n    global count\n    count += n\n    local = 1\nbump()\nbump(n=4)\n");
        assert_eq!(globals["count"], Value::Int(5));
        assert!(!globals.contains_key("local"));
    }

    #[test]
    fn comprehension_variables_do_not_leak() {
        let (globals, _) = run("squares = [i * i for i in range(4) if i > 0]\n");
        assert_eq!(globals["squares"].to_string(), "[1, 4, 9]");
        assert!(!globals.contains_key("i"));
    }

    #[test]
    fn math_imports() {
        let (globals, _) = run("import math\nfrom math import sqrt as root\nx = math.floor(root(17))\n");
        assert_eq!(globals["x"], Value::Int(4));
        assert_eq!(run_err("import numpy\n").kind, ErrorKind::ImportError);
    }

    #[test]
    fn errors_carry_kind_and_line() {
        let err = run_err("x = 1\ny = x / 0\n");
        assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(err.line, Some(2));
        assert_eq!(run_err("print(missing)\n").kind, ErrorKind::NameError);
        assert_eq!(run_err("a, b = [1, 2, 3]\n").kind, ErrorKind::ValueError);
    }

    #[test]
    fn aliases_share_one_list() {
        let (globals, _) = run("a = [1]\nb = a\nb.append(2)\nsize = len(a)\nsame = a is b\nb += [3]\n");
        assert_eq!(globals["size"], Value::Int(2));
        assert_eq!(globals["same"], Value::Bool(true));
        assert_eq!(globals["a"].to_string(), "[1, 2, 3]");
    }

    #[test]
    fn functions_mutate_the_callers_list() {
        let (globals, _) = run("basket = [1]\ndef add(xs):\n    xs.append(5)\nadd(basket)\ntotal = sum(basket)\n");
        assert_eq!(globals["total"], Value::Int(6));
    }

    #[test]
    fn loop_variable_is_the_stored_row() {
        let (globals, _) = run(
            "grid = [[1], [2]]\nfor row in grid:\n    row.append(10)\nprices = {'a': []}\nfor key in prices:\n    prices[key].append(4)\ntotal = sum(sum(r) for r in grid) + prices['a'][0]\n",
        );
        assert_eq!(globals["total"], Value::Int(27));
    }

    #[test]
    fn nested_functions_read_enclosing_locals() {
        let (globals, _) = run(
            "def solution():\n    price = 3\n    def cost(n):\n        return n * price\n    return cost(5)\nresult = solution()\n",
        );
        assert_eq!(globals["result"], Value::Int(15));
    }

    #[test]
    fn nested_functions_see_later_rebinding_and_themselves() {
        let source = "\
def solution():
    def fact(n):
        return 1 if n <= 1 else n * fact(n - 1)
    base = 2
    def scaled(x):
        return x * base
    base = 10
    return scaled(fact(4))

def make(k):
    def add(x):
        return x + k
    return add

def outer():
    n = 1
    def inner():
        n = 5
        return n
    return inner() * 10 + n

a = solution()
b = make(3)(4)
c = outer()
";
        let (globals, _) = run(source);
        assert_eq!(globals["a"], Value::Int(240));
        assert_eq!(globals["b"], Value::Int(7));
        assert_eq!(globals["c"], Value::Int(51));
        assert!(!globals.contains_key("price"));
    }

    #[test]
    fn deadline_stops_infinite_loop() {
        let program = parse_program("while True:\n    pass\n").unwrap();
        let clock = Arc::new(SteppingClock::new(Duration::from_millis(1)));
        let deadline = Deadline::new(clock, Duration::from_millis(50));
        let mut globals = HashMap::new();
        let mut output = String::new();
        let err = Interpreter::new(&mut globals, &mut output, Some(&deadline)).run(&program).unwrap_err();
        assert!(err.is_timeout());
    }
}
