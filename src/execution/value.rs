//! Runtime values and the arithmetic/comparison rules between them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use super::ast::{BinOp, Stmt};
use super::builtins::Builtin;
use super::error::{ErrorKind, RunResult, RuntimeError};

/// Longest list, tuple or string a single operation may build.
pub const MAX_SEQUENCE_LEN: usize = 1 << 22;

/// Deepest container nesting that comparison and printing descend into.
const MAX_NESTING: usize = 500;

/// A mutable object seen by every name, item and argument that refers to it.
///
/// Locks are held only for short reads and writes. Anything that compares,
/// prints or calls back into the interpreter works on a [`Shared::snapshot`].
pub struct Shared<T>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Lock unless this thread is already inside; `None` marks a cycle.
    fn reenter(&self) -> Option<MutexGuard<'_, T>> {
        match self.0.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

impl<T: Clone> Shared<T> {
    pub fn snapshot(&self) -> T {
        self.lock().clone()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reenter() {
            Some(inner) => inner.fmt(f),
            None => f.write_str("[...]"),
        }
    }
}

impl<T: Clone + PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.snapshot() == other.snapshot()
    }
}

pub type List = Shared<Vec<Value>>;
/// Insertion-ordered; keys compare with Python equality.
pub type Dict = Shared<Vec<(Value, Value)>>;
/// Local variables of one function call, shared with the functions defined in it.
pub type Scope = Shared<HashMap<String, Value>>;

/// A user-defined function. Defaults are evaluated once, at `def` time.
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// Scopes of the enclosing function calls, innermost last.
    pub enclosing: Vec<Scope>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).field("params", &self.params).finish_non_exhaustive()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Math,
}

impl Module {
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "math" => Some(Self::Math),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Math => "math",
        }
    }
}

/// A program value. Lists and dicts are shared objects: assigning, passing
/// or storing one never copies it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(List),
    Tuple(Vec<Value>),
    Dict(Dict),
    Range { start: i64, stop: i64, step: i64 },
    Function(Arc<Function>),
    Builtin(Builtin),
    Module(Module),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Shared::new(items))
    }

    pub fn dict(entries: Vec<(Value, Value)>) -> Self {
        Self::Dict(Shared::new(entries))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Range { .. } => "range",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Module(_) => "module",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(list) => !list.lock().is_empty(),
            Self::Tuple(v) => !v.is_empty(),
            Self::Dict(d) => !d.lock().is_empty(),
            Self::Range { .. } => range_len(self) > 0,
            Self::Function(_) | Self::Builtin(_) | Self::Module(_) => true,
        }
    }

    /// Numeric view (bools count as 0/1).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view (bools count as 0/1); floats are not integers.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_))
    }

    /// `repr()` text: strings are quoted, everything else matches `str()`.
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => quote(s),
            other => other.to_string(),
        }
    }

    /// Python `==`: numbers compare across int/float/bool.
    pub fn py_eq(&self, other: &Value) -> bool {
        self.eq_at(other, 0)
    }

    fn eq_at(&self, other: &Value, depth: usize) -> bool {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            return a == b;
        }
        if self.is_number() && other.is_number() {
            return self.as_f64() == other.as_f64();
        }
        if depth > MAX_NESTING {
            return false;
        }
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.ptr_eq(b) || seq_eq(&a.snapshot(), &b.snapshot(), depth),
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b, depth),
            (Self::Dict(a), Self::Dict(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| dict_get(&b, k).is_some_and(|other| other.eq_at(v, depth + 1)))
            }
            (Self::Range { .. }, Self::Range { .. }) => self == other,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Module(a), Self::Module(b)) => a == b,
            _ => false,
        }
    }

    /// Python ordering for `<`, `sorted`, `min`, `max`.
    pub fn py_cmp(&self, other: &Value) -> RunResult<Ordering> {
        self.cmp_at(other, 0)
    }

    fn cmp_at(&self, other: &Value, depth: usize) -> RunResult<Ordering> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            return Ok(a.cmp(&b));
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b).ok_or_else(|| {
                RuntimeError::value_error("cannot order NaN")
            });
        }
        if depth > MAX_NESTING {
            return Err(RuntimeError::new(ErrorKind::RecursionError, "maximum recursion depth exceeded in comparison"));
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Ok(a.cmp(b)),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.snapshot(), &b.snapshot(), depth),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b, depth),
            _ => Err(RuntimeError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// `needle in self`.
    pub fn contains(&self, needle: &Value) -> RunResult<bool> {
        match self {
            Self::Str(hay) => match needle {
                Self::Str(n) => Ok(hay.contains(n.as_str())),
                other => Err(RuntimeError::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Self::List(list) => Ok(list.snapshot().iter().any(|v| v.py_eq(needle))),
            Self::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(needle))),
            Self::Dict(d) => {
                check_hashable(needle)?;
                Ok(dict_get(&d.lock(), needle).is_some())
            }
            Self::Range { start, stop, step } => Ok(match needle.as_int() {
                Some(n) => {
                    let (n, start, stop, step) = (i128::from(n), i128::from(*start), i128::from(*stop), i128::from(*step));
                    if step > 0 {
                        n >= start && n < stop && (n - start) % step == 0
                    } else {
                        n <= start && n > stop && (start - n) % (-step) == 0
                    }
                }
                None => false,
            }),
            other => Err(RuntimeError::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    pub fn binary(&self, op: BinOp, rhs: &Value) -> RunResult<Value> {
        if let (Some(a), Some(b)) = (self.as_int(), rhs.as_int()) {
            return int_binary(op, a, b);
        }
        if let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) {
            return float_binary(op, a, b);
        }
        match (op, self, rhs) {
            (BinOp::Add, Self::Str(a), Self::Str(b)) => {
                check_len(a.len().saturating_add(b.len()))?;
                Ok(Self::Str(format!("{a}{b}")))
            }
            (BinOp::Add, Self::List(a), Self::List(b)) => {
                let (a, b) = (a.snapshot(), b.snapshot());
                check_len(a.len().saturating_add(b.len()))?;
                Ok(Self::list(a.into_iter().chain(b).collect()))
            }
            (BinOp::Add, Self::Tuple(a), Self::Tuple(b)) => {
                check_len(a.len().saturating_add(b.len()))?;
                Ok(Self::Tuple(a.iter().chain(b).cloned().collect()))
            }
            (BinOp::Mul, Self::Str(s), n) | (BinOp::Mul, n, Self::Str(s)) if n.as_int().is_some() => {
                let times = repeat_count(s.len(), n)?;
                Ok(Self::Str(s.repeat(times)))
            }
            (BinOp::Mul, Self::List(list), n) | (BinOp::Mul, n, Self::List(list)) if n.as_int().is_some() => {
                let items = list.snapshot();
                let times = repeat_count(items.len(), n)?;
                Ok(Self::list(repeat_items(&items, times)))
            }
            (BinOp::Mul, Self::Tuple(items), n) | (BinOp::Mul, n, Self::Tuple(items)) if n.as_int().is_some() => {
                let times = repeat_count(items.len(), n)?;
                Ok(Self::Tuple(repeat_items(items, times)))
            }
            _ => Err(RuntimeError::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                self.type_name(),
                rhs.type_name()
            ))),
        }
    }

    pub fn negate(&self) -> RunResult<Value> {
        match self {
            Self::Bool(_) | Self::Int(_) => {
                let i = self.as_int().unwrap_or(0);
                Ok(i.checked_neg().map(Self::Int).unwrap_or(Self::Float(-(i as f64))))
            }
            Self::Float(f) => Ok(Self::Float(-f)),
            other => Err(RuntimeError::type_error(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        }
    }

    /// Materialize any iterable into its items.
    pub fn iter_items(&self) -> RunResult<Vec<Value>> {
        match self {
            Self::List(list) => Ok(list.snapshot()),
            Self::Tuple(items) => Ok(items.clone()),
            Self::Str(s) => Ok(s.chars().map(|c| Self::Str(c.to_string())).collect()),
            Self::Dict(d) => Ok(d.lock().iter().map(|(k, _)| k.clone()).collect()),
            Self::Range { start, stop, step } => {
                check_len(range_len(self))?;
                Ok(RangeIter::new(*start, *stop, *step).map(Self::Int).collect())
            }
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    pub fn len(&self) -> RunResult<usize> {
        match self {
            Self::Str(s) => Ok(s.chars().count()),
            Self::List(list) => Ok(list.lock().len()),
            Self::Tuple(v) => Ok(v.len()),
            Self::Dict(d) => Ok(d.lock().len()),
            Self::Range { .. } => Ok(range_len(self)),
            other => Err(RuntimeError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    /// `self[index]` for non-slice indices.
    pub fn get_item(&self, index: &Value) -> RunResult<Value> {
        match self {
            Self::List(list) => {
                let items = list.lock();
                let i = normalize_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Self::Tuple(items) => {
                let i = normalize_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = normalize_index(index, chars.len(), "string")?;
                Ok(Self::Str(chars[i].to_string()))
            }
            Self::Dict(d) => {
                check_hashable(index)?;
                dict_get(&d.lock(), index)
                    .cloned()
                    .ok_or_else(|| RuntimeError::new(ErrorKind::KeyError, index.repr()))
            }
            Self::Range { start, step, .. } => {
                let i = normalize_index(index, range_len(self), "range")?;
                Ok(Self::Int((i128::from(*start) + i128::from(*step) * i as i128) as i64))
            }
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    /// `self[index] = value`. The container is changed for every name that
    /// refers to it.
    pub fn set_item(&self, index: Value, value: Value) -> RunResult<()> {
        match self {
            Self::List(list) => {
                let mut items = list.lock();
                let i = normalize_index(&index, items.len(), "list")?;
                items[i] = value;
                Ok(())
            }
            Self::Dict(d) => {
                check_hashable(&index)?;
                dict_insert(&mut d.lock(), index, value);
                Ok(())
            }
            other => Err(RuntimeError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    pub fn slice(&self, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> RunResult<Value> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(RuntimeError::value_error("slice step cannot be zero"));
        }
        let pick = |len: usize| SliceSpan::new(len, lower, upper, step);
        match self {
            Self::List(list) => {
                let items = list.lock();
                Ok(Self::list(pick(items.len()).positions().map(|i| items[i].clone()).collect()))
            }
            Self::Tuple(items) => Ok(Self::Tuple(pick(items.len()).positions().map(|i| items[i].clone()).collect())),
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Self::Str(pick(chars.len()).positions().map(|i| chars[i]).collect()))
            }
            Self::Range { start, step: stride, .. } => pick(range_len(self)).over_range(*start, *stride),
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    /// Copy with fresh lists and dicts. Two references to one container in
    /// `self` stay two references to one copy. Containers nested deeper than
    /// the comparison limit are shared, not copied.
    pub fn deep_copy(&self, copies: &mut HashMap<usize, Value>) -> Value {
        self.copy_at(copies, 0)
    }

    fn copy_at(&self, copies: &mut HashMap<usize, Value>, depth: usize) -> Value {
        if depth > MAX_NESTING {
            return self.clone();
        }
        match self {
            Self::List(list) => {
                if let Some(copy) = copies.get(&list.addr()) {
                    return copy.clone();
                }
                let fresh = List::default();
                copies.insert(list.addr(), Self::List(fresh.clone()));
                let items: Vec<Value> = list.snapshot().iter().map(|v| v.copy_at(copies, depth + 1)).collect();
                *fresh.lock() = items;
                Self::List(fresh)
            }
            Self::Dict(d) => {
                if let Some(copy) = copies.get(&d.addr()) {
                    return copy.clone();
                }
                let fresh = Dict::default();
                copies.insert(d.addr(), Self::Dict(fresh.clone()));
                let entries: Vec<(Value, Value)> =
                    d.snapshot().iter().map(|(k, v)| (k.clone(), v.copy_at(copies, depth + 1))).collect();
                *fresh.lock() = entries;
                Self::Dict(fresh)
            }
            Self::Tuple(items) => Self::Tuple(items.iter().map(|v| v.copy_at(copies, depth + 1)).collect()),
            other => other.clone(),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        if depth > MAX_NESTING && matches!(self, Self::List(_) | Self::Tuple(_) | Self::Dict(_)) {
            return f.write_str("...");
        }
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => f.write_str(&format_float(*x)),
            Self::Str(s) => f.write_str(s),
            Self::List(list) => match list.reenter() {
                Some(items) => render_seq(f, "[", &items, "]", depth),
                None => f.write_str("[...]"),
            },
            Self::Tuple(items) if items.len() == 1 => {
                f.write_str("(")?;
                items[0].render_repr(f, depth + 1)?;
                f.write_str(",)")
            }
            Self::Tuple(items) => render_seq(f, "(", items, ")", depth),
            Self::Dict(d) => match d.reenter() {
                Some(entries) => {
                    f.write_str("{")?;
                    for (i, (k, v)) in entries.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        k.render_repr(f, depth + 1)?;
                        f.write_str(": ")?;
                        v.render_repr(f, depth + 1)?;
                    }
                    f.write_str("}")
                }
                None => f.write_str("{...}"),
            },
            Self::Range { start, stop, step } if *step == 1 => write!(f, "range({start}, {stop})"),
            Self::Range { start, stop, step } => write!(f, "range({start}, {stop}, {step})"),
            Self::Function(func) => write!(f, "<function {}>", func.name),
            Self::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Self::Module(m) => write!(f, "<module '{}'>", m.name()),
        }
    }

    fn render_repr(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(&quote(s)),
            other => other.render(f, depth),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

fn render_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str, depth: usize) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.render_repr(f, depth + 1)?;
    }
    f.write_str(close)
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_at(y, depth + 1))
}

fn seq_cmp(a: &[Value], b: &[Value], depth: usize) -> RunResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        let ord = x.cmp_at(y, depth + 1)?;
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Float text the way Python's `repr` prints it: `8.0`, `0.1`, `1e-05`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let sci = format!("{x:e}");
        let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exp.abs());
    }
    if x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

fn quote(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Fail with `MemoryError` when a sequence of `len` items would be too large.
pub fn check_len(len: usize) -> RunResult<()> {
    if len > MAX_SEQUENCE_LEN {
        return Err(RuntimeError::new(ErrorKind::MemoryError, format!("sequence of {len} items is too large")));
    }
    Ok(())
}

/// Repetition count for `seq * n`; negative counts give an empty sequence.
fn repeat_count(len: usize, n: &Value) -> RunResult<usize> {
    let times = n.as_int().unwrap_or(0).max(0);
    if len == 0 {
        return Ok(0);
    }
    let times = usize::try_from(times).map_err(|_| {
        RuntimeError::new(ErrorKind::OverflowError, "cannot fit 'int' into an index-sized integer")
    })?;
    check_len(len.saturating_mul(times))?;
    Ok(times)
}

fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

/// Dict keys must be immutable: lists and dicts (also inside tuples) are rejected.
pub fn check_hashable(key: &Value) -> RunResult<()> {
    match key {
        Value::List(_) | Value::Dict(_) => {
            Err(RuntimeError::type_error(format!("unhashable type: '{}'", key.type_name())))
        }
        Value::Tuple(items) => items.iter().try_for_each(check_hashable),
        _ => Ok(()),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> RunResult<Value> {
    // Overflow falls back to float arithmetic instead of wrapping.
    let promoted = || float_binary(op, a as f64, b as f64);
    match op {
        BinOp::Add => a.checked_add(b).map(Value::Int).map_or_else(promoted, Ok),
        BinOp::Sub => a.checked_sub(b).map(Value::Int).map_or_else(promoted, Ok),
        BinOp::Mul => a.checked_mul(b).map(Value::Int).map_or_else(promoted, Ok),
        BinOp::Div => float_binary(op, a as f64, b as f64),
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(RuntimeError::zero_division("integer division or modulo by zero"));
            }
            let Some(q) = a.checked_div(b) else {
                return promoted();
            };
            let r = a.wrapping_rem(b);
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { q - 1 } else { q }))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(RuntimeError::zero_division("integer division or modulo by zero"));
            }
            let r = a.wrapping_rem(b);
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
        }
        BinOp::Pow => {
            if b < 0 {
                return float_binary(op, a as f64, b as f64);
            }
            match u32::try_from(b).ok().and_then(|e| a.checked_pow(e)) {
                Some(v) => Ok(Value::Int(v)),
                None => promoted(),
            }
        }
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> RunResult<Value> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(RuntimeError::zero_division("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(RuntimeError::value_error("negative number cannot be raised to a fractional power"));
            }
            let v = a.powf(b);
            if v.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(RuntimeError::new(ErrorKind::OverflowError, "numerical result out of range"));
            }
            v
        }
    };
    Ok(Value::Float(value))
}

/// Lookup by Python equality. Keys are hashable, so no comparison here locks.
pub fn dict_get<'a>(entries: &'a [(Value, Value)], key: &Value) -> Option<&'a Value> {
    entries.iter().find(|(k, _)| k.py_eq(key)).map(|(_, v)| v)
}

pub fn dict_insert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries.iter_mut().find(|(k, _)| k.py_eq(&key)) {
        Some(slot) => slot.1 = value,
        None => entries.push((key, value)),
    }
}

fn normalize_index(index: &Value, len: usize, what: &str) -> RunResult<usize> {
    let i = index.as_int().ok_or_else(|| {
        RuntimeError::type_error(format!("{what} indices must be integers, not {}", index.type_name()))
    })?;
    let resolved = if i < 0 { i.saturating_add(len as i64) } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::new(ErrorKind::IndexError, format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

/// Positions selected by `[lower:upper:step]` over a sequence of `len`.
struct SliceSpan {
    first: i64,
    count: usize,
    step: i64,
}

impl SliceSpan {
    fn new(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Self {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let resolve = |v: i64| if v < 0 { v.saturating_add(len) } else { v };
        let (first, stop) = if step > 0 {
            (lower.map_or(0, |v| resolve(v).clamp(0, len)), upper.map_or(len, |v| resolve(v).clamp(0, len)))
        } else {
            (
                lower.map_or(len - 1, |v| resolve(v).clamp(-1, len - 1)),
                upper.map_or(-1, |v| resolve(v).clamp(-1, len - 1)),
            )
        };
        let (span, stride) = if step > 0 {
            (i128::from(stop) - i128::from(first), i128::from(step))
        } else {
            (i128::from(first) - i128::from(stop), -i128::from(step))
        };
        let count = if span <= 0 { 0 } else { ((span + stride - 1) / stride) as usize };
        Self { first, count, step }
    }

    fn positions(self) -> impl Iterator<Item = usize> {
        let Self { first, count, step } = self;
        (0..count).map(move |k| (i128::from(first) + k as i128 * i128::from(step)) as usize)
    }

    /// Slicing a range gives a range over the same numbers.
    fn over_range(&self, start: i64, stride: i64) -> RunResult<Value> {
        if self.count == 0 {
            return Ok(Value::Range { start: 0, stop: 0, step: 1 });
        }
        let (start, stride) = (i128::from(start), i128::from(stride));
        let new_start = start + stride * i128::from(self.first);
        let new_step = stride * i128::from(self.step);
        let new_stop = new_start + new_step * self.count as i128;
        let fit = |v: i128| {
            i64::try_from(v).map_err(|_| RuntimeError::new(ErrorKind::OverflowError, "range slice out of bounds"))
        };
        Ok(Value::Range { start: fit(new_start)?, stop: fit(new_stop)?, step: fit(new_step)? })
    }
}

pub fn range_len(value: &Value) -> usize {
    match value {
        Value::Range { start, stop, step } => RangeIter::new(*start, *stop, *step).remaining(),
        _ => 0,
    }
}

/// Iterate any iterable; ranges stay lazy so huge bounds cost nothing up front.
pub fn iterate(value: &Value) -> RunResult<Box<dyn Iterator<Item = Value>>> {
    match value {
        Value::Range { start, stop, step } => Ok(Box::new(RangeIter::new(*start, *stop, *step).map(Value::Int))),
        other => Ok(Box::new(other.iter_items()?.into_iter())),
    }
}

/// Lazy iteration over `range(start, stop, step)`.
#[derive(Debug, Clone)]
pub struct RangeIter {
    next: i64,
    stop: i64,
    step: i64,
}

impl RangeIter {
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        Self { next: start, stop, step }
    }

    fn remaining(&self) -> usize {
        let (span, step) = if self.step > 0 {
            (self.stop as i128 - self.next as i128, self.step as i128)
        } else {
            (self.next as i128 - self.stop as i128, -(self.step as i128))
        };
        if span <= 0 {
            0
        } else {
            usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX)
        }
    }
}

impl Iterator for RangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let live = if self.step > 0 { self.next < self.stop } else { self.next > self.stop };
        if !live {
            return None;
        }
        let current = self.next;
        match self.next.checked_add(self.step) {
            Some(next) => self.next = next,
            None => self.next = self.stop,
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn floor_division_and_modulo_follow_divisor_sign() {
        assert_eq!(Value::Int(-7).binary(BinOp::FloorDiv, &Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(Value::Int(-7).binary(BinOp::Mod, &Value::Int(2)).unwrap(), Value::Int(1));
        assert_eq!(Value::Int(7).binary(BinOp::Mod, &Value::Int(-2)).unwrap(), Value::Int(-1));
    }

    #[test]
    fn true_division_always_yields_float() {
        assert_eq!(Value::Int(6).binary(BinOp::Div, &Value::Int(3)).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn integer_overflow_promotes_to_float() {
        let v = Value::Int(i64::MAX).binary(BinOp::Add, &Value::Int(1)).unwrap();
        assert!(matches!(v, Value::Float(_)));
        let v = Value::Int(i64::MIN).binary(BinOp::FloorDiv, &Value::Int(-1)).unwrap();
        assert_eq!(v, Value::Float(9.223372036854776e18));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let err = Value::Int(1).binary(BinOp::Div, &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
    }

    #[test]
    fn float_display_matches_python() {
        assert_eq!(format_float(8.0), "8.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(2.5e16), "2.5e+16");
    }

    #[test]
    fn numbers_compare_across_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Str("1".into()).py_eq(&Value::Int(1)));
    }

    #[test]
    fn negative_slices() {
        let v = ints(&[1, 2, 3]);
        assert_eq!(v.slice(None, None, Some(-1)).unwrap(), ints(&[3, 2, 1]));
        assert_eq!(v.slice(Some(-2), None, None).unwrap(), ints(&[2, 3]));
        assert_eq!(v.slice(Some(i64::MIN), Some(i64::MAX), Some(i64::MAX)).unwrap(), ints(&[1]));
    }

    #[test]
    fn range_length_and_membership() {
        let r = Value::Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len().unwrap(), 4);
        assert!(r.contains(&Value::Int(9)).unwrap());
        assert!(!r.contains(&Value::Int(10)).unwrap());
        assert!(!r.contains(&Value::Int(i64::MIN)).unwrap());
    }

    #[test]
    fn slicing_a_huge_range_stays_lazy() {
        let r = Value::Range { start: 0, stop: 1 << 40, step: 1 };
        let evens = r.slice(None, None, Some(2)).unwrap();
        assert_eq!(evens, Value::Range { start: 0, stop: 1 << 40, step: 2 });
        assert_eq!(evens.len().unwrap(), 1 << 39);
        assert_eq!(r.iter_items().unwrap_err().kind, ErrorKind::MemoryError);
    }

    #[test]
    fn oversized_repetition_is_a_memory_error() {
        let huge = Value::Int(1 << 62);
        let err = Value::Str("ab".into()).binary(BinOp::Mul, &huge).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);
        let err = ints(&[1, 2, 3, 4, 5]).binary(BinOp::Mul, &huge).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);
        let err = huge.binary(BinOp::Mul, &Value::Tuple(vec![Value::None])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);
        assert_eq!(Value::Str(String::new()).binary(BinOp::Mul, &huge).unwrap(), Value::Str(String::new()));
        assert_eq!(ints(&[7]).binary(BinOp::Mul, &Value::Int(3)).unwrap(), ints(&[7, 7, 7]));
    }

    #[test]
    fn lists_are_shared_between_clones() {
        let a = ints(&[1]);
        let b = a.clone();
        if let Value::List(list) = &b {
            list.lock().push(Value::Int(2));
        }
        assert_eq!(a.len().unwrap(), 2);
        b.set_item(Value::Int(0), Value::Int(9)).unwrap();
        assert_eq!(a.get_item(&Value::Int(0)).unwrap(), Value::Int(9));
    }

    #[test]
    fn cyclic_list_prints_and_compares() {
        let a = ints(&[1]);
        if let Value::List(list) = &a {
            list.lock().push(a.clone());
        }
        assert_eq!(a.to_string(), "[1, [...]]");
        assert!(a.py_eq(&a.clone()));
        assert!(a.contains(&Value::Int(1)).unwrap());
    }

    #[test]
    fn unhashable_keys_are_rejected() {
        let d = Value::dict(Vec::new());
        let err = d.set_item(ints(&[1]), Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        let err = d.get_item(&Value::Tuple(vec![Value::dict(Vec::new())])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        d.set_item(Value::Tuple(vec![Value::Int(1), Value::Int(2)]), Value::Int(3)).unwrap();
        assert_eq!(d.get_item(&Value::Tuple(vec![Value::Int(1), Value::Float(2.0)])).unwrap(), Value::Int(3));
    }

    #[test]
    fn deep_copy_keeps_internal_aliasing() {
        let row = ints(&[0]);
        let grid = Value::list(vec![row.clone(), row]);
        let copy = grid.deep_copy(&mut HashMap::new());
        copy.get_item(&Value::Int(0)).unwrap().set_item(Value::Int(0), Value::Int(5)).unwrap();
        assert_eq!(copy.to_string(), "[[5], [5]]");
        assert_eq!(grid.to_string(), "[[0], [0]]");
    }
}
