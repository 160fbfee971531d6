//! Builtin functions, the `math` module, methods on builtin types and
//! format-spec rendering.

use std::cmp::Ordering;

use super::error::{ErrorKind, RunResult, RuntimeError};
use super::interpreter::Interpreter;
use super::value::{check_hashable, check_len, dict_get, dict_insert, format_float, iterate, Module, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Range,
    Len,
    Sum,
    Min,
    Max,
    Abs,
    Round,
    Int,
    Float,
    Str,
    Bool,
    List,
    Tuple,
    Dict,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Map,
    Filter,
    Divmod,
    Pow,
    Any,
    All,
    Math(MathFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Sqrt,
    Floor,
    Ceil,
    Trunc,
    Pow,
    Fabs,
    Gcd,
    Factorial,
    Comb,
    Log,
    Log10,
    Log2,
    Exp,
    IsClose,
    Prod,
}

const BUILTINS: &[(&str, Builtin)] = &[
    ("print", Builtin::Print),
    ("range", Builtin::Range),
    ("len", Builtin::Len),
    ("sum", Builtin::Sum),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("abs", Builtin::Abs),
    ("round", Builtin::Round),
    ("int", Builtin::Int),
    ("float", Builtin::Float),
    ("str", Builtin::Str),
    ("bool", Builtin::Bool),
    ("list", Builtin::List),
    ("tuple", Builtin::Tuple),
    ("dict", Builtin::Dict),
    ("sorted", Builtin::Sorted),
    ("reversed", Builtin::Reversed),
    ("enumerate", Builtin::Enumerate),
    ("zip", Builtin::Zip),
    ("map", Builtin::Map),
    ("filter", Builtin::Filter),
    ("divmod", Builtin::Divmod),
    ("pow", Builtin::Pow),
    ("any", Builtin::Any),
    ("all", Builtin::All),
];

const MATH_FUNCTIONS: &[(&str, MathFn)] = &[
    ("sqrt", MathFn::Sqrt),
    ("floor", MathFn::Floor),
    ("ceil", MathFn::Ceil),
    ("trunc", MathFn::Trunc),
    ("pow", MathFn::Pow),
    ("fabs", MathFn::Fabs),
    ("gcd", MathFn::Gcd),
    ("factorial", MathFn::Factorial),
    ("comb", MathFn::Comb),
    ("log", MathFn::Log),
    ("log10", MathFn::Log10),
    ("log2", MathFn::Log2),
    ("exp", MathFn::Exp),
    ("isclose", MathFn::IsClose),
    ("prod", MathFn::Prod),
];

pub fn lookup_builtin(name: &str) -> Option<Value> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, b)| Value::Builtin(*b))
}

impl Builtin {
    pub fn name(self) -> &'static str {
        if let Builtin::Math(f) = self {
            return MATH_FUNCTIONS.iter().find(|(_, m)| *m == f).map_or("math", |(n, _)| *n);
        }
        BUILTINS.iter().find(|(_, b)| *b == self).map_or("builtin", |(n, _)| *n)
    }
}

/// Attribute of a module: `math.pi`, `math.sqrt`, ...
pub fn module_attr(module: Module, attr: &str) -> RunResult<Value> {
    match module {
        Module::Math => {
            let constant = match attr {
                "pi" => Some(std::f64::consts::PI),
                "e" => Some(std::f64::consts::E),
                "tau" => Some(std::f64::consts::TAU),
                "inf" => Some(f64::INFINITY),
                "nan" => Some(f64::NAN),
                _ => None,
            };
            if let Some(c) = constant {
                return Ok(Value::Float(c));
            }
            MATH_FUNCTIONS
                .iter()
                .find(|(n, _)| *n == attr)
                .map(|(_, f)| Value::Builtin(Builtin::Math(*f)))
                .ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::AttributeError,
                        format!("module 'math' has no attribute '{attr}'"),
                    )
                })
        }
    }
}

/// Every public name of a module, for `from module import *`.
pub fn module_exports(module: Module) -> Vec<(String, Value)> {
    match module {
        Module::Math => ["pi", "e", "tau", "inf", "nan"]
            .iter()
            .copied()
            .chain(MATH_FUNCTIONS.iter().map(|(n, _)| *n))
            .filter_map(|name| module_attr(module, name).ok().map(|v| (name.to_string(), v)))
            .collect(),
    }
}

// ── Argument helpers ──────────────────────────────────────────────────

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> RunResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { format!("{min}") } else { format!("{min} to {max}") };
        return Err(RuntimeError::type_error(format!(
            "{name}() takes {expected} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn number(name: &str, v: &Value) -> RunResult<f64> {
    v.as_f64().ok_or_else(|| {
        RuntimeError::type_error(format!("{name}() argument must be a number, not '{}'", v.type_name()))
    })
}

fn integer(name: &str, v: &Value) -> RunResult<i64> {
    match v {
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        other => other.as_int().ok_or_else(|| {
            RuntimeError::type_error(format!(
                "{name}() argument must be an integer, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn kwarg<'a>(kwargs: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn reject_kwargs(name: &str, kwargs: &[(String, Value)], allowed: &[&str]) -> RunResult<()> {
    match kwargs.iter().find(|(k, _)| !allowed.contains(&k.as_str())) {
        Some((k, _)) => Err(RuntimeError::type_error(format!(
            "{name}() got an unexpected keyword argument '{k}'"
        ))),
        None => Ok(()),
    }
}

/// Float results that are whole numbers come back as `int` where Python does.
fn int_from_float(name: &str, f: f64) -> RunResult<Value> {
    if !f.is_finite() {
        return Err(RuntimeError::new(
            ErrorKind::OverflowError,
            format!("cannot convert float {} to integer in {name}()", format_float(f)),
        ));
    }
    if f.abs() < 9.2e18 {
        Ok(Value::Int(f as i64))
    } else {
        Ok(Value::Float(f))
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────

pub fn call_builtin(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<Value> {
    let name = builtin.name();
    let allowed: &[&str] = match builtin {
        Builtin::Print => &["sep", "end"],
        Builtin::Sorted => &["key", "reverse"],
        Builtin::Min | Builtin::Max => &["key", "default"],
        Builtin::Sum | Builtin::Enumerate => &["start"],
        Builtin::Round => &["ndigits"],
        Builtin::Math(MathFn::IsClose) => &["rel_tol", "abs_tol"],
        _ => &[],
    };
    if builtin != Builtin::Dict {
        reject_kwargs(name, &kwargs, allowed)?;
    }

    match builtin {
        Builtin::Print => {
            let sep = match kwarg(&kwargs, "sep") {
                Some(Value::Str(s)) => s.clone(),
                _ => " ".to_string(),
            };
            let end = match kwarg(&kwargs, "end") {
                Some(Value::Str(s)) => s.clone(),
                _ => "\n".to_string(),
            };
            let text = args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(&sep);
            interp.write_output(&text);
            interp.write_output(&end);
            Ok(Value::None)
        }
        Builtin::Range => {
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(|a| {
                a.as_int().ok_or_else(|| {
                    RuntimeError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        a.type_name()
                    ))
                })
            });
            let ints = ints.collect::<RunResult<Vec<i64>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            if step == 0 {
                return Err(RuntimeError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        Builtin::Len => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Int(args[0].len()? as i64))
        }
        Builtin::Sum => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().or_else(|| kwarg(&kwargs, "start").cloned()).unwrap_or(Value::Int(0));
            for item in iterate(&args[0])? {
                interp.tick()?;
                total = total.binary(super::ast::BinOp::Add, &item)?;
            }
            Ok(total)
        }
        Builtin::Min | Builtin::Max => {
            let want = if builtin == Builtin::Min { Ordering::Less } else { Ordering::Greater };
            let items = if args.len() == 1 { iterate(&args[0])? } else { Box::new(args.into_iter()) };
            let key = kwarg(&kwargs, "key").cloned();
            let mut best: Option<(Value, Value)> = None;
            for item in items {
                interp.tick()?;
                let rank = match &key {
                    Some(f) => interp.call_value(f.clone(), vec![item.clone()], Vec::new())?,
                    None => item.clone(),
                };
                let replace = match &best {
                    None => true,
                    Some((best_rank, _)) => rank.py_cmp(best_rank)? == want,
                };
                if replace {
                    best = Some((rank, item));
                }
            }
            match (best, kwarg(&kwargs, "default")) {
                (Some((_, item)), _) => Ok(item),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(RuntimeError::value_error(format!("{name}() arg is an empty sequence"))),
            }
        }
        Builtin::Abs => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v => match v.as_int() {
                    Some(i) => Ok(i.checked_abs().map(Value::Int).unwrap_or(Value::Float((i as f64).abs()))),
                    None => Err(RuntimeError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        v.type_name()
                    ))),
                },
            }
        }
        Builtin::Round => {
            arity(name, &args, 1, 2)?;
            let ndigits = args.get(1).or_else(|| kwarg(&kwargs, "ndigits")).filter(|v| **v != Value::None);
            round(&args[0], ndigits)
        }
        Builtin::Int => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Float(f)) => int_from_float(name, f.trunc()),
                Some(Value::Str(s)) => {
                    let cleaned = s.trim().replace('_', "");
                    cleaned.parse::<i64>().map(Value::Int).map_err(|_| {
                        RuntimeError::value_error(format!("invalid literal for int() with base 10: {}", Value::Str(s.clone()).repr()))
                    })
                }
                Some(v) => v.as_int().map(Value::Int).ok_or_else(|| {
                    RuntimeError::type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        Builtin::Float => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float).ok_or_else(|| {
                    RuntimeError::value_error(format!("could not convert string to float: {}", Value::Str(s.clone()).repr()))
                }),
                Some(v) => number(name, v).map(Value::Float),
            }
        }
        Builtin::Str => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(args.first().map(|v| v.to_string()).unwrap_or_default()))
        }
        Builtin::Bool => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        Builtin::List => {
            arity(name, &args, 0, 1)?;
            Ok(Value::list(match args.first() {
                Some(v) => v.iter_items()?,
                None => Vec::new(),
            }))
        }
        Builtin::Tuple => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Tuple(match args.first() {
                Some(v) => v.iter_items()?,
                None => Vec::new(),
            }))
        }
        Builtin::Dict => {
            arity(name, &args, 0, 1)?;
            let mut entries = match args.first() {
                Some(Value::Dict(d)) => d.snapshot(),
                Some(v) => {
                    let mut entries = Vec::new();
                    for pair in v.iter_items()? {
                        match pair.iter_items()?.as_slice() {
                            [k, val] => {
                                check_hashable(k)?;
                                dict_insert(&mut entries, k.clone(), val.clone());
                            }
                            _ => {
                                return Err(RuntimeError::value_error(
                                    "dictionary update sequence element has wrong length",
                                ))
                            }
                        }
                    }
                    entries
                }
                None => Vec::new(),
            };
            for (k, v) in kwargs {
                dict_insert(&mut entries, Value::Str(k), v);
            }
            Ok(Value::dict(entries))
        }
        Builtin::Sorted => {
            arity(name, &args, 1, 1)?;
            let mut items = args[0].iter_items()?;
            let key = kwarg(&kwargs, "key").cloned();
            let reverse = kwarg(&kwargs, "reverse").is_some_and(Value::is_truthy);
            let ranks = match key {
                Some(f) => items
                    .iter()
                    .map(|item| interp.call_value(f.clone(), vec![item.clone()], Vec::new()))
                    .collect::<RunResult<Vec<_>>>()?,
                None => items.clone(),
            };
            let mut order: Vec<usize> = (0..items.len()).collect();
            sort_by_rank(&mut order, &ranks)?;
            if reverse {
                order.reverse();
            }
            let mut taken: Vec<Option<Value>> = items.drain(..).map(Some).collect();
            Ok(Value::list(order.into_iter().filter_map(|i| taken[i].take()).collect()))
        }
        Builtin::Reversed => {
            arity(name, &args, 1, 1)?;
            let mut items = args[0].iter_items()?;
            items.reverse();
            Ok(Value::list(items))
        }
        Builtin::Enumerate => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).or_else(|| kwarg(&kwargs, "start")) {
                Some(v) => integer(name, v)?,
                None => 0,
            };
            let items = args[0].iter_items()?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::Tuple(vec![Value::Int(start.saturating_add(i as i64)), v]))
                    .collect(),
            ))
        }
        Builtin::Zip => {
            let columns = args.iter().map(Value::iter_items).collect::<RunResult<Vec<_>>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        Builtin::Map => {
            if args.len() < 2 {
                return Err(RuntimeError::type_error("map() must have at least two arguments."));
            }
            let mut args = args.into_iter();
            let func = args.next().unwrap_or(Value::None);
            let columns = args.map(|a| a.iter_items()).collect::<RunResult<Vec<_>>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let call_args = columns.iter().map(|c| c[i].clone()).collect();
                out.push(interp.call_value(func.clone(), call_args, Vec::new())?);
            }
            Ok(Value::list(out))
        }
        Builtin::Filter => {
            arity(name, &args, 2, 2)?;
            let mut out = Vec::new();
            for item in iterate(&args[1])? {
                interp.tick()?;
                let keep = match &args[0] {
                    Value::None => item.is_truthy(),
                    f => interp.call_value(f.clone(), vec![item.clone()], Vec::new())?.is_truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            check_len(out.len())?;
            Ok(Value::list(out))
        }
        Builtin::Divmod => {
            arity(name, &args, 2, 2)?;
            let q = args[0].binary(super::ast::BinOp::FloorDiv, &args[1])?;
            let r = args[0].binary(super::ast::BinOp::Mod, &args[1])?;
            Ok(Value::Tuple(vec![q, r]))
        }
        Builtin::Pow => {
            arity(name, &args, 2, 3)?;
            let base = args[0].binary(super::ast::BinOp::Pow, &args[1])?;
            match args.get(2) {
                Some(m) => base.binary(super::ast::BinOp::Mod, m),
                None => Ok(base),
            }
        }
        Builtin::Any | Builtin::All => {
            arity(name, &args, 1, 1)?;
            let want = builtin == Builtin::Any;
            for item in iterate(&args[0])? {
                interp.tick()?;
                if item.is_truthy() == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        Builtin::Math(f) => call_math(f, args, &kwargs),
    }
}

fn sort_by_rank(order: &mut [usize], ranks: &[Value]) -> RunResult<()> {
    // sort_by cannot propagate errors; remember the first one instead.
    let mut failure = None;
    order.sort_by(|&a, &b| match ranks[a].py_cmp(&ranks[b]) {
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn parse_float(s: &str) -> Option<f64> {
    let t = s.trim().replace('_', "");
    match t.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" => Some(f64::NAN),
        _ => t.parse::<f64>().ok(),
    }
}

fn round(value: &Value, ndigits: Option<&Value>) -> RunResult<Value> {
    let Some(nd) = ndigits else {
        return match value {
            Value::Float(f) => int_from_float("round", f.round_ties_even()),
            v => v.as_int().map(Value::Int).ok_or_else(|| {
                RuntimeError::type_error(format!("type {} doesn't define __round__ method", v.type_name()))
            }),
        };
    };
    let nd = integer("round", nd)?;
    match value {
        Value::Float(f) if nd >= 0 => {
            // Decimal formatting rounds the exact binary value, as Python does.
            let text = format!("{:.*}", nd.min(17) as usize, f);
            Ok(Value::Float(text.parse::<f64>().unwrap_or(*f)))
        }
        Value::Float(f) => {
            let factor = 10f64.powi(nd.saturating_neg().min(400) as i32);
            Ok(Value::Float((f / factor).round_ties_even() * factor))
        }
        v => {
            let i = v.as_int().ok_or_else(|| {
                RuntimeError::type_error(format!("type {} doesn't define __round__ method", v.type_name()))
            })?;
            if nd >= 0 {
                return Ok(Value::Int(i));
            }
            let factor = 10f64.powi(nd.saturating_neg().min(400) as i32);
            int_from_float("round", (i as f64 / factor).round_ties_even() * factor)
        }
    }
}

fn call_math(f: MathFn, args: Vec<Value>, kwargs: &[(String, Value)]) -> RunResult<Value> {
    let name = Builtin::Math(f).name();
    let domain = || RuntimeError::value_error("math domain error");
    match f {
        MathFn::Sqrt => {
            arity(name, &args, 1, 1)?;
            let x = number(name, &args[0])?;
            if x < 0.0 {
                return Err(domain());
            }
            Ok(Value::Float(x.sqrt()))
        }
        MathFn::Floor | MathFn::Ceil | MathFn::Trunc => {
            arity(name, &args, 1, 1)?;
            if let Some(i) = args[0].as_int() {
                return Ok(Value::Int(i));
            }
            let x = number(name, &args[0])?;
            let r = match f {
                MathFn::Floor => x.floor(),
                MathFn::Ceil => x.ceil(),
                _ => x.trunc(),
            };
            int_from_float(name, r)
        }
        MathFn::Pow => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Float(number(name, &args[0])?.powf(number(name, &args[1])?)))
        }
        MathFn::Fabs => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Float(number(name, &args[0])?.abs()))
        }
        MathFn::Gcd => {
            let mut acc: u64 = 0;
            for a in &args {
                let mut x = integer(name, a)?.unsigned_abs();
                let mut y = acc;
                while y != 0 {
                    (x, y) = (y, x % y);
                }
                acc = x;
            }
            Ok(i64::try_from(acc).map(Value::Int).unwrap_or(Value::Float(acc as f64)))
        }
        MathFn::Factorial => {
            arity(name, &args, 1, 1)?;
            let n = integer(name, &args[0])?;
            if n < 0 {
                return Err(RuntimeError::value_error("factorial() not defined for negative values"));
            }
            // 171! is past the largest float.
            if n > 170 {
                return Err(RuntimeError::new(ErrorKind::OverflowError, "factorial() result is too large"));
            }
            let mut acc = Value::Int(1);
            for k in 2..=n {
                acc = acc.binary(super::ast::BinOp::Mul, &Value::Int(k))?;
            }
            Ok(acc)
        }
        MathFn::Comb => {
            arity(name, &args, 2, 2)?;
            let (n, k) = (integer(name, &args[0])?, integer(name, &args[1])?);
            if n < 0 || k < 0 {
                return Err(RuntimeError::value_error("comb() arguments must be non-negative"));
            }
            if k > n {
                return Ok(Value::Int(0));
            }
            let k = k.min(n - k);
            let mut acc: i128 = 1;
            for i in 0..k {
                match acc.checked_mul(i128::from(n - i)) {
                    Some(product) => acc = product / i128::from(i + 1),
                    None => return comb_float(n, k),
                }
            }
            Ok(i64::try_from(acc).map(Value::Int).unwrap_or(Value::Float(acc as f64)))
        }
        MathFn::Log => {
            arity(name, &args, 1, 2)?;
            let x = number(name, &args[0])?;
            if x <= 0.0 {
                return Err(domain());
            }
            match args.get(1) {
                Some(base) => Ok(Value::Float(x.ln() / number(name, base)?.ln())),
                None => Ok(Value::Float(x.ln())),
            }
        }
        MathFn::Log10 | MathFn::Log2 => {
            arity(name, &args, 1, 1)?;
            let x = number(name, &args[0])?;
            if x <= 0.0 {
                return Err(domain());
            }
            Ok(Value::Float(if f == MathFn::Log10 { x.log10() } else { x.log2() }))
        }
        MathFn::Exp => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Float(number(name, &args[0])?.exp()))
        }
        MathFn::IsClose => {
            arity(name, &args, 2, 2)?;
            let (a, b) = (number(name, &args[0])?, number(name, &args[1])?);
            let rel = kwarg(kwargs, "rel_tol").and_then(Value::as_f64).unwrap_or(1e-9);
            let abs = kwarg(kwargs, "abs_tol").and_then(Value::as_f64).unwrap_or(0.0);
            let diff = (a - b).abs();
            Ok(Value::Bool(a == b || diff <= (rel * a.abs().max(b.abs())).max(abs)))
        }
        MathFn::Prod => {
            arity(name, &args, 1, 1)?;
            let mut acc = Value::Int(1);
            for item in args[0].iter_items()? {
                acc = acc.binary(super::ast::BinOp::Mul, &item)?;
            }
            Ok(acc)
        }
    }
}

/// `comb(n, k)` past the integer range. With `k <= n / 2` the result is at
/// least `2**k`, so large `k` cannot fit a float either.
fn comb_float(n: i64, k: i64) -> RunResult<Value> {
    if k > 1100 {
        return Err(RuntimeError::new(ErrorKind::OverflowError, "comb() result is too large"));
    }
    let mut acc = 1.0f64;
    for i in 0..k {
        acc = acc * (n - i) as f64 / (i + 1) as f64;
    }
    if acc.is_finite() {
        Ok(Value::Float(acc.round()))
    } else {
        Err(RuntimeError::new(ErrorKind::OverflowError, "comb() result is too large"))
    }
}

// ── Methods ───────────────────────────────────────────────────────────

/// Call `receiver.method(...)`. Mutating methods change the shared list or
/// dict, so every alias sees the update.
pub fn call_method(
    receiver: &Value,
    method: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> RunResult<Value> {
    let no_attr = |v: &Value| {
        RuntimeError::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{method}'", v.type_name()),
        )
    };
    if method != "sort" && method != "format" {
        reject_kwargs(method, &kwargs, &[])?;
    }

    match receiver {
        Value::List(list) => match method {
            "append" => {
                arity(method, &args, 1, 1)?;
                let mut items = list.lock();
                check_len(items.len() + 1)?;
                items.extend(args);
                Ok(Value::None)
            }
            "extend" => {
                arity(method, &args, 1, 1)?;
                // Collect first: `xs.extend(xs)` reads the list being extended.
                let extra = args[0].iter_items()?;
                let mut items = list.lock();
                check_len(items.len().saturating_add(extra.len()))?;
                items.extend(extra);
                Ok(Value::None)
            }
            "insert" => {
                arity(method, &args, 2, 2)?;
                let at = integer(method, &args[0])?;
                let mut items = list.lock();
                check_len(items.len() + 1)?;
                let len = items.len() as i64;
                let at = if at < 0 { at.saturating_add(len) } else { at };
                items.insert(at.clamp(0, len) as usize, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                arity(method, &args, 0, 1)?;
                let at = args.first().map(|v| integer(method, v)).transpose()?;
                let mut items = list.lock();
                if items.is_empty() {
                    return Err(RuntimeError::new(ErrorKind::IndexError, "pop from empty list"));
                }
                let len = items.len() as i64;
                let at = match at {
                    Some(at) if at < 0 => at.saturating_add(len),
                    Some(at) => at,
                    None => len - 1,
                };
                if at < 0 || at >= len {
                    return Err(RuntimeError::new(ErrorKind::IndexError, "pop index out of range"));
                }
                Ok(items.remove(at as usize))
            }
            "remove" => {
                arity(method, &args, 1, 1)?;
                let found = list.snapshot().iter().position(|v| v.py_eq(&args[0]));
                match found {
                    Some(i) => {
                        let mut items = list.lock();
                        if i < items.len() {
                            items.remove(i);
                        }
                        Ok(Value::None)
                    }
                    None => Err(RuntimeError::value_error("list.remove(x): x not in list")),
                }
            }
            "clear" => {
                list.lock().clear();
                Ok(Value::None)
            }
            "reverse" => {
                list.lock().reverse();
                Ok(Value::None)
            }
            "sort" => {
                reject_kwargs(method, &kwargs, &["reverse"])?;
                let items = list.snapshot();
                let mut order: Vec<usize> = (0..items.len()).collect();
                sort_by_rank(&mut order, &items)?;
                if kwarg(&kwargs, "reverse").is_some_and(Value::is_truthy) {
                    order.reverse();
                }
                *list.lock() = order.iter().map(|&i| items[i].clone()).collect();
                Ok(Value::None)
            }
            "index" | "count" => sequence_method(&list.snapshot(), method, &args),
            "copy" => {
                arity(method, &args, 0, 0)?;
                Ok(Value::list(list.snapshot()))
            }
            _ => Err(no_attr(receiver)),
        },
        Value::Tuple(items) => match method {
            "index" | "count" => sequence_method(items, method, &args),
            _ => Err(no_attr(receiver)),
        },
        Value::Dict(dict) => match method {
            "get" => {
                arity(method, &args, 1, 2)?;
                check_hashable(&args[0])?;
                let found = dict_get(&dict.lock(), &args[0]).cloned();
                Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
            }
            "keys" => Ok(Value::list(dict.snapshot().into_iter().map(|(k, _)| k).collect())),
            "values" => Ok(Value::list(dict.snapshot().into_iter().map(|(_, v)| v).collect())),
            "items" => Ok(Value::list(
                dict.snapshot().into_iter().map(|(k, v)| Value::Tuple(vec![k, v])).collect(),
            )),
            "pop" => {
                arity(method, &args, 1, 2)?;
                check_hashable(&args[0])?;
                let mut entries = dict.lock();
                match entries.iter().position(|(k, _)| k.py_eq(&args[0])) {
                    Some(i) => Ok(entries.remove(i).1),
                    None => args
                        .get(1)
                        .cloned()
                        .ok_or_else(|| RuntimeError::new(ErrorKind::KeyError, args[0].repr())),
                }
            }
            "setdefault" => {
                arity(method, &args, 1, 2)?;
                check_hashable(&args[0])?;
                let mut entries = dict.lock();
                if let Some(v) = dict_get(&entries, &args[0]) {
                    return Ok(v.clone());
                }
                let default = args.get(1).cloned().unwrap_or(Value::None);
                dict_insert(&mut entries, args[0].clone(), default.clone());
                Ok(default)
            }
            "update" => {
                arity(method, &args, 1, 1)?;
                match &args[0] {
                    Value::Dict(other) => {
                        let extra = other.snapshot();
                        let mut entries = dict.lock();
                        for (k, v) in extra {
                            dict_insert(&mut entries, k, v);
                        }
                        Ok(Value::None)
                    }
                    other => Err(RuntimeError::type_error(format!(
                        "'{}' object is not a mapping",
                        other.type_name()
                    ))),
                }
            }
            "clear" => {
                dict.lock().clear();
                Ok(Value::None)
            }
            "copy" => Ok(Value::dict(dict.snapshot())),
            _ => Err(no_attr(receiver)),
        },
        Value::Str(s) => string_method(s, method, args, kwargs).unwrap_or_else(|| Err(no_attr(receiver))),
        other => Err(no_attr(other)),
    }
}

fn sequence_method(items: &[Value], method: &str, args: &[Value]) -> RunResult<Value> {
    arity(method, args, 1, 1)?;
    if method == "index" {
        items
            .iter()
            .position(|v| v.py_eq(&args[0]))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| RuntimeError::value_error(format!("{} is not in list", args[0].repr())))
    } else {
        Ok(Value::Int(items.iter().filter(|v| v.py_eq(&args[0])).count() as i64))
    }
}

fn string_method(
    s: &str,
    method: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Option<RunResult<Value>> {
    let str_arg = |i: usize| match args.get(i) {
        Some(Value::Str(a)) => Ok(a.clone()),
        Some(other) => Err(RuntimeError::type_error(format!(
            "must be str, not {}",
            other.type_name()
        ))),
        None => Err(RuntimeError::type_error(format!("{method}() missing required argument"))),
    };
    let result = match method {
        "upper" => Ok(Value::Str(s.to_uppercase())),
        "lower" => Ok(Value::Str(s.to_lowercase())),
        "strip" => Ok(Value::Str(s.trim().to_string())),
        "lstrip" => Ok(Value::Str(s.trim_start().to_string())),
        "rstrip" => Ok(Value::Str(s.trim_end().to_string())),
        "isdigit" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "split" => Ok(Value::list(match args.first() {
            None | Some(Value::None) => s.split_whitespace().map(|p| Value::Str(p.to_string())).collect(),
            Some(_) => match str_arg(0) {
                Ok(sep) if !sep.is_empty() => s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect(),
                Ok(_) => return Some(Err(RuntimeError::value_error("empty separator"))),
                Err(e) => return Some(Err(e)),
            },
        })),
        "join" => args.first().map_or_else(
            || Err(RuntimeError::type_error("join() takes exactly one argument")),
            |iterable| {
                iterable.iter_items().and_then(|items| {
                    items
                        .iter()
                        .map(|v| match v {
                            Value::Str(p) => Ok(p.clone()),
                            other => Err(RuntimeError::type_error(format!(
                                "sequence item: expected str instance, {} found",
                                other.type_name()
                            ))),
                        })
                        .collect::<RunResult<Vec<_>>>()
                        .map(|parts| Value::Str(parts.join(s)))
                })
            },
        ),
        "replace" => str_arg(0).and_then(|from| str_arg(1).map(|to| Value::Str(s.replace(&from, &to)))),
        "startswith" => str_arg(0).map(|p| Value::Bool(s.starts_with(&p))),
        "endswith" => str_arg(0).map(|p| Value::Bool(s.ends_with(&p))),
        "find" => str_arg(0).map(|p| {
            Value::Int(s.find(&p).map_or(-1, |byte| s[..byte].chars().count() as i64))
        }),
        "count" => str_arg(0).map(|p| Value::Int(s.matches(&p).count() as i64)),
        "format" => format_template(s, &args, &kwargs),
        _ => return None,
    };
    Some(result)
}

/// `"{} {name:.2f}".format(...)`.
fn format_template(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> RunResult<Value> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                for ch in chars.by_ref() {
                    if ch == '}' {
                        break;
                    }
                    field.push(ch);
                }
                let (key, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if key.is_empty() {
                    auto_index += 1;
                    args.get(auto_index - 1)
                } else if let Ok(i) = key.parse::<usize>() {
                    args.get(i)
                } else {
                    kwarg(kwargs, key)
                };
                let value = value.ok_or_else(|| {
                    RuntimeError::new(ErrorKind::IndexError, format!("replacement field '{key}' out of range"))
                })?;
                out.push_str(&format_value(value, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(Value::Str(out))
}

/// Render `value` with a format spec: `[[fill]align][sign][0][width][,][.precision][type]`.
pub fn format_value(value: &Value, spec: &str) -> RunResult<String> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let bad_spec = || RuntimeError::value_error(format!("Invalid format specifier '{spec}' for object of type '{}'", value.type_name()));
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;

    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if matches!(chars.first(), Some('<' | '>' | '^')) {
        align = chars.first().copied();
        i = 1;
    }
    let plus = chars.get(i) == Some(&'+');
    if plus || chars.get(i) == Some(&'-') {
        i += 1;
    }
    let zero_pad = chars.get(i) == Some(&'0');
    if zero_pad {
        i += 1;
    }
    let mut width = 0usize;
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        width = width.saturating_mul(10).saturating_add(d as usize);
        i += 1;
    }
    check_len(width)?;
    let grouping = chars.get(i) == Some(&',') || chars.get(i) == Some(&'_');
    let group_char = if chars.get(i) == Some(&'_') { '_' } else { ',' };
    if grouping {
        i += 1;
    }
    let mut precision = None;
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut p = 0usize;
        let start = i;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            p = p.saturating_mul(10).saturating_add(d as usize);
            i += 1;
        }
        if i == start {
            return Err(bad_spec());
        }
        check_len(p)?;
        precision = Some(p);
    }
    let kind = chars.get(i).copied();
    if i + usize::from(kind.is_some()) != chars.len() {
        return Err(bad_spec());
    }

    let numeric = value.is_number();
    let mut body = match (kind, value) {
        (Some('s'), _) | (None, Value::Str(_)) => {
            let s = value.to_string();
            match precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
        (Some('d'), v) => {
            let n = v.as_int().ok_or_else(bad_spec)?;
            n.unsigned_abs().to_string()
        }
        (Some('f' | 'F'), v) => {
            let x = v.as_f64().ok_or_else(bad_spec)?;
            format!("{:.*}", precision.unwrap_or(6), x.abs())
        }
        (Some('%'), v) => {
            let x = v.as_f64().ok_or_else(bad_spec)?;
            format!("{:.*}%", precision.unwrap_or(6), x.abs() * 100.0)
        }
        (Some('e' | 'E'), v) => {
            let x = v.as_f64().ok_or_else(bad_spec)?;
            let sci = format!("{:.*e}", precision.unwrap_or(6), x.abs());
            let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            let text = format!("{mantissa}e{sign}{:02}", exp.abs());
            if kind == Some('E') { text.to_uppercase() } else { text }
        }
        (Some('g') | None, v) if numeric => match (precision, v) {
            (Some(p), _) => general(v.as_f64().unwrap_or(0.0).abs(), p.max(1)),
            (None, Value::Float(x)) => format_float(x.abs()),
            (None, v) => v.as_int().unwrap_or(0).unsigned_abs().to_string(),
        },
        _ => return Err(bad_spec()),
    };

    let negative = numeric && value.as_f64().is_some_and(|x| x < 0.0);
    if grouping && numeric {
        body = group_digits(&body, group_char);
    }
    let sign = if negative {
        "-"
    } else if plus && numeric {
        "+"
    } else {
        ""
    };

    let len = sign.chars().count() + body.chars().count();
    if width <= len {
        return Ok(format!("{sign}{body}"));
    }
    let pad = width - len;
    if zero_pad && align.is_none() && numeric {
        return Ok(format!("{sign}{}{body}", "0".repeat(pad)));
    }
    let text = format!("{sign}{body}");
    let fill_str = |n: usize| fill.to_string().repeat(n);
    Ok(match align.unwrap_or(if numeric { '>' } else { '<' }) {
        '<' => format!("{text}{}", fill_str(pad)),
        '^' => format!("{}{text}{}", fill_str(pad / 2), fill_str(pad - pad / 2)),
        _ => format!("{}{text}", fill_str(pad)),
    })
}

/// `%g`-style: `precision` significant digits, trailing zeros removed.
fn general(x: f64, precision: usize) -> String {
    if x == 0.0 {
        return "0".into();
    }
    let exp = x.log10().floor() as i32;
    if exp < -4 || exp >= precision as i32 {
        let sci = format!("{:.*e}", precision - 1, x);
        let (mantissa, e) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let mantissa = trim_zeros(mantissa);
        let e: i32 = e.parse().unwrap_or(0);
        let sign = if e < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", e.abs());
    }
    let decimals = (precision as i32 - 1 - exp).max(0) as usize;
    trim_zeros(&format!("{x:.decimals$}"))
}

fn trim_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

fn group_digits(body: &str, sep: char) -> String {
    let (int_part, rest) = match body.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => body.split_at(pos),
        None => (body, ""),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(sep);
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}
