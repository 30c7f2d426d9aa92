//! Tree-walking evaluator.

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;

use super::parser::{BinaryOp, CompareOp, Expr, UnaryOp};
use super::value::{Number, Value};
use super::ExprError;

pub(crate) type Scope = HashMap<String, Value>;

/// Longest string, in bytes, that repetition may produce.
const MAX_STR_LEN: usize = 1 << 24;

pub(crate) fn eval(expr: &Expr, scope: &Scope) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownName(name.clone())),
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval(item, scope))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Unary(op, operand) => unary(*op, eval(operand, scope)?),
        Expr::Binary(op, left, right) => binary(*op, eval(left, scope)?, eval(right, scope)?),
        Expr::Compare(first, rest) => {
            let mut left = eval(first, scope)?;
            for (op, right_expr) in rest {
                let right = eval(right_expr, scope)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(left, right) => {
            let left = eval(left, scope)?;
            if !left.is_truthy() {
                return Ok(left);
            }
            eval(right, scope)
        }
        Expr::Or(left, right) => {
            let left = eval(left, scope)?;
            if left.is_truthy() {
                return Ok(left);
            }
            eval(right, scope)
        }
        Expr::IfElse {
            condition,
            then,
            otherwise,
        } => {
            if eval(condition, scope)?.is_truthy() {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Call { func, args, kwargs } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            let kwargs = kwargs
                .iter()
                .map(|(name, arg)| -> Result<(String, Value), ExprError> {
                    Ok((name.clone(), eval(arg, scope)?))
                })
                .collect::<Result<Vec<_>, _>>()?;

            match func.as_ref() {
                Expr::Attribute(target, method) => {
                    let target = eval(target, scope)?;
                    call_method(&target, method, args, kwargs)
                }
                Expr::Name(name) => call_builtin(name, args, kwargs),
                _ => Err(ExprError::TypeError("object is not callable".to_string())),
            }
        }
        Expr::Attribute(target, name) => {
            let target = eval(target, scope)?;
            Err(ExprError::TypeError(format!(
                "'{}' attribute '{}' can only be called",
                target.type_name(),
                name
            )))
        }
        Expr::Index(target, index) => index_value(&eval(target, scope)?, &eval(index, scope)?),
        Expr::Slice { target, start, end } => {
            let target = eval(target, scope)?;
            let start = match start {
                Some(e) => Some(expect_int(&eval(e, scope)?, "slice index")?),
                None => None,
            };
            let end = match end {
                Some(e) => Some(expect_int(&eval(e, scope)?, "slice index")?),
                None => None,
            };
            slice_value(&target, start, end)
        }
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, ExprError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Pos => match operand.as_number() {
            Some(Number::Int(i)) => Ok(Value::Int(i)),
            Some(Number::Float(f)) => Ok(Value::Float(f)),
            None => Err(bad_operand("unary +", &operand, None)),
        },
        UnaryOp::Neg => match operand.as_number() {
            Some(Number::Int(i)) => i.checked_neg().map(Value::Int).ok_or(ExprError::Overflow),
            Some(Number::Float(f)) => Ok(Value::Float(-f)),
            None => Err(bad_operand("unary -", &operand, None)),
        },
    }
}

fn bad_operand(op: &str, left: &Value, right: Option<&Value>) -> ExprError {
    match right {
        Some(right) => ExprError::TypeError(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            left.type_name(),
            right.type_name()
        )),
        None => ExprError::TypeError(format!(
            "bad operand type for {}: '{}'",
            op,
            left.type_name()
        )),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    match (op, &left, &right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinaryOp::Mul, Value::Str(s), other) | (BinaryOp::Mul, other, Value::Str(s)) => {
            if let Some(Number::Int(n)) = other.as_number() {
                let count = usize::try_from(n.max(0)).map_err(|_| ExprError::Overflow)?;
                s.len()
                    .checked_mul(count)
                    .filter(|len| *len <= MAX_STR_LEN)
                    .ok_or(ExprError::Overflow)?;
                return Ok(Value::Str(s.repeat(count)));
            }
        }
        _ => {}
    }

    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::FloorDiv => "//",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
    };
    let (a, b) = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(bad_operand(symbol, &left, Some(&right))),
    };

    match (a, b) {
        (Number::Int(x), Number::Int(y)) => int_binary(op, x, y),
        _ => float_binary(op, a.as_f64(), b.as_f64()),
    }
}

fn int_binary(op: BinaryOp, x: i64, y: i64) -> Result<Value, ExprError> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or(ExprError::Overflow);
    match op {
        BinaryOp::Add => checked(x.checked_add(y)),
        BinaryOp::Sub => checked(x.checked_sub(y)),
        BinaryOp::Mul => checked(x.checked_mul(y)),
        BinaryOp::Div => float_binary(op, x as f64, y as f64),
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(ExprError::ZeroDivision);
            }
            let q = x.checked_div(y).ok_or(ExprError::Overflow)?;
            let floored = if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q };
            Ok(Value::Int(floored))
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(ExprError::ZeroDivision);
            }
            let r = x.checked_rem(y).ok_or(ExprError::Overflow)?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        BinaryOp::Pow => {
            if y < 0 {
                return float_binary(op, x as f64, y as f64);
            }
            let exp = u32::try_from(y).map_err(|_| ExprError::Overflow)?;
            checked(x.checked_pow(exp))
        }
    }
}

fn float_binary(op: BinaryOp, x: f64, y: f64) -> Result<Value, ExprError> {
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(ExprError::ZeroDivision);
            }
            x / y
        }
        BinaryOp::FloorDiv => {
            if y == 0.0 {
                return Err(ExprError::ZeroDivision);
            }
            (x / y).floor()
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(ExprError::ZeroDivision);
            }
            x - y * (x / y).floor()
        }
        BinaryOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(ExprError::ZeroDivision);
            }
            x.powf(y)
        }
    };
    Ok(Value::Float(result))
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    Ok(match op {
        CompareOp::Eq => left.py_eq(right),
        CompareOp::Ne => !left.py_eq(right),
        CompareOp::Lt => left.py_cmp(right)? == Ordering::Less,
        CompareOp::Le => left.py_cmp(right)? != Ordering::Greater,
        CompareOp::Gt => left.py_cmp(right)? == Ordering::Greater,
        CompareOp::Ge => left.py_cmp(right)? != Ordering::Less,
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
        CompareOp::Is => left == right,
        CompareOp::IsNot => left != right,
    })
}

fn contains(container: &Value, needle: &Value) -> Result<bool, ExprError> {
    match (container, needle) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Str(_), other) => Err(ExprError::TypeError(format!(
            "'in <string>' requires string as left operand, not {}",
            other.type_name()
        ))),
        (Value::List(items), needle) => Ok(items.iter().any(|item| item.py_eq(needle))),
        (Value::Dict(entries), Value::Str(key)) => Ok(entries.contains_key(key)),
        (Value::Dict(_), _) => Ok(false),
        (other, _) => Err(ExprError::TypeError(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn expect_int(value: &Value, what: &str) -> Result<i64, ExprError> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(i),
        _ => Err(ExprError::TypeError(format!(
            "{} must be an integer, not '{}'",
            what,
            value.type_name()
        ))),
    }
}

fn expect_str<'a>(value: &'a Value, what: &str) -> Result<&'a str, ExprError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ExprError::TypeError(format!(
            "{} must be str, not '{}'",
            what,
            other.type_name()
        ))),
    }
}

/// Resolve a possibly negative index against a sequence length.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

fn clamp_bound(bound: Option<i64>, len: usize, default: usize) -> usize {
    match bound {
        None => default,
        Some(b) => {
            let len_i = i64::try_from(len).unwrap_or(i64::MAX);
            let b = if b < 0 { (b + len_i).max(0) } else { b.min(len_i) };
            usize::try_from(b).unwrap_or(0)
        }
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, ExprError> {
    match target {
        Value::Dict(entries) => {
            let key = expect_str(index, "dict key")?;
            entries
                .get(key)
                .cloned()
                .ok_or_else(|| ExprError::KeyError(key.to_string()))
        }
        Value::List(items) => {
            let i = expect_int(index, "list index")?;
            resolve_index(i, items.len())
                .map(|idx| items[idx].clone())
                .ok_or(ExprError::IndexError(i))
        }
        Value::Str(s) => {
            let i = expect_int(index, "string index")?;
            let chars: Vec<char> = s.chars().collect();
            resolve_index(i, chars.len())
                .map(|idx| Value::Str(chars[idx].to_string()))
                .ok_or(ExprError::IndexError(i))
        }
        other => Err(ExprError::TypeError(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn slice_value(target: &Value, start: Option<i64>, end: Option<i64>) -> Result<Value, ExprError> {
    match target {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let from = clamp_bound(start, chars.len(), 0);
            let to = clamp_bound(end, chars.len(), chars.len());
            Ok(Value::Str(if from < to {
                chars[from..to].iter().collect()
            } else {
                String::new()
            }))
        }
        Value::List(items) => {
            let from = clamp_bound(start, items.len(), 0);
            let to = clamp_bound(end, items.len(), items.len());
            Ok(Value::List(if from < to {
                items[from..to].to_vec()
            } else {
                Vec::new()
            }))
        }
        other => Err(ExprError::TypeError(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExprError> {
    if args.len() < min || args.len() > max {
        return Err(ExprError::TypeError(format!(
            "{}() takes {} argument(s) ({} given)",
            name,
            if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            },
            args.len()
        )));
    }
    Ok(())
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> Result<(), ExprError> {
    match kwargs.first() {
        Some((key, _)) => Err(ExprError::TypeError(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, key
        ))),
        None => Ok(()),
    }
}

fn parse_int(s: &str) -> Result<i64, ExprError> {
    s.trim()
        .replace('_', "")
        .parse()
        .map_err(|_| ExprError::ValueError(format!("invalid literal for int(): '{}'", s)))
}

fn parse_float(s: &str) -> Result<f64, ExprError> {
    let trimmed = s.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" | "+nan" | "-nan" => return Ok(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => return Ok(f64::INFINITY),
        "-inf" | "-infinity" => return Ok(f64::NEG_INFINITY),
        _ => {}
    }
    trimmed
        .replace('_', "")
        .parse()
        .map_err(|_| ExprError::ValueError(format!("could not convert string to float: '{}'", s)))
}

fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

fn extremum(name: &str, args: Vec<Value>, want: Ordering) -> Result<Value, ExprError> {
    let items = match args.len() {
        0 => return Err(ExprError::TypeError(format!("{}() expected at least 1 argument", name))),
        1 => match args.into_iter().next() {
            Some(Value::List(items)) => items,
            Some(other) => {
                return Err(ExprError::TypeError(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
            None => Vec::new(),
        },
        _ => args,
    };

    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| ExprError::ValueError(format!("{}() arg is an empty sequence", name)))?;
    for item in iter {
        if item.py_cmp(&best)? == want {
            best = item;
        }
    }
    Ok(best)
}

fn call_builtin(name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value, ExprError> {
    no_kwargs(name, &kwargs)?;

    match name {
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(args.first().map(Value::to_py_string).unwrap_or_default()))
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => parse_int(s).map(Value::Int),
                Some(Value::Float(f)) => {
                    if f.is_finite() {
                        Ok(Value::Int(f.trunc() as i64))
                    } else {
                        Err(ExprError::ValueError(format!(
                            "cannot convert float {} to integer",
                            f
                        )))
                    }
                }
                Some(other) => match other.as_number() {
                    Some(Number::Int(i)) => Ok(Value::Int(i)),
                    _ => Err(bad_operand("int()", other, None)),
                },
            }
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(other) => other
                    .as_number()
                    .map(|n| Value::Float(n.as_f64()))
                    .ok_or_else(|| bad_operand("float()", other, None)),
            }
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        "len" => {
            arity(name, &args, 1, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Dict(entries) => entries.len(),
                other => {
                    return Err(ExprError::TypeError(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(i64::try_from(len).map_err(|_| ExprError::Overflow)?))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match args[0].as_number() {
                Some(Number::Int(i)) => i.checked_abs().map(Value::Int).ok_or(ExprError::Overflow),
                Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                None => Err(bad_operand("abs()", &args[0], None)),
            }
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            let x = args[0]
                .as_number()
                .ok_or_else(|| bad_operand("round()", &args[0], None))?;
            match args.get(1) {
                None | Some(Value::None) => match x {
                    Number::Int(i) => Ok(Value::Int(i)),
                    Number::Float(f) if f.is_finite() => Ok(Value::Int(round_half_even(f) as i64)),
                    Number::Float(f) => Err(ExprError::ValueError(format!(
                        "cannot convert float {} to integer",
                        f
                    ))),
                },
                Some(digits) => {
                    let digits = expect_int(digits, "round() ndigits")?;
                    match x {
                        Number::Int(i) if digits >= 0 => Ok(Value::Int(i)),
                        _ => {
                            let exp = i32::try_from(digits).map_err(|_| ExprError::Overflow)?;
                            let scale = 10f64.powi(exp);
                            Ok(Value::Float(round_half_even(x.as_f64() * scale) / scale))
                        }
                    }
                }
            }
        }
        "min" => extremum(name, args, Ordering::Less),
        "max" => extremum(name, args, Ordering::Greater),
        "sum" => {
            arity(name, &args, 1, 1)?;
            let Value::List(items) = &args[0] else {
                return Err(ExprError::TypeError(format!(
                    "'{}' object is not iterable",
                    args[0].type_name()
                )));
            };
            items
                .iter()
                .try_fold(Value::Int(0), |acc, item| binary(BinaryOp::Add, acc, item.clone()))
        }
        other => Err(ExprError::UnknownName(other.to_string())),
    }
}

fn call_method(
    target: &Value,
    method: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, ExprError> {
    no_kwargs(method, &kwargs)?;

    match target {
        Value::Str(s) => str_method(s, method, &args),
        Value::Dict(entries) => dict_method(entries, method, &args),
        other => Err(ExprError::TypeError(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            method
        ))),
    }
}

fn str_method(s: &str, method: &str, args: &[Value]) -> Result<Value, ExprError> {
    let strip_chars = |args: &[Value]| -> Result<Option<Vec<char>>, ExprError> {
        match args.first() {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(expect_str(v, "strip chars")?.chars().collect())),
        }
    };

    match method {
        "lower" => {
            arity(method, args, 0, 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "upper" => {
            arity(method, args, 0, 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(method, args, 0, 1)?;
            let chars = strip_chars(args)?;
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let out = match method {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::Str(out.to_string()))
        }
        "startswith" => {
            arity(method, args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(expect_str(&args[0], "prefix")?)))
        }
        "endswith" => {
            arity(method, args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(expect_str(&args[0], "suffix")?)))
        }
        "replace" => {
            arity(method, args, 2, 2)?;
            let from = expect_str(&args[0], "old")?;
            let to = expect_str(&args[1], "new")?;
            Ok(Value::Str(s.replace(from, to)))
        }
        "split" => {
            arity(method, args, 0, 1)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::from).collect(),
                Some(sep) => {
                    let sep = expect_str(sep, "separator")?;
                    if sep.is_empty() {
                        return Err(ExprError::ValueError("empty separator".to_string()));
                    }
                    s.split(sep).map(Value::from).collect()
                }
            };
            Ok(Value::List(parts))
        }
        "join" => {
            arity(method, args, 1, 1)?;
            let Value::List(items) = &args[0] else {
                return Err(ExprError::TypeError("can only join a list".to_string()));
            };
            let parts = items
                .iter()
                .map(|item| expect_str(item, "sequence item").map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Str(parts.join(s)))
        }
        "count" => {
            arity(method, args, 1, 1)?;
            let needle = expect_str(&args[0], "substring")?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(i64::try_from(count).map_err(|_| ExprError::Overflow)?))
        }
        "find" => {
            arity(method, args, 1, 1)?;
            let needle = expect_str(&args[0], "substring")?;
            let found = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(found))
        }
        "isdigit" => {
            arity(method, args, 0, 0)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }
        other => Err(ExprError::TypeError(format!(
            "'str' object has no attribute '{}'",
            other
        ))),
    }
}

fn dict_method(entries: &IndexMap<String, Value>, method: &str, args: &[Value]) -> Result<Value, ExprError> {
    match method {
        "get" => {
            arity(method, args, 1, 2)?;
            let key = expect_str(&args[0], "dict key")?;
            Ok(entries
                .get(key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" => {
            arity(method, args, 0, 0)?;
            Ok(Value::List(entries.keys().map(|k| Value::Str(k.clone())).collect()))
        }
        "values" => {
            arity(method, args, 0, 0)?;
            Ok(Value::List(entries.values().cloned().collect()))
        }
        other => Err(ExprError::TypeError(format!(
            "'dict' object has no attribute '{}'",
            other
        ))),
    }
}
