//! Scalar expressions and aggregate definitions.
//!
//! Expressions are evaluated against one row. Semantics follow Cypher:
//!
//! - `NULL` propagates through arithmetic and comparison; `AND`, `OR`, `XOR`
//!   and `NOT` use three-valued logic.
//! - Integer arithmetic is checked. Overflow, division by zero and modulo by
//!   zero are errors rather than wrapped or infinite results. `^` always
//!   produces a float.
//! - `=` between values of different kinds is `false`; ordering comparisons
//!   between different kinds are `NULL`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use trellis_common::types::{PropertyKey, Value};

use super::operators::OperatorError;

/// Upper bound on the length of a list built by `range()`.
const MAX_RANGE_LEN: i64 = 10_000_000;

type EvalResult = Result<Value, OperatorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    StartsWith,
    EndsWith,
    Contains,
    In,
}

impl BinaryOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::And => "AND",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::StartsWith => "STARTS WITH",
            Self::EndsWith => "ENDS WITH",
            Self::Contains => "CONTAINS",
            Self::In => "IN",
        }
    }
}

/// Built-in scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Id,
    Label,
    Lower,
    Upper,
    Trim,
    Size,
    Abs,
    Coalesce,
    ToString,
    ToInteger,
    ToFloat,
    Keys,
    Range,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Substring,
}

impl Function {
    /// Resolves a function name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name.to_ascii_lowercase().as_str() {
            "id" => Self::Id,
            "label" | "type" => Self::Label,
            "lower" | "tolower" => Self::Lower,
            "upper" | "toupper" => Self::Upper,
            "trim" => Self::Trim,
            "size" | "length" => Self::Size,
            "abs" => Self::Abs,
            "coalesce" => Self::Coalesce,
            "tostring" => Self::ToString,
            "tointeger" | "toint" => Self::ToInteger,
            "tofloat" => Self::ToFloat,
            "keys" => Self::Keys,
            "range" => Self::Range,
            "round" => Self::Round,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "sqrt" => Self::Sqrt,
            "substring" => Self::Substring,
            _ => return None,
        };
        Some(f)
    }

    /// Every name [`from_name`](Self::from_name) accepts, for suggestions.
    pub const NAMES: &'static [&'static str] = &[
        "id", "label", "lower", "upper", "trim", "size", "abs", "coalesce", "tostring", "tointeger",
        "tofloat", "keys", "range", "round", "floor", "ceil", "sqrt", "substring",
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Label => "label",
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Trim => "trim",
            Self::Size => "size",
            Self::Abs => "abs",
            Self::Coalesce => "coalesce",
            Self::ToString => "tostring",
            Self::ToInteger => "tointeger",
            Self::ToFloat => "tofloat",
            Self::Keys => "keys",
            Self::Range => "range",
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Sqrt => "sqrt",
            Self::Substring => "substring",
        }
    }

    /// Accepted argument counts, inclusive.
    #[must_use]
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Coalesce => (1, usize::MAX),
            Self::Range => (2, 3),
            Self::Substring => (2, 3),
            _ => (1, 1),
        }
    }
}

/// A bound scalar expression. Variables are already resolved to slots.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(usize),
    Property {
        input: Box<Expr>,
        key: PropertyKey,
    },
    Index {
        input: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull {
        operand: Box<Expr>,
        negated: bool,
    },
    List(Vec<Expr>),
    Map(Vec<(PropertyKey, Expr)>),
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },
    Function {
        func: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    #[must_use]
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn property(input: Expr, key: impl Into<PropertyKey>) -> Self {
        Self::Property {
            input: Box::new(input),
            key: key.into(),
        }
    }

    /// Joins predicates with `AND`; `None` for an empty list.
    #[must_use]
    pub fn conjunction(mut predicates: Vec<Expr>) -> Option<Self> {
        let first = predicates.pop()?;
        Some(
            predicates
                .into_iter()
                .rev()
                .fold(first, |acc, p| Self::binary(BinaryOp::And, p, acc)),
        )
    }

    /// Splits nested `AND`s into their conjuncts.
    #[must_use]
    pub fn into_conjuncts(self) -> Vec<Expr> {
        match self {
            Self::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut out = left.into_conjuncts();
                out.extend(right.into_conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Adds every slot this expression reads to `out`.
    pub fn collect_columns(&self, out: &mut Vec<usize>) {
        match self {
            Self::Literal(_) => {}
            Self::Column(c) => out.push(*c),
            Self::Property { input, .. } => input.collect_columns(out),
            Self::Index { input, index } => {
                input.collect_columns(out);
                index.collect_columns(out);
            }
            Self::Unary { operand, .. } | Self::IsNull { operand, .. } => operand.collect_columns(out),
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::List(items) | Self::Function { args: items, .. } => {
                items.iter().for_each(|e| e.collect_columns(out));
            }
            Self::Map(entries) => entries.iter().for_each(|(_, e)| e.collect_columns(out)),
            Self::Case {
                operand,
                branches,
                default,
            } => {
                if let Some(op) = operand {
                    op.collect_columns(out);
                }
                for (when, then) in branches {
                    when.collect_columns(out);
                    then.collect_columns(out);
                }
                if let Some(d) = default {
                    d.collect_columns(out);
                }
            }
        }
    }

    /// Evaluates against one row.
    ///
    /// # Errors
    ///
    /// Type mismatches, checked-arithmetic failures and bad function
    /// arguments.
    pub fn eval(&self, row: &[Value]) -> EvalResult {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Column(c) => row
                .get(*c)
                .cloned()
                .ok_or_else(|| OperatorError::ColumnNotFound(format!("#{c}"))),
            Self::Property { input, key } => property(&input.eval(row)?, key),
            Self::Index { input, index } => subscript(&input.eval(row)?, &index.eval(row)?),
            Self::Unary { op, operand } => unary(*op, operand.eval(row)?),
            Self::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => logical(*op, left, right, row),
                _ => binary(*op, &left.eval(row)?, &right.eval(row)?),
            },
            Self::IsNull { operand, negated } => Ok(Value::Bool(operand.eval(row)?.is_null() != *negated)),
            Self::List(items) => {
                let values = items.iter().map(|e| e.eval(row)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values.into()))
            }
            Self::Map(entries) => {
                let mut map = BTreeMap::new();
                for (k, e) in entries {
                    map.insert(k.clone(), e.eval(row)?);
                }
                Ok(Value::Map(Arc::new(map)))
            }
            Self::Case {
                operand,
                branches,
                default,
            } => {
                let subject = operand.as_ref().map(|o| o.eval(row)).transpose()?;
                for (when, then) in branches {
                    let test = when.eval(row)?;
                    let hit = match &subject {
                        Some(s) => equals(s, &test) == Some(true),
                        None => truthy(&test)?,
                    };
                    if hit {
                        return then.eval(row);
                    }
                }
                default.as_ref().map_or(Ok(Value::Null), |d| d.eval(row))
            }
            Self::Function { func, args } => {
                if *func == Function::Coalesce {
                    for arg in args {
                        let v = arg.eval(row)?;
                        if !v.is_null() {
                            return Ok(v);
                        }
                    }
                    return Ok(Value::Null);
                }
                let values = args.iter().map(|e| e.eval(row)).collect::<Result<Vec<_>, _>>()?;
                call(*func, &values)
            }
        }
    }

    /// Evaluates a predicate: only `true` passes, `NULL` and `false` do not.
    ///
    /// # Errors
    ///
    /// Evaluation errors, or a non-boolean result.
    pub fn eval_predicate(&self, row: &[Value]) -> Result<bool, OperatorError> {
        truthy(&self.eval(row)?)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Value::String(s)) => write!(f, "'{s}'"),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Column(c) => write!(f, "#{c}"),
            Self::Property { input, key } => write!(f, "{input}.{key}"),
            Self::Index { input, index } => write!(f, "{input}[{index}]"),
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::Pos => write!(f, "+{operand}"),
            },
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::IsNull { operand, negated } => {
                write!(f, "{operand} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Self::List(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Case { .. } => write!(f, "CASE"),
            Self::Function { func, args } => {
                write!(f, "{}(", func.name())?;
                write_joined(f, args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn truthy(value: &Value) -> Result<bool, OperatorError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(OperatorError::type_mismatch("BOOL", other)),
    }
}

fn as_tri(value: &Value) -> Result<Option<bool>, OperatorError> {
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(OperatorError::type_mismatch("BOOL", other)),
    }
}

fn tri(value: Option<bool>) -> Value {
    value.map_or(Value::Null, Value::Bool)
}

/// `AND`/`OR` with short-circuiting on the decisive value.
fn logical(op: BinaryOp, left: &Expr, right: &Expr, row: &[Value]) -> EvalResult {
    let decisive = op == BinaryOp::Or;
    let l = as_tri(&left.eval(row)?)?;
    if l == Some(decisive) {
        return Ok(Value::Bool(decisive));
    }
    let r = as_tri(&right.eval(row)?)?;
    if r == Some(decisive) {
        return Ok(Value::Bool(decisive));
    }
    Ok(match (l, r) {
        (Some(_), Some(_)) => Value::Bool(!decisive),
        _ => Value::Null,
    })
}

fn property(input: &Value, key: &PropertyKey) -> EvalResult {
    let found = match input {
        Value::Null => None,
        Value::Node(n) => n.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()),
        Value::Rel(r) => r.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()),
        Value::Map(m) => m.get(key).cloned(),
        other => return Err(OperatorError::type_mismatch("NODE, REL or MAP", other)),
    };
    Ok(found.unwrap_or(Value::Null))
}

fn subscript(input: &Value, index: &Value) -> EvalResult {
    match (input, index) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::List(items), Value::Int64(i)) => {
            let len = items.len() as i64;
            let pos = if *i < 0 { len + i } else { *i };
            Ok(usize::try_from(pos)
                .ok()
                .and_then(|p| items.get(p))
                .cloned()
                .unwrap_or(Value::Null))
        }
        (Value::List(_), other) => Err(OperatorError::type_mismatch("INT64", other)),
        (Value::Map(_) | Value::Node(_) | Value::Rel(_), Value::String(k)) => {
            property(input, &PropertyKey::new(k.clone()))
        }
        (other, _) => Err(OperatorError::type_mismatch("LIST or MAP", other)),
    }
}

fn unary(op: UnaryOp, value: Value) -> EvalResult {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, v) => Ok(tri(as_tri(&v)?.map(|b| !b))),
        (UnaryOp::Neg, Value::Int64(i)) => i
            .checked_neg()
            .map(Value::Int64)
            .ok_or_else(|| OperatorError::Overflow(format!("-({i}) does not fit in INT64"))),
        (UnaryOp::Neg, Value::Float64(f)) => Ok(Value::Float64(-f)),
        (UnaryOp::Pos, v @ (Value::Int64(_) | Value::Float64(_))) => Ok(v),
        (_, other) => Err(OperatorError::type_mismatch("numeric", &other)),
    }
}

/// Cypher equality: `None` when either side is `NULL` or a list contains
/// an undecidable element.
#[must_use]
pub fn equals(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Int64(x), Value::Int64(y)) => Some(x == y),
        (Value::Int64(_) | Value::Float64(_), Value::Int64(_) | Value::Float64(_)) => {
            Some(a.as_number() == b.as_number())
        }
        (Value::List(x), Value::List(y)) => {
            if x.len() != y.len() {
                return Some(false);
            }
            let mut unknown = false;
            for (l, r) in x.iter().zip(y.iter()) {
                match equals(l, r) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown { None } else { Some(true) }
        }
        (Value::Node(x), Value::Node(y)) => Some(x.id == y.id),
        (Value::Rel(x), Value::Rel(y)) => Some(x.id == y.id),
        _ => Some(a == b),
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`. `None` for `NULL` or mixed kinds.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => Some(x.cmp(y)),
        (Value::Int64(_) | Value::Float64(_), Value::Int64(_) | Value::Float64(_)) => {
            a.as_number()?.partial_cmp(&b.as_number()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::List(_), Value::List(_)) => Some(a.total_cmp(b)),
        _ => None,
    }
}

fn overflow(op: BinaryOp, a: i64, b: i64) -> OperatorError {
    OperatorError::Overflow(format!("{a} {} {b} does not fit in INT64", op.symbol()))
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> EvalResult {
    if let (Value::Int64(x), Value::Int64(y)) = (a, b) {
        let (x, y) = (*x, *y);
        if matches!(op, BinaryOp::Div | BinaryOp::Mod) && y == 0 {
            return Err(OperatorError::Execution(format!(
                "{} by zero",
                if op == BinaryOp::Div { "Division" } else { "Modulo" }
            )));
        }
        let result = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div => x.checked_div(y),
            BinaryOp::Mod => x.checked_rem(y),
            _ => return Ok(Value::Float64((x as f64).powf(y as f64))),
        };
        return result.map(Value::Int64).ok_or_else(|| overflow(op, x, y));
    }
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => Ok(Value::Float64(match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Mod => x % y,
            _ => x.powf(y),
        })),
        (None, _) => Err(OperatorError::type_mismatch("numeric", a)),
        (_, None) => Err(OperatorError::type_mismatch("numeric", b)),
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> EvalResult {
    match op {
        BinaryOp::Xor => {
            let (l, r) = (as_tri(a)?, as_tri(b)?);
            Ok(tri(l.zip(r).map(|(l, r)| l != r)))
        }
        BinaryOp::Eq => Ok(tri(equals(a, b))),
        BinaryOp::Ne => Ok(tri(equals(a, b).map(|e| !e))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Ok(tri(compare(a, b).map(|ord| match op {
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Le => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        }))),
        BinaryOp::In => membership(a, b),
        BinaryOp::And | BinaryOp::Or => Ok(tri(match (as_tri(a)?, as_tri(b)?) {
            (Some(false), _) | (_, Some(false)) if op == BinaryOp::And => Some(false),
            (Some(true), _) | (_, Some(true)) if op == BinaryOp::Or => Some(true),
            (Some(l), Some(r)) => Some(if op == BinaryOp::And { l && r } else { l || r }),
            _ => None,
        })),
        _ if a.is_null() || b.is_null() => Ok(Value::Null),
        BinaryOp::Add => match (a, b) {
            (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{x}{y}").into())),
            (Value::List(x), Value::List(y)) => Ok(Value::List(x.iter().chain(y.iter()).cloned().collect())),
            _ => arithmetic(op, a, b),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => arithmetic(op, a, b),
        BinaryOp::StartsWith | BinaryOp::EndsWith | BinaryOp::Contains => {
            let (Value::String(s), Value::String(p)) = (a, b) else {
                let bad = if matches!(a, Value::String(_)) { b } else { a };
                return Err(OperatorError::type_mismatch("STRING", bad));
            };
            Ok(Value::Bool(match op {
                BinaryOp::StartsWith => s.starts_with(p.as_str()),
                BinaryOp::EndsWith => s.ends_with(p.as_str()),
                _ => s.contains(p.as_str()),
            }))
        }
    }
}

fn membership(needle: &Value, haystack: &Value) -> EvalResult {
    let items = match haystack {
        Value::Null => return Ok(Value::Null),
        Value::List(items) => items,
        other => return Err(OperatorError::type_mismatch("LIST", other)),
    };
    let mut unknown = false;
    for item in items.iter() {
        match equals(needle, item) {
            Some(true) => return Ok(Value::Bool(true)),
            None => unknown = true,
            Some(false) => {}
        }
    }
    Ok(if unknown { Value::Null } else { Value::Bool(false) })
}

fn int_arg(args: &[Value], i: usize) -> Result<Option<i64>, OperatorError> {
    match args.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int64(v)) => Ok(Some(*v)),
        Some(other) => Err(OperatorError::type_mismatch("INT64", other)),
    }
}

fn float_fn(arg: &Value, f: impl Fn(f64) -> f64) -> EvalResult {
    match arg {
        Value::Null => Ok(Value::Null),
        other => other
            .as_number()
            .map(|x| Value::Float64(f(x)))
            .ok_or_else(|| OperatorError::type_mismatch("numeric", other)),
    }
}

fn string_fn(arg: &Value, f: impl Fn(&str) -> String) -> EvalResult {
    match arg {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(f(s).into())),
        other => Err(OperatorError::type_mismatch("STRING", other)),
    }
}

static NULL: Value = Value::Null;

fn call(func: Function, args: &[Value]) -> EvalResult {
    let first = args.first().unwrap_or(&NULL);
    match func {
        Function::Id => match first {
            Value::Null => Ok(Value::Null),
            Value::Node(n) => Ok(Value::Int64(n.id.as_u64() as i64)),
            Value::Rel(r) => Ok(Value::Int64(r.id.as_u64() as i64)),
            other => Err(OperatorError::type_mismatch("NODE or REL", other)),
        },
        Function::Label => match first {
            Value::Null => Ok(Value::Null),
            Value::Node(n) => Ok(Value::String(n.label.clone())),
            Value::Rel(r) => Ok(Value::String(r.label.clone())),
            other => Err(OperatorError::type_mismatch("NODE or REL", other)),
        },
        Function::Lower => string_fn(first, str::to_lowercase),
        Function::Upper => string_fn(first, str::to_uppercase),
        Function::Trim => string_fn(first, |s| s.trim().to_string()),
        Function::Size => match first {
            Value::Null => Ok(Value::Null),
            Value::String(s) => Ok(Value::Int64(s.chars().count() as i64)),
            Value::List(l) => Ok(Value::Int64(l.len() as i64)),
            Value::Map(m) => Ok(Value::Int64(m.len() as i64)),
            other => Err(OperatorError::type_mismatch("STRING or LIST", other)),
        },
        Function::Abs => match first {
            Value::Int64(i) => i
                .checked_abs()
                .map(Value::Int64)
                .ok_or_else(|| OperatorError::Overflow(format!("abs({i}) does not fit in INT64"))),
            other => float_fn(other, f64::abs),
        },
        Function::Coalesce => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
        Function::ToString => match first {
            Value::Null => Ok(Value::Null),
            other => Ok(Value::String(other.to_string().into())),
        },
        Function::ToInteger => Ok(match first {
            Value::Int64(i) => Value::Int64(*i),
            Value::Float64(f) if f.is_finite() && f.trunc().abs() < 9.2e18 => Value::Int64(f.trunc() as i64),
            Value::Bool(b) => Value::Int64(i64::from(*b)),
            Value::String(s) => s.trim().parse::<i64>().map_or(Value::Null, Value::Int64),
            _ => Value::Null,
        }),
        Function::ToFloat => Ok(match first {
            Value::Int64(i) => Value::Float64(*i as f64),
            Value::Float64(f) => Value::Float64(*f),
            Value::String(s) => s.trim().parse::<f64>().map_or(Value::Null, Value::Float64),
            _ => Value::Null,
        }),
        Function::Keys => match first {
            Value::Null => Ok(Value::Null),
            Value::Map(m) => Ok(Value::List(m.keys().map(|k| Value::from(k.as_str())).collect())),
            Value::Node(n) => Ok(Value::List(n.properties.iter().map(|(k, _)| Value::from(k.as_str())).collect())),
            Value::Rel(r) => Ok(Value::List(r.properties.iter().map(|(k, _)| Value::from(k.as_str())).collect())),
            other => Err(OperatorError::type_mismatch("MAP, NODE or REL", other)),
        },
        Function::Range => {
            let (Some(start), Some(end)) = (int_arg(args, 0)?, int_arg(args, 1)?) else {
                return Ok(Value::Null);
            };
            let step = int_arg(args, 2)?.unwrap_or(1);
            if step == 0 {
                return Err(OperatorError::Execution("range() step must not be zero".into()));
            }
            let len = (i128::from(end) - i128::from(start)) / i128::from(step) + 1;
            if len > i128::from(MAX_RANGE_LEN) {
                return Err(OperatorError::Execution(format!(
                    "range() would produce {len} elements, limit is {MAX_RANGE_LEN}"
                )));
            }
            let count = usize::try_from(len.max(0)).unwrap_or(0);
            let items: Vec<Value> = (0..count)
                .map(|k| Value::Int64(start + step * k as i64))
                .collect();
            Ok(Value::List(items.into()))
        }
        Function::Round => float_fn(first, f64::round),
        Function::Floor => float_fn(first, f64::floor),
        Function::Ceil => float_fn(first, f64::ceil),
        Function::Sqrt => float_fn(first, f64::sqrt),
        Function::Substring => {
            let s = match first {
                Value::Null => return Ok(Value::Null),
                Value::String(s) => s,
                other => return Err(OperatorError::type_mismatch("STRING", other)),
            };
            let Some(start) = int_arg(args, 1)? else {
                return Ok(Value::Null);
            };
            let length = int_arg(args, 2)?;
            if start < 0 || length.is_some_and(|l| l < 0) {
                return Err(OperatorError::Execution(
                    "substring() start and length must not be negative".into(),
                ));
            }
            let chars = s.chars().skip(start as usize);
            let out: String = match length {
                Some(l) => chars.take(l as usize).collect(),
                None => chars.collect(),
            };
            Ok(Value::String(out.into()))
        }
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// `count(*)`: rows, nulls included.
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregateFunction {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "collect" => Some(Self::Collect),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CountStar | Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Collect => "collect",
        }
    }
}

/// One aggregate column of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    /// `None` only for `count(*)`.
    pub arg: Option<Expr>,
    pub distinct: bool,
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.function.name())?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        match &self.arg {
            Some(arg) => write!(f, "{arg})"),
            None => write!(f, "*)"),
        }
    }
}
