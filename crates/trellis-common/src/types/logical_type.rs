//! Column and property types as the catalog and the binder see them.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Value;

/// The static type of a property column or a result column.
///
/// [`LogicalType::Any`] is what the binder reports when it cannot tell
/// (parameters, `coalesce` over mixed inputs, list elements of an empty list).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Any,
    Bool,
    Int64,
    Float64,
    String,
    List(Box<LogicalType>),
    Map,
    Node,
    Rel,
}

impl LogicalType {
    /// Parses a DDL type name such as `INT64`, `DOUBLE` or `STRING[]`.
    ///
    /// Matching is case-insensitive. Returns `None` for unknown names.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        let trimmed = name.trim();
        if let Some(inner) = trimmed.strip_suffix("[]") {
            return Self::from_type_name(inner).map(|t| Self::List(Box::new(t)));
        }
        let ty = match trimmed.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Self::Bool,
            "INT64" | "INT" | "INT32" | "INTEGER" | "SERIAL" => Self::Int64,
            "DOUBLE" | "FLOAT" | "FLOAT64" => Self::Float64,
            "STRING" => Self::String,
            "MAP" => Self::Map,
            _ => return None,
        };
        Some(ty)
    }

    /// Returns true for types a primary key may have.
    #[must_use]
    pub const fn is_key_type(&self) -> bool {
        matches!(self, Self::Int64 | Self::String)
    }

    /// Checks `value` against this type and converts where the engine
    /// allows an implicit cast (integers into `DOUBLE` columns).
    ///
    /// Returns `None` when the value does not fit. `NULL` fits every type.
    #[must_use]
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Self::Any, v) => Some(v),
            (Self::Bool, v @ Value::Bool(_)) => Some(v),
            (Self::Int64, v @ Value::Int64(_)) => Some(v),
            (Self::Float64, v @ Value::Float64(_)) => Some(v),
            (Self::Float64, Value::Int64(i)) => Some(Value::Float64(i as f64)),
            (Self::String, v @ Value::String(_)) => Some(v),
            (Self::Map, v @ Value::Map(_)) => Some(v),
            (Self::List(inner), Value::List(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(inner.coerce(item.clone())?);
                }
                Some(Value::List(out.into()))
            }
            _ => None,
        }
    }

    /// The narrowest type describing both `self` and `other`.
    #[must_use]
    pub fn unify(&self, other: &Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (Self::Int64, Self::Float64) | (Self::Float64, Self::Int64) => Self::Float64,
            _ => Self::Any,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "ANY"),
            Self::Bool => write!(f, "BOOL"),
            Self::Int64 => write!(f, "INT64"),
            Self::Float64 => write!(f, "DOUBLE"),
            Self::String => write!(f, "STRING"),
            Self::List(inner) => write!(f, "{inner}[]"),
            Self::Map => write!(f, "MAP"),
            Self::Node => write!(f, "NODE"),
            Self::Rel => write!(f, "REL"),
        }
    }
}
