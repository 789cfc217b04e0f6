//! Cell values, property keys and the wrappers that make values hashable
//! and totally ordered.
//!
//! [`Value`] is what a query produces in every result cell and what the
//! store keeps per property. Its [`Display`](fmt::Display) impl is the
//! canonical string rendering handed across the embedding boundary, so it
//! must stay total and deterministic.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::{EdgeId, LogicalType, NodeId};

/// An interned property name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyKey(ArcStr);

impl PropertyKey {
    #[must_use]
    pub fn new(s: impl Into<ArcStr>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyKey({:?})", self.0)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for PropertyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A node as it appears in a result cell: identity, table and a copy of the
/// properties visible to the reading snapshot, in schema order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeValue {
    pub id: NodeId,
    pub label: ArcStr,
    pub properties: Vec<(PropertyKey, Value)>,
}

/// A relationship as it appears in a result cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelValue {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub label: ArcStr,
    pub properties: Vec<(PropertyKey, Value)>,
}

/// A dynamically-typed cell value.
///
/// # Examples
///
/// ```
/// use trellis_common::types::Value;
///
/// let name = Value::from("Alice");
/// let age = Value::from(30i64);
///
/// assert_eq!(name.as_str(), Some("Alice"));
/// assert_eq!(age.as_int64(), Some(30));
/// assert_eq!(Value::from(2.0).to_string(), "2.0");
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    /// UTF-8 string (uses ArcStr for cheap cloning)
    String(ArcStr),
    List(Arc<[Value]>),
    /// Key-value map (BTreeMap keeps rendering deterministic)
    Map(Arc<BTreeMap<PropertyKey, Value>>),
    Node(Arc<NodeValue>),
    Rel(Arc<RelValue>),
}

impl Value {
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_float64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the value as a float if it is numeric, promoting integers.
    #[inline]
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<PropertyKey, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_node(&self) -> Option<&NodeValue> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_rel(&self) -> Option<&RelValue> {
        match self {
            Value::Rel(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the type name of this value.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::Int64(_) => "INT64",
            Value::Float64(_) => "DOUBLE",
            Value::String(_) => "STRING",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Node(_) => "NODE",
            Value::Rel(_) => "REL",
        }
    }

    /// The logical type of this particular value; `NULL` maps to `Any`.
    #[must_use]
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Null => LogicalType::Any,
            Value::Bool(_) => LogicalType::Bool,
            Value::Int64(_) => LogicalType::Int64,
            Value::Float64(_) => LogicalType::Float64,
            Value::String(_) => LogicalType::String,
            Value::List(items) => {
                let elem = items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(Value::logical_type)
                    .reduce(|a, b| a.unify(&b))
                    .unwrap_or(LogicalType::Any);
                LogicalType::List(Box::new(elem))
            }
            Value::Map(_) => LogicalType::Map,
            Value::Node(_) => LogicalType::Node,
            Value::Rel(_) => LogicalType::Rel,
        }
    }

    /// Rough number of heap bytes this value pins, used for buffer-pool
    /// accounting. Shared `Arc` payloads are counted in full every time.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let base = std::mem::size_of::<Value>();
        base + match self {
            Value::Null | Value::Bool(_) | Value::Int64(_) | Value::Float64(_) => 0,
            Value::String(s) => s.len(),
            Value::List(items) => items.iter().map(Value::estimated_size).sum(),
            Value::Map(m) => m.iter().map(|(k, v)| k.as_str().len() + v.estimated_size()).sum(),
            Value::Node(n) => properties_size(&n.properties) + n.label.len(),
            Value::Rel(r) => properties_size(&r.properties) + r.label.len(),
        }
    }

    /// Total order used by `ORDER BY`.
    ///
    /// Numbers compare numerically across int/float, `NaN` sorts after every
    /// other number, and values of different kinds are grouped by kind.
    /// `NULL` sorts after everything else.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Int64(_) | Value::Float64(_), Value::Int64(_) | Value::Float64(_)) => {
                let a = OrderedFloat64(self.as_number().unwrap_or(f64::NAN));
                let b = OrderedFloat64(other.as_number().unwrap_or(f64::NAN));
                a.cmp(&b)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Node(a), Value::Node(b)) => a.id.cmp(&b.id),
            (Value::Rel(a), Value::Rel(b)) => a.id.cmp(&b.id),
            (Value::Map(a), Value::Map(b)) => a.len().cmp(&b.len()),
            _ => self.kind_ordinal().cmp(&other.kind_ordinal()),
        }
    }

    const fn kind_ordinal(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int64(_) | Value::Float64(_) => 1,
            Value::String(_) => 2,
            Value::List(_) => 3,
            Value::Map(_) => 4,
            Value::Node(_) => 5,
            Value::Rel(_) => 6,
            Value::Null => 7,
        }
    }
}

fn properties_size(props: &[(PropertyKey, Value)]) -> usize {
    props.iter().map(|(k, v)| k.as_str().len() + v.estimated_size()).sum()
}

/// Writes a float so that it always reads back as a float: integral values
/// keep a trailing `.0` up to the range where `{}` would switch notation.
fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        write!(f, "{value:.1}")
    } else {
        write!(f, "{value}")
    }
}

fn write_properties(f: &mut fmt::Formatter<'_>, props: &[(PropertyKey, Value)]) -> fmt::Result {
    for (key, value) in props {
        write!(f, ", {key}: {value}")?;
    }
    Ok(())
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int64(i) => write!(f, "Int64({i})"),
            Value::Float64(fl) => write!(f, "Float64({fl})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(l) => write!(f, "List({l:?})"),
            Value::Map(m) => write!(f, "Map({m:?})"),
            Value::Node(n) => write!(f, "Node({}:{})", n.label, n.id),
            Value::Rel(r) => write!(f, "Rel({}:{} {}->{})", r.label, r.id, r.src, r.dst),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int64(i) => write!(f, "{i}"),
            Value::Float64(fl) => write_float(f, *fl),
            Value::String(s) => f.write_str(s),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Node(n) => {
                write!(f, "{{_ID: {}, _LABEL: {}", n.id, n.label)?;
                write_properties(f, &n.properties)?;
                write!(f, "}}")
            }
            Value::Rel(r) => {
                write!(f, "({})-{{_ID: {}, _LABEL: {}", r.src, r.id, r.label)?;
                write_properties(f, &r.properties)?;
                write!(f, "}}->({})", r.dst)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int64(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<ArcStr> for Value {
    fn from(s: ArcStr) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

/// A hashable wrapper around [`Value`] for grouping keys, `DISTINCT` and
/// the primary-key index.
///
/// Floats hash and compare by bit pattern, so `NaN` groups with itself.
/// Nodes and relationships compare by identity only.
#[derive(Clone, Debug)]
pub struct HashableValue(pub Value);

impl HashableValue {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn inner(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Value {
        self.0
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Int64(i) => i.hash(state),
        Value::Float64(f) => f.to_bits().hash(state),
        Value::String(s) => s.hash(state),
        Value::List(l) => {
            l.len().hash(state);
            for v in l.iter() {
                hash_value(v, state);
            }
        }
        Value::Map(m) => {
            m.len().hash(state);
            for (k, v) in m.iter() {
                k.hash(state);
                hash_value(v, state);
            }
        }
        Value::Node(n) => n.id.hash(state),
        Value::Rel(r) => r.id.hash(state),
    }
}

fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float64(x), Value::Float64(y)) => x.to_bits() == y.to_bits(),
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| values_identical(p, q))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_identical(v, w)))
        }
        (Value::Node(x), Value::Node(y)) => x.id == y.id,
        (Value::Rel(x), Value::Rel(y)) => x.id == y.id,
        _ => a == b,
    }
}

impl Hash for HashableValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

impl PartialEq for HashableValue {
    fn eq(&self, other: &Self) -> bool {
        values_identical(&self.0, &other.0)
    }
}

impl Eq for HashableValue {}

impl From<Value> for HashableValue {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<HashableValue> for Value {
    fn from(hv: HashableValue) -> Self {
        hv.0
    }
}

/// An orderable wrapper around [`Value`], usable as a `BTreeMap` key.
///
/// Ordering is [`Value::total_cmp`]; equality agrees with it.
#[derive(Clone, Debug)]
pub struct OrderableValue(pub Value);

impl PartialEq for OrderableValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderableValue {}

impl PartialOrd for OrderableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderableValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A wrapper around `f64` that implements `Ord` with total ordering.
///
/// NaN values are treated as greater than all other values (including infinity).
/// Negative zero is considered equal to positive zero.
#[derive(Clone, Copy, Debug)]
pub struct OrderedFloat64(pub f64);

impl PartialEq for OrderedFloat64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedFloat64 {}

impl PartialOrd for OrderedFloat64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat64 {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn node(id: u64, name: &str) -> Value {
        Value::Node(Arc::new(NodeValue {
            id: NodeId::new(id),
            label: "Person".into(),
            properties: vec![(PropertyKey::new("name"), Value::from(name))],
        }))
    }

    #[test]
    fn test_value_type_checks() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int64(42).as_int64(), Some(42));
        assert_eq!(Value::Int64(42).as_bool(), None);
        assert_eq!(Value::Int64(2).as_number(), Some(2.0));
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert_eq!(Value::Float64(1.5).type_name(), "DOUBLE");
    }

    #[test]
    fn test_display_scalars() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Int64(-3).to_string(), "-3");
        assert_eq!(Value::Float64(3.0).to_string(), "3.0");
        assert_eq!(Value::Float64(0.25).to_string(), "0.25");
        assert_eq!(Value::Float64(1e20).to_string(), "100000000000000000000");
        assert_eq!(Value::Float64(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::from("raw text").to_string(), "raw text");
    }

    #[test]
    fn test_display_nested() {
        let list = Value::from(vec![Value::Int64(1), Value::Null, Value::from("a")]);
        assert_eq!(list.to_string(), "[1, NULL, a]");

        let mut map = BTreeMap::new();
        map.insert(PropertyKey::new("b"), Value::Int64(2));
        map.insert(PropertyKey::new("a"), Value::Int64(1));
        assert_eq!(Value::Map(Arc::new(map)).to_string(), "{a: 1, b: 2}");
    }

    #[test]
    fn test_display_graph_values() {
        assert_eq!(node(3, "Alice").to_string(), "{_ID: 3, _LABEL: Person, name: Alice}");

        let rel = Value::Rel(Arc::new(RelValue {
            id: EdgeId::new(5),
            src: NodeId::new(1),
            dst: NodeId::new(2),
            label: "Knows".into(),
            properties: vec![(PropertyKey::new("since"), Value::Int64(2020))],
        }));
        assert_eq!(rel.to_string(), "(1)-{_ID: 5, _LABEL: Knows, since: 2020}->(2)");
    }

    #[test]
    fn test_display_is_deterministic() {
        let v = Value::from(vec![node(1, "Bob"), Value::Float64(2.5)]);
        assert_eq!(v.to_string(), v.to_string());
    }

    #[test]
    fn test_total_cmp() {
        assert_eq!(Value::Int64(1).total_cmp(&Value::Float64(1.5)), Ordering::Less);
        assert_eq!(Value::Float64(2.0).total_cmp(&Value::Int64(2)), Ordering::Equal);
        assert_eq!(Value::Null.total_cmp(&Value::Int64(0)), Ordering::Greater);
        assert_eq!(Value::Float64(f64::NAN).total_cmp(&Value::Float64(f64::INFINITY)), Ordering::Greater);
        assert_eq!(Value::from("a").total_cmp(&Value::from("b")), Ordering::Less);
        assert_eq!(Value::Bool(true).total_cmp(&Value::Int64(0)), Ordering::Less);
    }

    #[test]
    fn test_hashable_value() {
        let mut set = HashSet::new();
        set.insert(HashableValue::new(Value::Float64(f64::NAN)));
        set.insert(HashableValue::new(Value::Float64(f64::NAN)));
        set.insert(HashableValue::new(node(1, "a")));
        set.insert(HashableValue::new(node(1, "renamed")));
        set.insert(HashableValue::new(Value::Int64(1)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_logical_type_of_list() {
        let v = Value::from(vec![Value::Int64(1), Value::Float64(2.0)]);
        assert_eq!(v.logical_type(), LogicalType::List(Box::new(LogicalType::Float64)));
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = Value::from(vec![Value::from("x"), Value::Int64(7)]);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
