//! Opaque handle types, the configuration mirror and JSON parameter parsing.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::Arc;

use parking_lot::Mutex;

use trellis_common::types::PropertyKey;
use trellis_engine::{Config, Database, DurabilityMode, Params, QueryResult, Row, Session, Value};

// ---------------------------------------------------------------------------
// Opaque handle types
// ---------------------------------------------------------------------------

/// Opaque database handle. Created by `trellis_open`, freed by `trellis_free_database`.
pub struct TrellisDatabase {
    pub(crate) inner: Database,
}

/// Opaque session handle. Created by `trellis_connect`, freed by `trellis_free_session`.
pub struct TrellisSession {
    pub(crate) inner: Mutex<Session>,
}

/// Opaque result cursor. Created by `trellis_execute*`, freed by `trellis_free_result`.
pub struct TrellisResult {
    pub(crate) inner: Mutex<QueryResult>,
    /// NUL-terminated copies of the column names, borrowed by callers.
    pub(crate) column_names: Vec<CString>,
}

impl TrellisResult {
    pub(crate) fn new(result: QueryResult) -> Self {
        let column_names = result
            .column_names()
            .iter()
            .map(|name| CString::new(name.replace('\0', "")).unwrap_or_default())
            .collect();
        Self {
            inner: Mutex::new(result),
            column_names,
        }
    }
}

/// Opaque row. Created by `trellis_result_get_next`, freed by `trellis_free_row`.
pub struct TrellisRow {
    pub(crate) inner: Row,
}

/// Opaque cell value. Created by `trellis_row_get_value`, freed by `trellis_free_value`.
pub struct TrellisValue {
    pub(crate) inner: Value,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrellisDurability {
    Sync = 0,
    Adaptive = 1,
    NoSync = 2,
}

/// C mirror of [`Config`]. Zero means "unset" for `max_sessions` and
/// `query_timeout_ms`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrellisConfig {
    pub buffer_pool_size: usize,
    pub read_only: bool,
    pub max_sessions: usize,
    pub durability: TrellisDurability,
    /// Only read when `durability` is `Adaptive`.
    pub adaptive_interval_ms: u64,
    pub checkpoint_threshold: u64,
    pub query_timeout_ms: u64,
    pub query_cache: bool,
}

impl From<&Config> for TrellisConfig {
    fn from(config: &Config) -> Self {
        let (durability, adaptive_interval_ms) = match config.durability {
            DurabilityMode::Sync => (TrellisDurability::Sync, 0),
            DurabilityMode::Adaptive { target_interval_ms } => (TrellisDurability::Adaptive, target_interval_ms),
            DurabilityMode::NoSync => (TrellisDurability::NoSync, 0),
        };
        Self {
            buffer_pool_size: config.buffer_pool_size,
            read_only: config.read_only,
            max_sessions: config.max_sessions.unwrap_or(0),
            durability,
            adaptive_interval_ms,
            checkpoint_threshold: config.checkpoint_threshold,
            query_timeout_ms: config.query_timeout_ms.unwrap_or(0),
            query_cache: config.query_cache,
        }
    }
}

impl From<&TrellisConfig> for Config {
    fn from(c: &TrellisConfig) -> Self {
        Config {
            path: None,
            buffer_pool_size: c.buffer_pool_size,
            read_only: c.read_only,
            max_sessions: (c.max_sessions > 0).then_some(c.max_sessions),
            durability: match c.durability {
                TrellisDurability::Sync => DurabilityMode::Sync,
                TrellisDurability::Adaptive => DurabilityMode::Adaptive {
                    target_interval_ms: c.adaptive_interval_ms,
                },
                TrellisDurability::NoSync => DurabilityMode::NoSync,
            },
            checkpoint_threshold: c.checkpoint_threshold,
            query_timeout_ms: (c.query_timeout_ms > 0).then_some(c.query_timeout_ms),
            query_cache: c.query_cache,
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Runtime type tag of a [`TrellisValue`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrellisValueType {
    Null = 0,
    Bool = 1,
    Int64 = 2,
    Float64 = 3,
    String = 4,
    List = 5,
    Map = 6,
    Node = 7,
    Rel = 8,
}

impl From<&Value> for TrellisValueType {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Int64(_) => Self::Int64,
            Value::Float64(_) => Self::Float64,
            Value::String(_) => Self::String,
            Value::List(_) => Self::List,
            Value::Map(_) => Self::Map,
            Value::Node(_) => Self::Node,
            Value::Rel(_) => Self::Rel,
        }
    }
}

/// Converts a JSON value into a query parameter value.
///
/// Integers that fit in `i64` stay integers; every other number becomes a float.
pub fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map_or(Value::Null, Value::Float64),
        },
        serde_json::Value::String(s) => Value::String(s.as_str().into()),
        serde_json::Value::Array(arr) => {
            let items: Vec<Value> = arr.iter().map(json_to_value).collect();
            Value::List(items.into())
        }
        serde_json::Value::Object(obj) => {
            let map: BTreeMap<PropertyKey, Value> = obj
                .iter()
                .map(|(k, v)| (PropertyKey::new(k.as_str()), json_to_value(v)))
                .collect();
            Value::Map(Arc::new(map))
        }
    }
}

/// Parses a JSON object into query parameters.
pub fn parse_params(json: &str) -> Result<Params, String> {
    let parsed: serde_json::Value = serde_json::from_str(json).map_err(|e| format!("invalid params JSON: {e}"))?;
    let serde_json::Value::Object(obj) = parsed else {
        return Err("params must be a JSON object".to_string());
    };
    Ok(obj.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_mirror_keeps_settings() {
        let config = Config::default()
            .with_max_sessions(4)
            .with_durability(DurabilityMode::Adaptive { target_interval_ms: 25 })
            .with_query_timeout(std::time::Duration::from_millis(300));
        let mirror = TrellisConfig::from(&config);
        assert_eq!(mirror.max_sessions, 4);
        assert_eq!(mirror.durability, TrellisDurability::Adaptive);
        assert_eq!(mirror.adaptive_interval_ms, 25);

        let back = Config::from(&mirror);
        assert_eq!(back.max_sessions, Some(4));
        assert_eq!(back.query_timeout_ms, Some(300));
        assert_eq!(back.durability, DurabilityMode::Adaptive { target_interval_ms: 25 });
        assert_eq!(back.buffer_pool_size, config.buffer_pool_size);
    }

    #[test]
    fn test_zero_means_unset() {
        let mut mirror = TrellisConfig::from(&Config::default());
        mirror.max_sessions = 0;
        mirror.query_timeout_ms = 0;
        let config = Config::from(&mirror);
        assert_eq!(config.max_sessions, None);
        assert_eq!(config.query_timeout_ms, None);
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params(r#"{"name": "Ann", "age": 30, "score": 1.5, "tags": ["a"], "x": null}"#).unwrap();
        assert_eq!(params["name"], Value::from("Ann"));
        assert_eq!(params["age"], Value::Int64(30));
        assert_eq!(params["score"], Value::Float64(1.5));
        assert_eq!(params["tags"].to_string(), "[a]");
        assert!(params["x"].is_null());
    }

    #[test]
    fn test_params_must_be_an_object() {
        assert!(parse_params("[1, 2]").unwrap_err().contains("JSON object"));
        assert!(parse_params("{").unwrap_err().starts_with("invalid params JSON"));
    }
}
