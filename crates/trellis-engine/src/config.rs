//! Database configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use trellis_adapters::storage::DurabilityMode;

/// Default buffer pool: 64 MiB.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64 * 1024 * 1024;

/// Default WAL size that triggers an automatic checkpoint: 16 MiB.
pub const DEFAULT_CHECKPOINT_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Errors from [`Config::validate()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Buffer pool size must be greater than zero.
    ZeroBufferPool,
    /// A session limit, when set, must be greater than zero.
    ZeroMaxSessions,
    /// The adaptive flusher interval must be greater than zero.
    ZeroFlushInterval,
    /// A query timeout, when set, must be greater than zero.
    ZeroQueryTimeout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroBufferPool => write!(f, "buffer_pool_size must be greater than zero"),
            Self::ZeroMaxSessions => write!(f, "max_sessions must be greater than zero"),
            Self::ZeroFlushInterval => {
                write!(f, "adaptive durability target_interval_ms must be greater than zero")
            }
            Self::ZeroQueryTimeout => write!(f, "query_timeout_ms must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Database configuration.
///
/// Serializable so embedders can keep it next to their own settings:
///
/// ```
/// use trellis_engine::Config;
///
/// let config: Config = serde_json::from_str(r#"{"read_only": true}"#).unwrap();
/// assert!(config.read_only);
/// assert_eq!(config.buffer_pool_size, trellis_engine::config::DEFAULT_BUFFER_POOL_SIZE);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database directory; `None` for an in-memory database.
    pub path: Option<PathBuf>,

    /// Memory budget in bytes for blocking operators. Also sizes the
    /// compiled-statement cache.
    pub buffer_pool_size: usize,

    /// Reject writes at execute time.
    pub read_only: bool,

    /// Advisory limit on concurrently open sessions; exceeding it only logs.
    pub max_sessions: Option<usize>,

    /// When WAL records reach stable storage.
    pub durability: DurabilityMode,

    /// WAL size in bytes after which a commit triggers a checkpoint.
    pub checkpoint_threshold: u64,

    /// Per-query time limit in milliseconds.
    pub query_timeout_ms: Option<u64>,

    /// Cache compiled statements by query text.
    pub query_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
            read_only: false,
            max_sessions: None,
            durability: DurabilityMode::default(),
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            query_timeout_ms: None,
            query_cache: true,
        }
    }
}

impl Config {
    /// Creates a new configuration for an in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a new configuration for a persistent database.
    #[must_use]
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_buffer_pool_size(mut self, bytes: usize) -> Self {
        self.buffer_pool_size = bytes;
        self
    }

    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    #[must_use]
    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    #[must_use]
    pub fn with_checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }

    /// Sets the per-query time limit. Sub-millisecond parts are rounded up.
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        let ms = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
        self.query_timeout_ms = Some(u64::try_from(ms).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn without_query_cache(mut self) -> Self {
        self.query_cache = false;
        self
    }

    /// The query time limit, if one is set.
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    ///
    /// Called automatically by [`Database::open`](crate::Database::open).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any setting is invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.buffer_pool_size == 0 {
            return Err(ConfigError::ZeroBufferPool);
        }
        if self.max_sessions == Some(0) {
            return Err(ConfigError::ZeroMaxSessions);
        }
        if let DurabilityMode::Adaptive { target_interval_ms } = self.durability
            && target_interval_ms == 0
        {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if self.query_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroQueryTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.path.is_none());
        assert_eq!(config.buffer_pool_size, DEFAULT_BUFFER_POOL_SIZE);
        assert!(!config.read_only);
        assert_eq!(config.durability, DurabilityMode::Sync);
        assert!(config.query_cache);
        assert!(config.query_timeout().is_none());
    }

    #[test]
    fn test_config_persistent() {
        let config = Config::persistent("/tmp/trellis-db");
        assert_eq!(config.path, Some(PathBuf::from("/tmp/trellis-db")));
    }

    #[test]
    fn test_config_builder_chaining() {
        let config = Config::persistent("/tmp/db")
            .with_buffer_pool_size(1 << 20)
            .with_read_only(true)
            .with_max_sessions(4)
            .with_durability(DurabilityMode::Adaptive { target_interval_ms: 50 })
            .with_checkpoint_threshold(1024)
            .with_query_timeout(Duration::from_millis(1500))
            .without_query_cache();
        assert_eq!(config.buffer_pool_size, 1 << 20);
        assert!(config.read_only);
        assert_eq!(config.max_sessions, Some(4));
        assert_eq!(config.checkpoint_threshold, 1024);
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(1500)));
        assert!(!config.query_cache);
    }

    #[test]
    fn test_query_timeout_rounds_up() {
        let config = Config::in_memory().with_query_timeout(Duration::from_micros(1));
        assert_eq!(config.query_timeout_ms, Some(1));
    }

    #[test]
    fn test_validate_in_memory_config() {
        assert!(Config::in_memory().validate().is_ok());
        assert!(Config::in_memory().with_read_only(true).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_buffer_pool() {
        let config = Config::in_memory().with_buffer_pool_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroBufferPool));
    }

    #[test]
    fn test_validate_rejects_zero_sessions() {
        let config = Config::in_memory().with_max_sessions(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxSessions));
    }

    #[test]
    fn test_validate_rejects_zero_flush_interval() {
        let config = Config::in_memory().with_durability(DurabilityMode::Adaptive { target_interval_ms: 0 });
        assert_eq!(config.validate(), Err(ConfigError::ZeroFlushInterval));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = Config::in_memory().with_query_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueryTimeout));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = Config::persistent("/data/graph")
            .with_durability(DurabilityMode::NoSync)
            .with_query_timeout(Duration::from_secs(2));
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::ZeroBufferPool.to_string(),
            "buffer_pool_size must be greater than zero"
        );
        assert_eq!(
            ConfigError::ZeroQueryTimeout.to_string(),
            "query_timeout_ms must be greater than zero"
        );
    }
}
