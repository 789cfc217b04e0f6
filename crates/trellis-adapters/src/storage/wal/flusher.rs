//! Adaptive WAL flusher with self-tuning timing.
//!
//! The flusher keeps a steady fsync cadence by subtracting the duration of
//! the last flush from the next wait:
//!
//! - flush took 20ms of a 100ms target: wait 80ms
//! - flush took 120ms: flush again immediately

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use trellis_common::utils::error::{Error, Result};

use super::WalManager;

/// Statistics tracked by the adaptive flusher.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlusherStats {
    pub flush_count: u64,
    /// Total time spent flushing (microseconds).
    pub total_flush_time_us: u64,
    /// Longest flush seen (microseconds).
    pub max_flush_time_us: u64,
    /// Flushes that took longer than the target interval.
    pub exceeded_target_count: u64,
}

impl FlusherStats {
    /// Returns the average flush duration in microseconds.
    #[must_use]
    pub fn avg_flush_time_us(&self) -> u64 {
        if self.flush_count == 0 {
            0
        } else {
            self.total_flush_time_us / self.flush_count
        }
    }
}

/// Background thread that fsyncs a [`WalManager`] at a target cadence.
///
/// Dropping the flusher shuts it down after one final sync.
pub struct AdaptiveFlusher {
    target_interval: Duration,
    /// Shutdown signal; carries the channel the final stats go back on.
    shutdown_tx: Option<mpsc::Sender<mpsc::Sender<FlusherStats>>>,
    handle: Option<JoinHandle<()>>,
}

impl AdaptiveFlusher {
    /// Starts a flusher syncing roughly every `target_interval_ms`.
    pub fn start(wal: Arc<WalManager>, target_interval_ms: u64) -> Result<Self> {
        let target_interval = Duration::from_millis(target_interval_ms.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("trellis-wal-flusher".to_string())
            .spawn(move || Self::flusher_loop(&wal, target_interval, &shutdown_rx))
            .map_err(Error::Io)?;

        Ok(Self {
            target_interval,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    /// Stops the thread after a final flush and returns its statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread is gone or panicked.
    pub fn shutdown(&mut self) -> Result<FlusherStats> {
        let stats = if let Some(tx) = self.shutdown_tx.take() {
            let (ack_tx, ack_rx) = mpsc::channel();
            tx.send(ack_tx)
                .map_err(|e| Error::Internal(format!("failed to signal WAL flusher: {e}")))?;
            ack_rx
                .recv()
                .map_err(|e| Error::Internal(format!("WAL flusher did not acknowledge shutdown: {e}")))?
        } else {
            FlusherStats::default()
        };

        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| Error::Internal("WAL flusher thread panicked".to_string()))?;
        }

        Ok(stats)
    }

    fn flusher_loop(
        wal: &WalManager,
        target_interval: Duration,
        shutdown_rx: &mpsc::Receiver<mpsc::Sender<FlusherStats>>,
    ) {
        let mut last_flush_duration = Duration::ZERO;
        let mut stats = FlusherStats::default();

        loop {
            let timeout = target_interval.saturating_sub(last_flush_duration);

            match shutdown_rx.recv_timeout(timeout) {
                Ok(ack_tx) => {
                    if let Err(e) = wal.sync() {
                        tracing::warn!("final WAL flush failed: {e}");
                    }
                    let _ = ack_tx.send(stats);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let start = Instant::now();

                    if let Err(e) = wal.sync() {
                        tracing::warn!("WAL flush failed: {e}");
                        // Avoid a spin loop on persistent errors.
                        last_flush_duration = Duration::from_millis(10);
                        continue;
                    }

                    last_flush_duration = start.elapsed();

                    stats.flush_count += 1;
                    let flush_us = u64::try_from(last_flush_duration.as_micros()).unwrap_or(u64::MAX);
                    stats.total_flush_time_us = stats.total_flush_time_us.saturating_add(flush_us);
                    stats.max_flush_time_us = stats.max_flush_time_us.max(flush_us);

                    if last_flush_duration > target_interval {
                        stats.exceeded_target_count += 1;
                        tracing::debug!(
                            "WAL flush took {:?}, exceeds target {:?}",
                            last_flush_duration,
                            target_interval
                        );
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("WAL flusher shutdown channel disconnected");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for AdaptiveFlusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveFlusher")
            .field("target_interval", &self.target_interval())
            .finish()
    }
}

impl Drop for AdaptiveFlusher {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Err(e) = self.shutdown()
        {
            tracing::warn!("error stopping WAL flusher: {e}");
        }
    }
}
