//! The buffer pool budget.
//!
//! One [`BufferPool`] exists per open store. Operators that must hold many
//! rows at once (sort, aggregation, distinct, materialized write results)
//! reserve bytes against it and give them back when dropped. A reservation
//! that would exceed the budget fails instead of growing the process
//! without bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::utils::error::{Error, Result};

/// Shared memory budget for one store.
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    used: AtomicUsize,
    peak: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool with `capacity` bytes of budget.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Highest `used` value observed since the pool was created.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Starts an empty reservation that can grow later.
    #[must_use]
    pub fn reservation(self: &Arc<Self>) -> Reservation {
        Reservation {
            pool: Arc::clone(self),
            bytes: 0,
        }
    }

    fn try_acquire(&self, bytes: usize) -> Result<()> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if next > self.capacity {
                return Err(Error::execution(format!(
                    "buffer pool exhausted: {bytes} more bytes requested, {current} of {} in use",
                    self.capacity
                )));
            }
            match self.used.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Bytes held against a [`BufferPool`]; returned on drop.
#[derive(Debug)]
pub struct Reservation {
    pool: Arc<BufferPool>,
    bytes: usize,
}

impl Reservation {
    /// Grows the reservation by `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the pool has no room left.
    pub fn grow(&mut self, bytes: usize) -> Result<()> {
        self.pool.try_acquire(bytes)?;
        self.bytes += bytes;
        Ok(())
    }

    /// Gives back up to `bytes`.
    pub fn shrink(&mut self, bytes: usize) {
        let bytes = bytes.min(self.bytes);
        self.pool.release(bytes);
        self.bytes -= bytes;
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.pool.release(self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_lifecycle() {
        let pool = BufferPool::new(100);
        {
            let mut r = pool.reservation();
            r.grow(60).unwrap();
            assert_eq!(pool.used(), 60);
            r.shrink(10);
            assert_eq!(r.size(), 50);
            assert_eq!(pool.used(), 50);
        }
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.peak(), 60);
    }

    #[test]
    fn test_budget_exceeded() {
        let pool = BufferPool::new(100);
        let mut a = pool.reservation();
        let mut b = pool.reservation();
        a.grow(80).unwrap();

        let err = b.grow(30).unwrap_err();
        assert!(err.to_string().contains("buffer pool exhausted"));
        assert_eq!(b.size(), 0);

        drop(a);
        b.grow(30).unwrap();
        assert_eq!(pool.used(), 30);
    }
}
