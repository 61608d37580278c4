//! Cooperative worker runtime (C1, spec §4.1, §5).
//!
//! The original design is single-threaded with a process-wide
//! "biglock" held by exactly one worker, released only around
//! blocking syscalls, with cooperative cancellation via a non-local
//! jump (`retry`). This realization keeps the single-biglock
//! discipline (`Scheduler::biglock`) but expresses suspension points
//! as ordinary `.await` points and `retry` as a typed error variant
//! that a handler returns and the dispatcher catches (spec §9).

pub mod lock;

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// One cooperative worker task's identity, used only for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

/// The process-wide biglock. Exactly one worker holds the guard while
/// running; it is dropped (released) explicitly around blocking
/// object-client/RPC calls and reacquired afterward, matching the
/// teacher's "workers release around I/O" discipline.
pub struct Scheduler {
    biglock: Mutex<()>,
    next_worker_id: std::sync::atomic::AtomicU64,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Scheduler { biglock: Mutex::new(()), next_worker_id: std::sync::atomic::AtomicU64::new(1) })
    }

    pub fn spawn_worker_id(&self) -> WorkerId {
        WorkerId(self.next_worker_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }

    /// Acquires the biglock. FIFO between waiters, per tokio's mutex.
    pub async fn acquire(&self) -> BiglockGuard<'_> {
        BiglockGuard { _inner: self.biglock.lock().await }
    }
}

pub struct BiglockGuard<'a> {
    _inner: MutexGuard<'a, ()>,
}

/// Runs `body` while holding the biglock, releasing it for the
/// duration of `io` (a blocking object-client call or peer RPC) and
/// reacquiring it before continuing. Mirrors `wait(worker)` around a
/// blocking call in the original design.
pub async fn with_io_released<'a, F, Fut, T>(guard: BiglockGuard<'a>, scheduler: &'a Scheduler, io: F) -> (BiglockGuard<'a>, T)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    drop(guard);
    let result = io().await;
    (scheduler.acquire().await, result)
}

/// A worker's cooperative cancellation signal. A handler that detects
/// a race (stale walk-cache entry, a lease that changed mid-operation)
/// returns `Err(Error::Stale(..))`; the dispatcher treats that as
/// `retry(worker)`: every `ResourceGuard`/lease guard the handler held
/// has already been dropped by normal Rust unwinding, the walk cache
/// is flushed, and the transaction is re-dispatched from scratch.
pub async fn run_retryable<F, Fut, T>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    loop {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                tracing::debug!(error = %e, "worker retry");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retryable_attempts_until_non_stale() {
        let attempts = AtomicU32::new(0);
        let result = run_retryable(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Stale("race"))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = run_retryable(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::client(crate::error::ENOENT, "missing"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn biglock_serializes_workers() {
        let sched = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let g1 = sched.acquire().await;
        let sched2 = sched.clone();
        let order2 = order.clone();
        let handle = tokio::spawn(async move {
            let _g = sched2.acquire().await;
            order2.lock().await.push(2);
        });
        tokio::task::yield_now().await;
        order.lock().await.push(1);
        drop(g1);
        handle.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }
}
