//! Bounded batch fan-out with a best-effort barrier.
//!
//! A batch of work items is spread over at most `workers` concurrent tasks.
//! The caller waits for the whole batch or for the budget to elapse,
//! whichever comes first; work still running at the deadline keeps going in
//! the background.

use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Fixed slack added to every batch budget.
pub const BATCH_WAIT_SLACK: Duration = Duration::from_millis(500);

/// How a batch barrier resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every item finished before the deadline.
    Completed,
    /// The deadline passed with `pending` items still running.
    TimedOut { pending: usize },
}

impl BatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed)
    }
}

/// Wait budget for a batch: `per_item * ceil(batch / workers) + slack`.
pub fn batch_budget(per_item: Duration, batch: usize, workers: usize) -> Duration {
    let rounds = batch.div_ceil(workers.max(1)) as u32;
    per_item * rounds + BATCH_WAIT_SLACK
}

/// Runs `op` over `items` with at most `workers` running at once.
///
/// # Arguments
///
/// * `items` - The work items; each is handed to `op` on its own task
/// * `workers` - Concurrency cap (values below 1 count as 1)
/// * `budget` - How long the caller waits before detaching the rest
/// * `op` - The per-item operation
///
/// # Returns
///
/// [`BatchOutcome::Completed`] if every item finished within the budget,
/// otherwise [`BatchOutcome::TimedOut`] with the number still running.
pub async fn fan_out<T, F, Fut>(items: Vec<T>, workers: usize, budget: Duration, op: F) -> BatchOutcome
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if items.is_empty() {
        return BatchOutcome::Completed;
    }

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let remaining = Arc::new(AtomicUsize::new(items.len()));
    let op = Arc::new(op);

    let handles: Vec<_> = items
        .into_iter()
        .map(|item| {
            let semaphore = semaphore.clone();
            let remaining = remaining.clone();
            let op = op.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                op(item).await;
                remaining.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    match tokio::time::timeout(budget, join_all(handles)).await {
        Ok(_) => BatchOutcome::Completed,
        Err(_) => BatchOutcome::TimedOut {
            pending: remaining.load(Ordering::SeqCst),
        },
    }
}
