//! Bounded, time-limited fan-out over projects.
//!
//! Each project runs on its own task, gated by a [`Semaphore`]. One deadline
//! covers the whole fan-out; projects that error or are still running when it
//! passes are reported as failed and left out. The search path never writes, so
//! aborting stragglers is always safe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::Result;

/// Fan-out limits.
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    /// Maximum simultaneous per-project searches.
    pub max_concurrent: usize,
    /// Overall deadline for one fan-out.
    pub timeout: Duration,
    /// Candidates fetched per project.
    pub per_project_limit: usize,
    /// Default Morton radius when a query does not give one.
    pub default_radius: u128,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_millis(2000),
            per_project_limit: 50,
            default_radius: 1 << 40,
        }
    }
}

/// Outcome of a fan-out. Both lists keep input order.
#[derive(Debug)]
pub struct FanOut<T> {
    pub succeeded: Vec<(String, T)>,
    pub failed: Vec<String>,
}

impl<T> FanOut<T> {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Run `task(id)` for every id with at most `max_concurrent` in flight and a
/// single overall `timeout`. Never fails as a whole.
pub async fn fan_out<T, F, Fut>(
    ids: Vec<String>,
    max_concurrent: usize,
    timeout: Duration,
    task: F,
) -> FanOut<T>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut set = JoinSet::new();

    for (idx, id) in ids.iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let fut = task(id.clone());
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (idx, fut.await)
        });
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut outcomes: Vec<Option<Result<T>>> = ids.iter().map(|_| None).collect();

    loop {
        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((idx, outcome)))) => outcomes[idx] = Some(outcome),
            Ok(Some(Err(e))) => tracing::warn!(error = %e, "fan-out task panicked"),
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(pending = set.len(), ?timeout, "fan-out deadline reached");
                set.abort_all();
                break;
            }
        }
    }

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (id, outcome) in ids.into_iter().zip(outcomes) {
        match outcome {
            Some(Ok(value)) => succeeded.push((id, value)),
            Some(Err(e)) => {
                tracing::warn!(project_id = %id, error = %e, "project search failed; dropping");
                failed.push(id);
            }
            None => {
                tracing::warn!(project_id = %id, "project search timed out; dropping");
                failed.push(id);
            }
        }
    }

    FanOut { succeeded, failed }
}
