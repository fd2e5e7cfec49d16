//! Bounded-concurrency execution with settle-not-abort semantics.
//!
//! Every submitted task is started exactly once and settles as either
//! `Succeeded` or `Failed`; a failure (or panic) in one task never cancels its
//! siblings and is never retried here. Each result carries the descriptor it
//! was produced from, so callers can resubmit exactly the failed tasks.

use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Terminal state of a task.
#[derive(Debug)]
pub enum Settlement<V, E> {
    Succeeded(V),
    Failed(E),
    /// The task panicked; the payload message is kept for reporting.
    Panicked(String),
}

impl<V, E: std::fmt::Display> Settlement<V, E> {
    /// Error message for a failed or panicked task.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Settlement::Succeeded(_) => None,
            Settlement::Failed(e) => Some(e.to_string()),
            Settlement::Panicked(msg) => Some(format!("task panicked: {}", msg)),
        }
    }
}

/// A settled task: the submission index, its descriptor and its outcome.
#[derive(Debug)]
pub struct TaskResult<T, V, E> {
    pub index: usize,
    pub task: T,
    pub outcome: Settlement<V, E>,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `tasks` with at most `concurrency` invocations of `run` in flight,
/// streaming each [`TaskResult`] to `result_tx` as soon as it settles.
///
/// Results arrive in completion order. The returned handle resolves once
/// every task has settled. If the receiver is dropped, remaining results are
/// discarded but every task still runs to completion.
pub fn spawn_settled<T, V, E, F, Fut>(
    tasks: Vec<T>,
    concurrency: NonZeroUsize,
    run: F,
    result_tx: mpsc::Sender<TaskResult<T, V, E>>,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    V: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.get()));
    let run = Arc::new(run);

    tokio::spawn(async move {
        let mut join_set = JoinSet::new();

        // All tasks are spawned up front; the permit is acquired inside each
        // one so spawning never blocks on slow requests.
        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let run = run.clone();
            let result_tx = result_tx.clone();

            join_set.spawn(async move {
                let permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is owned by the executor and never closed");

                let attempt = task.clone();
                let outcome = match AssertUnwindSafe(async move { run(attempt).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => Settlement::Succeeded(value),
                    Ok(Err(e)) => Settlement::Failed(e),
                    Err(payload) => Settlement::Panicked(panic_message(payload)),
                };
                drop(permit);

                let _ = result_tx
                    .send(TaskResult {
                        index,
                        task,
                        outcome,
                    })
                    .await;
            });
        }
        drop(result_tx);

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Executor task aborted: {:?}", e);
            }
        }
    })
}

/// Run `tasks` to completion and return every settled result, in completion
/// order. The output always has exactly one entry per input task.
pub async fn execute_settled<T, V, E, F, Fut>(
    tasks: Vec<T>,
    concurrency: NonZeroUsize,
    run: F,
) -> Vec<TaskResult<T, V, E>>
where
    T: Clone + Send + 'static,
    V: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    let num_tasks = tasks.len();
    if num_tasks == 0 {
        return Vec::new();
    }

    let (result_tx, mut result_rx) = mpsc::channel(num_tasks);
    let handle = spawn_settled(tasks, concurrency, run, result_tx);

    let mut results = Vec::with_capacity(num_tasks);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }

    if let Err(e) = handle.await {
        tracing::error!("Executor driver failed: {:?}", e);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks how many fake requests are in flight at once.
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlight {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn k(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_concurrency_bound() {
        for (num_tasks, bound) in [(1, 1), (10, 1), (50, 3), (64, 8), (5, 100)] {
            let tracker = Arc::new(InFlight::default());
            let tasks: Vec<u64> = (0..num_tasks).collect();

            let results = execute_settled(tasks, k(bound), {
                let tracker = tracker.clone();
                move |n: u64| {
                    let tracker = tracker.clone();
                    async move {
                        tracker.enter();
                        tokio::time::sleep(Duration::from_millis(1 + n % 4)).await;
                        tracker.exit();
                        Ok::<u64, String>(n * 2)
                    }
                }
            })
            .await;

            assert_eq!(results.len(), num_tasks as usize);
            let peak = tracker.peak.load(Ordering::SeqCst);
            assert!(peak <= bound, "peak {} exceeded bound {}", peak, bound);
            assert!(peak >= 1);
        }
    }

    #[tokio::test]
    async fn test_every_task_started_exactly_once() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<usize> = (0..200).collect();

        let results = execute_settled(tasks, k(7), {
            let started = started.clone();
            move |n: usize| {
                started.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<usize, String>(n) }
            }
        })
        .await;

        assert_eq!(started.load(Ordering::SeqCst), 200);
        let indices: HashSet<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices.len(), 200);
    }

    #[tokio::test]
    async fn test_single_failure_settles_without_abort() {
        let tasks: Vec<u32> = (0..10).collect();

        let results = execute_settled(tasks, k(3), |n: u32| async move {
            // Later tasks finish first so completion order differs from submission.
            tokio::time::sleep(Duration::from_millis(u64::from(10 - n))).await;
            if n == 4 {
                Err(format!("rate limited on {}", n))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(results.len(), 10);
        let failures: Vec<_> = results
            .iter()
            .filter(|r| r.outcome.error_message().is_some())
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task, 4);
        assert_eq!(failures[0].index, 4);
        assert_eq!(
            failures[0].outcome.error_message().as_deref(),
            Some("rate limited on 4")
        );

        // Values stay paired with their own descriptor regardless of completion order.
        for result in &results {
            if let Settlement::Succeeded(value) = &result.outcome {
                assert_eq!(*value, result.task);
            }
        }
    }

    #[tokio::test]
    async fn test_panic_is_captured_as_settlement() {
        let results = execute_settled(vec![1u8, 2, 3], k(2), |n: u8| async move {
            if n == 2 {
                panic!("window exploded");
            }
            Ok::<u8, String>(n)
        })
        .await;

        assert_eq!(results.len(), 3);
        let panicked = results
            .iter()
            .find(|r| r.task == 2)
            .expect("panicked task must still settle");
        match &panicked.outcome {
            Settlement::Panicked(msg) => assert!(msg.contains("window exploded")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let results =
            execute_settled(Vec::<u8>::new(), k(4), |n: u8| async move { Ok::<u8, String>(n) })
                .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_delivers_each_result() {
        let (tx, mut rx) = mpsc::channel(2);
        let handle = spawn_settled(
            (0..20u32).collect(),
            k(4),
            |n: u32| async move { Ok::<u32, String>(n + 1) },
            tx,
        );

        let mut seen = Vec::new();
        while let Some(result) = rx.recv().await {
            seen.push(result.index);
        }
        handle.await.unwrap();

        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }
}
