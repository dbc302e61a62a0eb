//! Bounded-concurrency task group with barrier semantics.
//!
//! [`BoundedTaskSet`] spawns one tokio task per item on a [`JoinSet`] and lets
//! at most `max_parallel` of them run at once. [`BoundedTaskSet::join_all`]
//! returns only after every task finished, with results in spawn order.
//! A task that panics or is aborted does not take its siblings down; its slot
//! is filled by the caller-provided fallback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::error;

/// Default number of tasks allowed to run at once.
pub const DEFAULT_MAX_PARALLEL: usize = 16;

/// A group of keyed tasks that run with bounded parallelism.
pub struct BoundedTaskSet<K, T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<(usize, T)>,
    keys: Vec<K>,
    ids: HashMap<Id, usize>,
}

impl<K, T: Send + 'static> Default for BoundedTaskSet<K, T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARALLEL)
    }
}

impl<K, T: Send + 'static> BoundedTaskSet<K, T> {
    /// Creates a task set running at most `max_parallel` tasks at once.
    /// A limit of zero is treated as one.
    #[must_use]
    pub fn new(max_parallel: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            set: JoinSet::new(),
            keys: Vec::new(),
            ids: HashMap::new(),
        }
    }

    /// Returns the number of spawned tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no task was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Spawns a task for `key`. It starts running once a permit is free.
    pub fn spawn<F>(&mut self, key: K, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.keys.len();
        self.keys.push(key);

        let semaphore = Arc::clone(&self.semaphore);
        let handle = self.set.spawn(async move {
            // The semaphore is never closed, so a permit is always granted.
            let _permit = semaphore.acquire_owned().await.ok();
            (index, task.await)
        });
        self.ids.insert(handle.id(), index);
    }

    /// Waits for every task and returns `(key, result)` pairs in spawn order.
    ///
    /// Tasks that panicked or were aborted get `on_lost(key)` as their result.
    pub async fn join_all<L>(mut self, on_lost: L) -> Vec<(K, T)>
    where
        L: Fn(&K) -> T,
    {
        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None)
            .take(self.keys.len())
            .collect();

        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((index, value)) => results[index] = Some(value),
                Err(e) => {
                    error!("Fan-out task failed to complete: {e}");
                    if let Some(&index) = self.ids.get(&e.id()) {
                        results[index] = Some(on_lost(&self.keys[index]));
                    }
                }
            }
        }

        self.keys
            .into_iter()
            .zip(results)
            .map(|(key, value)| {
                let value = value.unwrap_or_else(|| on_lost(&key));
                (key, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let limit = 3;
        let mut set = BoundedTaskSet::new(limit);

        for i in 0..20u64 {
            let running = Arc::clone(&running);
            set.spawn(i, async move {
                let watermark = running.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(i % 4)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                watermark
            });
        }

        let results = set.join_all(|_| 0).await;
        assert_eq!(results.len(), 20);
        for (_, watermark) in results {
            assert!(watermark <= limit, "saw {watermark} concurrent tasks");
        }
    }

    #[tokio::test]
    async fn test_results_keep_spawn_order() {
        let mut set = BoundedTaskSet::new(4);
        for (i, delay) in [30u64, 1, 15, 5].into_iter().enumerate() {
            set.spawn(format!("node-{i}"), async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay
            });
        }

        let results = set.join_all(|_| 0).await;
        let keys: Vec<_> = results.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["node-0", "node-1", "node-2", "node-3"]);
        assert_eq!(results[0].1, 30);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_abort_siblings() {
        let mut set: BoundedTaskSet<&str, Result<(), String>> = BoundedTaskSet::new(2);
        set.spawn("ok-1", async { Ok(()) });
        set.spawn("boom", async { panic!("task exploded") });
        set.spawn("ok-2", async { Ok(()) });

        let results = set.join_all(|k| Err(format!("{k} lost"))).await;
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].1, Err(String::from("boom lost")));
        assert!(results[2].1.is_ok());
    }
}
