use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// First delay of the per-key failure backoff
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound of the per-key failure backoff
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

struct QueueState<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed (queued, or re-added while processing)
    dirty: HashSet<K>,
    /// Keys currently handed out to a worker
    processing: HashSet<K>,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

/// Deduplicating work queue of resource keys.
///
/// A key is handed to at most one worker at a time. Adding a key that is already
/// queued is a no-op; adding a key that is being processed queues it again once
/// the worker calls `done`.
pub struct WorkQueue<K> {
    state: Arc<Mutex<QueueState<K>>>,
    notify: Arc<Notify>,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            notify: Arc::clone(&self.notify),
            base_backoff: self.base_backoff,
            max_backoff: self.max_backoff,
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF)
    }

    pub fn with_backoff(base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            })),
            notify: Arc::new(Notify::new()),
            base_backoff,
            max_backoff,
        }
    }

    /// Queue a key for processing
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }

        state.queue.push_back(key);
        self.notify.notify_one();
    }

    /// Queue a key once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Requeue a failed key after its backoff; returns the delay used
    pub async fn add_rate_limited(&self, key: K) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };

        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of a key
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.failures.remove(key);
    }

    /// Consecutive failures recorded for a key
    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent add or shutdown is not missed
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key returned by `get` as finished
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);

        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    /// Number of keys waiting to be handed out
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out keys and wake all waiting workers
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_adds_are_collapsed() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        queue.add("a").await;
        queue.add("b").await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_key_readded_while_processing_runs_again_after_done() {
        let queue = WorkQueue::new();
        queue.add("a").await;

        let key = queue.get().await.unwrap();
        queue.add("a").await;
        // Not handed out to a second worker while the first one holds it
        assert!(queue.is_empty().await);

        queue.done(&key).await;
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        let key = queue.get().await.unwrap();
        queue.done(&key).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delivers_later() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5));
        assert!(queue.is_empty().await);

        let start = tokio::time::Instant::now();
        assert_eq!(queue.get().await, Some("a"));
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_workers() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.shutdown().await;

        assert_eq!(waiter.await.unwrap(), None);
        queue.add("a").await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_backoff_grows_and_resets() {
        let queue = WorkQueue::with_backoff(Duration::from_secs(1), Duration::from_secs(5));

        assert_eq!(queue.add_rate_limited("a").await, Duration::from_secs(1));
        assert_eq!(queue.add_rate_limited("a").await, Duration::from_secs(2));
        assert_eq!(queue.add_rate_limited("a").await, Duration::from_secs(4));
        assert_eq!(queue.add_rate_limited("a").await, Duration::from_secs(5));
        assert_eq!(queue.num_requeues(&"a").await, 4);

        queue.forget(&"a").await;
        assert_eq!(queue.num_requeues(&"a").await, 0);
        assert_eq!(queue.add_rate_limited("a").await, Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_saturates() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        assert_eq!(queue.backoff(0), Duration::from_secs(1));
        assert_eq!(queue.backoff(8), Duration::from_secs(256));
        assert_eq!(queue.backoff(9), DEFAULT_MAX_BACKOFF);
        assert_eq!(queue.backoff(64), DEFAULT_MAX_BACKOFF);
    }
}
