use crate::core::config::{OrchestratorConfig, Scheduling};
use crate::core::errors::{OrchestratorError, Result};
use crate::core::limits::InFlightTracker;
use crate::core::memory::{CachedEntryInfo, TaskCache};
use crate::orchestrator::stats::{OrchestratorStats, StatsRecorder};
use crate::orchestrator::task::Task;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded-concurrency executor with a TTL and size bounded result cache
///
/// Every task is looked up by key before its producer runs. Misses run the
/// producer and store the value; hits reuse the stored value. Each instance
/// owns its cache and counters.
#[derive(Debug)]
pub struct Orchestrator<T> {
    config: OrchestratorConfig,
    cache: TaskCache<T>,
    stats: StatsRecorder,
    in_flight: InFlightTracker,
}

impl<T> Orchestrator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Construct from a validated configuration
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    /// Construct from the three limits with batched scheduling
    pub fn with_limits(
        max_concurrent: usize,
        cache_ttl: Duration,
        cache_max_size: usize,
    ) -> Result<Self> {
        let config = OrchestratorConfig::builder()
            .max_concurrent(max_concurrent)
            .cache_ttl(cache_ttl)
            .cache_max_size(cache_max_size)
            .build()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: OrchestratorConfig) -> Self {
        Self {
            cache: TaskCache::new(config.cache_ttl(), config.cache_max_size),
            config,
            stats: StatsRecorder::default(),
            in_flight: InFlightTracker::new(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run every task and return their values in submission order
    ///
    /// Any producer failure fails the whole call. With batched scheduling the
    /// failing batch still settles, so values produced by its other tasks are
    /// cached, and the error of the first failing task in submission order is
    /// returned; later batches never start. With windowed scheduling the run
    /// stops at the first failure to complete and producers still running are
    /// dropped.
    pub async fn run(&self, tasks: Vec<Task<T>>) -> Result<Vec<T>> {
        let outcomes = self.dispatch(&tasks, true).await;
        let results = outcomes.into_iter().collect::<Result<Vec<T>>>();
        if let Err(e) = &results {
            warn!(error = %e, "Run aborted after producer failure");
        }
        results
    }

    /// Run every task without aborting on failures; one outcome per task
    pub async fn run_settled(&self, tasks: Vec<Task<T>>) -> Vec<Result<T>> {
        self.dispatch(&tasks, false).await
    }

    async fn dispatch(&self, tasks: &[Task<T>], abort_on_failure: bool) -> Vec<Result<T>> {
        self.clean();
        self.stats.record_submitted(tasks.len());

        info!(
            "Starting {} tasks with max {} concurrent ({:?})",
            tasks.len(),
            self.config.max_concurrent,
            self.config.scheduling
        );

        let outcomes = match self.config.scheduling {
            Scheduling::Batched => self.dispatch_batched(tasks, abort_on_failure).await,
            Scheduling::Windowed => self.dispatch_windowed(tasks, abort_on_failure).await,
        };

        let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
        info!(
            "Completed {}/{} tasks ({} failed)",
            outcomes.len() - failed,
            tasks.len(),
            failed
        );
        outcomes
    }

    async fn dispatch_batched(&self, tasks: &[Task<T>], abort_on_failure: bool) -> Vec<Result<T>> {
        let mut outcomes = Vec::with_capacity(tasks.len());

        for (index, batch) in tasks.chunks(self.config.max_concurrent).enumerate() {
            debug!(batch = index, size = batch.len(), "Dispatching batch");

            // Every lookup in the batch happens before any producer starts
            let mut settled: Vec<Option<Result<T>>> = Vec::with_capacity(batch.len());
            let mut misses = Vec::new();
            for (slot, task) in batch.iter().enumerate() {
                match self.lookup(task) {
                    Some(value) => settled.push(Some(Ok(value))),
                    None => {
                        settled.push(None);
                        misses.push(slot);
                    }
                }
            }

            let produced = join_all(misses.iter().map(|&slot| self.produce(&batch[slot]))).await;
            for (slot, outcome) in misses.into_iter().zip(produced) {
                settled[slot] = Some(outcome);
            }

            let batch_failed = settled.iter().flatten().any(|outcome| outcome.is_err());
            outcomes.extend(settled.into_iter().flatten());

            if batch_failed && abort_on_failure {
                break;
            }
        }

        outcomes
    }

    async fn dispatch_windowed(&self, tasks: &[Task<T>], abort_on_failure: bool) -> Vec<Result<T>> {
        let mut slots: Vec<Option<Result<T>>> = (0..tasks.len()).map(|_| None).collect();
        let pending: Vec<_> = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| async move { (index, self.execute(task).await) })
            .collect();
        let mut window = stream::iter(pending).buffer_unordered(self.config.max_concurrent);

        while let Some((index, outcome)) = window.next().await {
            let failed = outcome.is_err();
            slots[index] = Some(outcome);
            if failed && abort_on_failure {
                // Dropping the window cancels the producers still running
                break;
            }
        }

        slots.into_iter().flatten().collect()
    }

    async fn execute(&self, task: &Task<T>) -> Result<T> {
        match self.lookup(task) {
            Some(value) => Ok(value),
            None => self.produce(task).await,
        }
    }

    /// Cache lookup that counts as a hit or a miss
    fn lookup(&self, task: &Task<T>) -> Option<T> {
        match self.cache.get(task.key()) {
            Some(value) => {
                self.stats.record_hit();
                debug!(key = task.key(), "Cache hit");
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    async fn produce(&self, task: &Task<T>) -> Result<T> {
        debug!(key = task.key(), "Executing");

        let value = {
            let _running = self.in_flight.enter();
            task.produce().await.map_err(|source| {
                warn!(key = task.key(), error = %source, "Producer failed");
                OrchestratorError::producer(task.key(), source)
            })?
        };

        self.cache.insert(task.key(), value.clone());
        Ok(value)
    }

    fn clean(&self) {
        let report = self.cache.clean();
        self.stats.record_evictions(report.removed());
    }

    /// Cached value for `key` if present and fresh; does not count as a hit or miss
    pub fn get_cached(&self, key: &str) -> Option<T> {
        self.cache.get(key)
    }

    /// Store `value` under `key`, then run a cleaning pass
    pub fn set_cached(&self, key: &str, value: T) {
        self.cache.insert(key, value);
        self.clean();
    }

    /// Drop the entry for `key`; returns whether one was stored
    pub fn remove_cached(&self, key: &str) -> bool {
        self.cache.remove(key)
    }

    /// Whether a fresh entry exists for `key`
    pub fn contains_cached(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    /// Live cache entries, newest first
    pub fn cached_entries(&self) -> Vec<CachedEntryInfo> {
        self.cache.entries()
    }

    /// Snapshot of the counters and current cache occupancy
    pub fn get_stats(&self) -> OrchestratorStats {
        let cache_size = self.cache.len();
        OrchestratorStats {
            cache_hits: self.stats.hits(),
            cache_misses: self.stats.misses(),
            total_tasks: self.stats.total_tasks(),
            cache_size,
            cache_usage_percent: cache_size as f64 * 100.0 / self.config.cache_max_size as f64,
            cache_max_size: self.config.cache_max_size,
            cache_ttl_ms: self.config.cache_ttl_ms,
            evictions: self.stats.evictions(),
            peak_in_flight: self.in_flight.peak(),
        }
    }

    /// Empty the cache and reset every counter
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.stats.reset();
        self.in_flight.reset_peak();
        info!("Cache cleared");
    }
}

impl<T> Default for Orchestrator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::from_valid_config(OrchestratorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{advance, sleep, Instant};

    fn counted(calls: &Arc<AtomicUsize>, key: &str, value: u32) -> Task<u32> {
        let calls = calls.clone();
        Task::new(key, move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(value) }
        })
    }

    fn delayed(key: &str, value: u32, delay_ms: u64) -> Task<u32> {
        Task::new(key, move || async move {
            sleep(Duration::from_millis(delay_ms)).await;
            Ok(value)
        })
    }

    fn failing(key: &str) -> Task<u32> {
        Task::new(key, || async { anyhow::bail!("profile page returned 500") })
    }

    #[tokio::test(start_paused = true)]
    async fn test_concrete_scenario() {
        let orchestrator = Orchestrator::with_limits(2, Duration::from_millis(1000), 10).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = orchestrator
            .run(vec![
                counted(&calls, "a", 1),
                counted(&calls, "b", 2),
                counted(&calls, "a", 1),
            ])
            .await
            .unwrap();

        assert_eq!(results, vec![1, 2, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = orchestrator.get_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.cache_size, 2);
        assert_eq!(stats.cache_usage_percent, 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_keys_in_one_batch_both_execute() {
        let orchestrator = Orchestrator::with_limits(2, Duration::from_secs(60), 10).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = orchestrator
            .run(vec![counted(&calls, "a", 1), counted(&calls, "a", 1)])
            .await
            .unwrap();

        assert_eq!(results, vec![1, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.get_stats().cache_misses, 2);
        assert_eq!(orchestrator.get_stats().cache_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_keys_ignore_producer_timing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let yielding = |key: &str| -> Task<u32> {
            let calls = calls.clone();
            Task::new(key, move || {
                let calls = calls.clone();
                async move {
                    tokio::task::yield_now().await;
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
        };

        let immediate = Orchestrator::with_limits(2, Duration::from_secs(60), 10).unwrap();
        immediate
            .run(vec![counted(&calls, "a", 7), counted(&calls, "a", 7)])
            .await
            .unwrap();

        let suspending = Orchestrator::with_limits(2, Duration::from_secs(60), 10).unwrap();
        suspending.run(vec![yielding("a"), yielding("a")]).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        for orchestrator in [&immediate, &suspending] {
            let stats = orchestrator.get_stats();
            assert_eq!((stats.cache_hits, stats.cache_misses), (0, 2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_settles_batch_and_skips_rest() {
        let orchestrator = Orchestrator::with_limits(2, Duration::from_secs(60), 10).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let err = orchestrator
            .run(vec![
                counted(&calls, "first", 1),
                counted(&calls, "second", 2),
                failing("broken"),
                delayed("slow-sibling", 4, 50),
                counted(&calls, "never", 5),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.key(), Some("broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The failing batch settled: its sibling was cached
        assert_eq!(orchestrator.get_cached("slow-sibling"), Some(4));
        assert_eq!(orchestrator.get_cached("first"), Some(1));
        assert_eq!(orchestrator.get_cached("never"), None);
        assert_eq!(orchestrator.get_stats().total_tasks, 5);
        assert_eq!(orchestrator.get_stats().cache_misses, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_in_submission_order_is_reported() {
        let orchestrator = Orchestrator::with_limits(3, Duration::from_secs(60), 10).unwrap();

        let err = orchestrator
            .run(vec![delayed("ok", 1, 10), failing("early"), failing("late")])
            .await
            .unwrap_err();

        assert_eq!(err.key(), Some("early"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_settled_isolates_failures() {
        let orchestrator = Orchestrator::with_limits(2, Duration::from_secs(60), 10).unwrap();

        let outcomes = orchestrator
            .run_settled(vec![
                delayed("a", 1, 10),
                failing("b"),
                delayed("c", 3, 10),
            ])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(*outcomes[0].as_ref().unwrap(), 1);
        assert_eq!(outcomes[1].as_ref().unwrap_err().key(), Some("b"));
        assert_eq!(*outcomes[2].as_ref().unwrap(), 3);
        assert_eq!(orchestrator.get_stats().cache_size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windowed_scheduling_keeps_window_full() {
        let config = OrchestratorConfig::builder()
            .max_concurrent(2)
            .scheduling(Scheduling::Windowed)
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(config).unwrap();

        let start = Instant::now();
        let results = orchestrator
            .run(vec![
                delayed("long", 1, 300),
                delayed("short-1", 2, 100),
                delayed("short-2", 3, 100),
                delayed("short-3", 4, 100),
            ])
            .await
            .unwrap();

        assert_eq!(results, vec![1, 2, 3, 4]);
        // Batched would take 300ms + 100ms; the window refills as soon as a slot frees
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert_eq!(orchestrator.get_stats().peak_in_flight, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windowed_failure_aborts() {
        let config = OrchestratorConfig::builder()
            .max_concurrent(2)
            .scheduling(Scheduling::Windowed)
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(config).unwrap();

        let err = orchestrator
            .run(vec![delayed("a", 1, 10), failing("b"), delayed("c", 3, 10)])
            .await
            .unwrap_err();
        assert_eq!(err.key(), Some("b"));
        // "a" was still sleeping when the run aborted, "c" never started
        assert_eq!(orchestrator.get_cached("a"), None);
        assert_eq!(orchestrator.get_cached("c"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windowed_run_settled_keeps_order() {
        let config = OrchestratorConfig::builder()
            .max_concurrent(3)
            .scheduling(Scheduling::Windowed)
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(config).unwrap();

        let outcomes = orchestrator
            .run_settled(vec![delayed("a", 1, 30), failing("b"), delayed("c", 3, 10)])
            .await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(*outcomes[0].as_ref().unwrap(), 1);
        assert!(outcomes[1].is_err());
        assert_eq!(*outcomes[2].as_ref().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_cached_cleans_and_counts_evictions() {
        let orchestrator: Orchestrator<u32> =
            Orchestrator::with_limits(5, Duration::from_secs(60), 5).unwrap();
        for i in 0..6 {
            orchestrator.set_cached(&format!("key{}", i), i);
        }

        let stats = orchestrator.get_stats();
        assert_eq!(stats.cache_size, 4);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.cache_hits + stats.cache_misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_purges_expired_entries_first() {
        let orchestrator: Orchestrator<u32> =
            Orchestrator::with_limits(5, Duration::from_millis(100), 10).unwrap();
        orchestrator.set_cached("stale", 1);
        advance(Duration::from_millis(150)).await;
        assert_eq!(orchestrator.get_stats().cache_size, 1);

        orchestrator.run(Vec::new()).await.unwrap();
        assert_eq!(orchestrator.get_stats().cache_size, 0);
        assert_eq!(orchestrator.get_stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_accessors() {
        let orchestrator: Orchestrator<String> = Orchestrator::default();
        assert_eq!(orchestrator.config(), &OrchestratorConfig::default());

        orchestrator.set_cached("k", "v".to_string());
        assert!(orchestrator.contains_cached("k"));
        assert_eq!(orchestrator.cached_entries().len(), 1);
        assert!(orchestrator.remove_cached("k"));
        assert!(!orchestrator.contains_cached("k"));
        assert_eq!(orchestrator.get_cached("k"), None);
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        assert!(Orchestrator::<u32>::with_limits(0, Duration::from_secs(1), 10).is_err());
        assert!(Orchestrator::<u32>::with_limits(1, Duration::ZERO, 10).is_err());
        assert!(Orchestrator::<u32>::with_limits(1, Duration::from_secs(1), 0).is_err());
    }
}
