//! Poll Scheduler
//!
//! One loop per feed, each on its own fixed interval. A feed is `Idle`
//! between ticks and `Polling` while its cycle runs. Ticks that fire during
//! a poll coalesce into a single immediate tick once the feed is idle again,
//! and a per-feed poll lock rejects overlapping polls outright.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};

use super::pipeline::{CycleReport, Feed, Pipeline};

/// Feed loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedStatus {
    /// Waiting for the next tick
    Idle,
    /// Cycle in progress
    Polling,
}

#[derive(Debug, Default)]
struct FeedStats {
    cycles: u64,
    coalesced: u64,
    notified: u64,
    last_report: Option<CycleReport>,
}

/// Monitoring snapshot of one feed loop
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub name: String,
    pub source: String,
    pub status: FeedStatus,
    pub cycles: u64,
    /// Polls rejected because one was already running
    pub coalesced: u64,
    pub notified: u64,
    pub last_report: Option<CycleReport>,
}

/// Per-feed loop state
#[derive(Debug)]
pub struct FeedWorker {
    feed: Arc<Feed>,
    poll_lock: tokio::sync::Mutex<()>,
    status: Mutex<FeedStatus>,
    stats: Mutex<FeedStats>,
}

impl FeedWorker {
    fn new(feed: Feed) -> Self {
        Self {
            feed: Arc::new(feed),
            poll_lock: tokio::sync::Mutex::new(()),
            status: Mutex::new(FeedStatus::Idle),
            stats: Mutex::new(FeedStats::default()),
        }
    }

    pub fn feed(&self) -> &Arc<Feed> {
        &self.feed
    }

    pub fn status(&self) -> FeedStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: FeedStatus) {
        *lock(&self.status) = status;
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let stats = lock(&self.stats);
        FeedSnapshot {
            name: self.feed.name.clone(),
            source: self.feed.source_key().to_string(),
            status: self.status(),
            cycles: stats.cycles,
            coalesced: stats.coalesced,
            notified: stats.notified,
            last_report: stats.last_report.clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resets the status to `Idle` however the poll ends, including cancellation
struct PollingGuard<'a>(&'a FeedWorker);

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.set_status(FeedStatus::Idle);
    }
}

/// Runs every feed loop until shutdown
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    workers: Vec<Arc<FeedWorker>>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, feeds: Vec<Feed>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pipeline,
            workers: feeds.into_iter().map(|f| Arc::new(FeedWorker::new(f))).collect(),
            shutdown,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn workers(&self) -> &[Arc<FeedWorker>] {
        &self.workers
    }

    /// Handle that stops every loop when sent `true`
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Signal every loop to stop
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn snapshots(&self) -> Vec<FeedSnapshot> {
        self.workers.iter().map(|w| w.snapshot()).collect()
    }

    /// Poll one feed unless it is already polling; `None` means coalesced
    pub async fn run_once(&self, worker: &FeedWorker) -> Option<CycleReport> {
        poll(&self.pipeline, worker).await
    }

    /// One cycle across all feeds at once, merging their candidates
    pub async fn run_all_once(&self) -> CycleReport {
        let feeds: Vec<Arc<Feed>> = self.workers.iter().map(|w| Arc::clone(&w.feed)).collect();
        self.pipeline.run_cycle(&feeds).await
    }

    /// Run all feed loops until shutdown is signalled
    pub async fn run(&self) {
        if self.workers.is_empty() {
            tracing::warn!("No feeds configured, scheduler has nothing to do");
            return;
        }

        let mut tasks = JoinSet::new();
        for worker in &self.workers {
            tracing::info!(
                feed = %worker.feed.name,
                source = worker.feed.source_key(),
                interval_secs = worker.feed.interval.as_secs(),
                "Starting feed loop"
            );
            tasks.spawn(feed_loop(
                Arc::clone(&self.pipeline),
                Arc::clone(worker),
                self.shutdown.subscribe(),
            ));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Feed loop task failed");
            }
        }
        tracing::info!("All feed loops stopped");
    }
}

/// Cloneable shutdown trigger
#[derive(Debug, Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

async fn poll(pipeline: &Pipeline, worker: &FeedWorker) -> Option<CycleReport> {
    let Ok(_turn) = worker.poll_lock.try_lock() else {
        lock(&worker.stats).coalesced += 1;
        tracing::debug!(feed = %worker.feed.name, "Poll already running, tick coalesced");
        return None;
    };

    worker.set_status(FeedStatus::Polling);
    let _idle = PollingGuard(worker);
    let report = pipeline.run_cycle(std::slice::from_ref(&worker.feed)).await;

    let mut stats = lock(&worker.stats);
    stats.cycles += 1;
    if report.delivered.is_some() {
        stats.notified += 1;
    }
    stats.last_report = Some(report.clone());
    Some(report)
}

async fn feed_loop(pipeline: Arc<Pipeline>, worker: Arc<FeedWorker>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(worker.feed.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let stopped = *shutdown.borrow();
        if stopped {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            _ = poll(&pipeline, &worker) => {}
            _ = shutdown.changed() => {
                tracing::info!(feed = %worker.feed.name, "Shutdown during poll, abandoning in-flight cycle");
                break;
            }
        }
    }

    tracing::info!(feed = %worker.feed.name, "Feed loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::PipelineConfig;
    use crate::domain::{GovernorConfig, GovernorRegistry, NotificationStore, RawSnapshot};
    use crate::ports::{CandidateSource, FilterParams, MockNotifier, MockSource, SourceError};
    use async_trait::async_trait;
    use std::time::Duration;

    fn pipeline() -> Arc<Pipeline> {
        let fast = GovernorConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
            max_requests: 100,
            ..GovernorConfig::default()
        };
        Arc::new(Pipeline::new(
            Arc::new(GovernorRegistry::new(fast)),
            Arc::new(NotificationStore::in_memory(24)),
            Arc::new(MockNotifier::new()),
            PipelineConfig::default(),
        ))
    }

    fn feed(source: Arc<dyn CandidateSource>, minutes: u64) -> Feed {
        Feed::new("test", source, FilterParams::default())
            .with_interval(Duration::from_secs(minutes * 60))
    }

    /// Source whose fetch takes a fixed time
    struct SlowSource(Duration);

    #[async_trait]
    impl CandidateSource for SlowSource {
        fn key(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, _params: &FilterParams) -> Result<Vec<RawSnapshot>, SourceError> {
            tokio::time::sleep(self.0).await;
            Ok(Vec::new())
        }
    }

    /// Source whose first fetch takes a fixed time; records when each fetch starts
    struct SlowFirstSource {
        first: Duration,
        started: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl CandidateSource for SlowFirstSource {
        fn key(&self) -> &str {
            "slow_first"
        }

        async fn fetch(&self, _params: &FilterParams) -> Result<Vec<RawSnapshot>, SourceError> {
            let first = {
                let mut started = lock(&self.started);
                started.push(tokio::time::Instant::now());
                started.len() == 1
            };
            if first {
                tokio::time::sleep(self.first).await;
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_missed_during_long_poll_coalesce_into_one() {
        let source = Arc::new(SlowFirstSource {
            first: Duration::from_secs(200),
            started: Mutex::new(Vec::new()),
        });
        let scheduler = Arc::new(Scheduler::new(pipeline(), vec![feed(source.clone(), 1)]));
        let start = tokio::time::Instant::now();

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_secs(265)).await;
        scheduler.stop();
        handle.await.unwrap();

        // Ticks at 60s, 120s and 180s collapse into one at 200s, then the
        // interval restarts from there
        let offsets: Vec<u64> = lock(&source.started)
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 200, 260]);
        assert_eq!(scheduler.snapshots()[0].cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_polls_on_interval() {
        let source = MockSource::new("mock");
        let scheduler = Arc::new(Scheduler::new(pipeline(), vec![feed(Arc::new(source.clone()), 1)]));

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_secs(150)).await;
        scheduler.stop();
        handle.await.unwrap();

        // ticks at 0s, 60s and 120s
        assert_eq!(source.get_calls().len(), 3);
        let snapshot = &scheduler.snapshots()[0];
        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.status, FeedStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_poll_coalesced() {
        let source = Arc::new(SlowSource(Duration::from_secs(30)));
        let scheduler = Scheduler::new(pipeline(), vec![feed(source, 1)]);
        let worker = Arc::clone(&scheduler.workers()[0]);

        let (first, second) = tokio::join!(scheduler.run_once(&worker), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(worker.status(), FeedStatus::Polling);
            scheduler.run_once(&worker).await
        });

        assert!(first.is_some());
        assert!(second.is_none());
        let snapshot = worker.snapshot();
        assert_eq!(snapshot.cycles, 1);
        assert_eq!(snapshot.coalesced, 1);
        assert_eq!(snapshot.status, FeedStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_cycles_do_not_end_loop() {
        let source = MockSource::new("mock");
        for _ in 0..2 {
            source.push_response(Err(SourceError::unavailable("mock", "HTTP 500")));
        }
        let scheduler = Arc::new(Scheduler::new(pipeline(), vec![feed(Arc::new(source.clone()), 1)]));

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_secs(150)).await;
        scheduler.shutdown_handle().shutdown();
        handle.await.unwrap();

        assert_eq!(source.get_calls().len(), 3);
        let report = scheduler.snapshots()[0].last_report.clone().unwrap();
        assert!(report.skipped.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_in_flight_poll() {
        let source = Arc::new(SlowSource(Duration::from_secs(3600)));
        let scheduler = Arc::new(Scheduler::new(pipeline(), vec![feed(source, 1)]));

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(scheduler.snapshots()[0].status, FeedStatus::Polling);
        scheduler.stop();
        handle.await.unwrap();

        let snapshot = &scheduler.snapshots()[0];
        assert_eq!(snapshot.cycles, 0);
        assert_eq!(snapshot.status, FeedStatus::Idle);
    }
}
