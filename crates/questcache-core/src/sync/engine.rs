use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ReplayPolicy, Replayer};
use crate::cache::OfflineCache;
use crate::error::StoreResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Queue length after the run.
    pub remaining: usize,
    /// The run stopped at a failure under `HaltOnFirstFailure`.
    pub halted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Offline,
    /// Another run was already in flight; nothing was sent.
    AlreadyRunning,
    Completed(SyncReport),
}

/// Results sent back from a spawned sync task.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Finished(SyncOutcome),
    StoreFailed(String),
}

/// Holds the in-progress flag for the lifetime of one run.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays the pending-update queue. Clones share the in-progress flag, so
/// at most one run is in flight per engine.
pub struct SyncEngine<R> {
    cache: OfflineCache,
    replayer: Arc<R>,
    policy: ReplayPolicy,
    retry_interval: Option<Duration>,
    running: Arc<AtomicBool>,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            replayer: Arc::clone(&self.replayer),
            policy: self.policy,
            retry_interval: self.retry_interval,
            running: Arc::clone(&self.running),
        }
    }
}

impl<R: Replayer + 'static> SyncEngine<R> {
    pub fn new(cache: OfflineCache, replayer: R) -> Self {
        Self {
            cache,
            replayer: Arc::new(replayer),
            policy: ReplayPolicy::default(),
            retry_interval: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_policy(mut self, policy: ReplayPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Also retry on a fixed cadence while the background task runs.
    /// Without it, sync only happens on reconnect or when something is queued.
    pub fn with_retry_interval(mut self, interval: Option<Duration>) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Replay every queued update once, oldest first.
    ///
    /// Delivered updates are removed as soon as they succeed. Failed ones
    /// stay queued; whether the run continues past them depends on the
    /// policy. Store failures abort the run and are returned.
    pub async fn sync_once(&self) -> StoreResult<SyncOutcome> {
        if !self.cache.is_online() {
            debug!("Offline, skipping sync");
            return Ok(SyncOutcome::Offline);
        }

        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            debug!("Sync already in progress");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let pending = self.cache.list_pending().await?;
        let mut report = SyncReport::default();
        if pending.is_empty() {
            return Ok(SyncOutcome::Completed(report));
        }

        info!(count = pending.len(), policy = ?self.policy, "Replaying pending updates");
        for update in &pending {
            if !self.cache.is_online() {
                info!("Went offline during sync, stopping");
                break;
            }

            report.attempted += 1;
            match self.replayer.replay(update).await {
                Ok(()) => {
                    self.cache.remove(update.id).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        id = update.id,
                        request = %update.request_line(),
                        error = %e,
                        transient = e.is_transient(),
                        "Pending update not delivered, keeping it queued"
                    );
                    if self.policy == ReplayPolicy::HaltOnFirstFailure {
                        report.halted = true;
                        break;
                    }
                }
            }
        }

        report.remaining = self.cache.pending_count().await?;
        info!(
            delivered = report.delivered,
            failed = report.failed,
            remaining = report.remaining,
            "Sync finished"
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Run sync in a background task: once at start, then whenever the
    /// cache signals (reconnect or enqueue while online) and on the retry
    /// interval if one is set. Each run is reported on `events`.
    pub fn spawn(self, events: Option<mpsc::Sender<SyncEvent>>) -> SyncTask {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            self.run(events, shutdown_rx).await;
        });
        SyncTask {
            handle,
            shutdown: Some(shutdown_tx),
        }
    }

    async fn run(self, events: Option<mpsc::Sender<SyncEvent>>, mut shutdown: oneshot::Receiver<()>) {
        info!(retry_interval = ?self.retry_interval, "Background sync task started");
        let signal = self.cache.sync_signal();
        self.run_and_report(events.as_ref()).await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = signal.notified() => {}
                _ = retry_tick(self.retry_interval) => {}
            }
            self.run_and_report(events.as_ref()).await;
        }
        info!("Background sync task stopped");
    }

    async fn run_and_report(&self, events: Option<&mpsc::Sender<SyncEvent>>) {
        let event = match self.sync_once().await {
            Ok(outcome) => SyncEvent::Finished(outcome),
            Err(e) => {
                error!(error = %e, "Sync aborted by a store failure");
                SyncEvent::StoreFailed(e.to_string())
            }
        };
        if let Some(tx) = events {
            if let Err(e) = tx.send(event).await {
                error!(error = %e, "Failed to send sync event - channel closed");
            }
        }
    }
}

async fn retry_tick(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending::<()>().await,
    }
}

/// Handle to a spawned background sync task.
pub struct SyncTask {
    handle: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl SyncTask {
    /// Stop the task after any in-flight run completes.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            error!(error = %e, "Background sync task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::cache::manager::tests::memory_cache;
    use crate::connectivity::Connectivity;
    use crate::models::{HttpMethod, NewPendingUpdate, PendingUpdate};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Records delivered urls; urls containing "fail" are rejected.
    #[derive(Default)]
    struct FakeReplayer {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Replayer for FakeReplayer {
        async fn replay(&self, update: &PendingUpdate) -> Result<(), ApiError> {
            if update.url.contains("fail") {
                return Err(ApiError::ServerError("boom".into()));
            }
            self.delivered.lock().push(update.url.clone());
            Ok(())
        }
    }

    /// Blocks inside `replay` until released.
    #[derive(Default)]
    struct GatedReplayer {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Replayer for GatedReplayer {
        async fn replay(&self, _update: &PendingUpdate) -> Result<(), ApiError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    /// Delivers, but the host reports going offline during the first call.
    struct DisconnectingReplayer {
        connectivity: Connectivity,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Replayer for DisconnectingReplayer {
        async fn replay(&self, _update: &PendingUpdate) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.connectivity.set_online(false);
            Ok(())
        }
    }

    async fn enqueue(cache: &OfflineCache, url: &str) {
        cache
            .enqueue(NewPendingUpdate::new(HttpMethod::Post, url, json!({ "url": url })))
            .await
            .expect("enqueue");
    }

    #[tokio::test]
    async fn test_offline_does_nothing() {
        let cache = memory_cache(false).await;
        enqueue(&cache, "/a").await;
        let engine = SyncEngine::new(cache.clone(), FakeReplayer::default());
        assert_eq!(engine.sync_once().await.expect("sync"), SyncOutcome::Offline);
        assert_eq!(cache.pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_delivers_in_order_and_empties_queue() {
        let cache = memory_cache(false).await;
        for url in ["/a", "/b", "/c"] {
            enqueue(&cache, url).await;
        }
        cache.connectivity().set_online(true);

        let replayer = Arc::new(FakeReplayer::default());
        let engine = SyncEngine::new(cache.clone(), Arc::clone(&replayer));
        let outcome = engine.sync_once().await.expect("sync");

        assert_eq!(
            outcome,
            SyncOutcome::Completed(SyncReport {
                attempted: 3,
                delivered: 3,
                failed: 0,
                remaining: 0,
                halted: false,
            })
        );
        assert_eq!(*replayer.delivered.lock(), vec!["/a", "/b", "/c"]);
        assert!(cache.list_pending().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_skip_and_continue_keeps_failed_update() {
        let cache = memory_cache(true).await;
        for url in ["/fail", "/b", "/c"] {
            enqueue(&cache, url).await;
        }

        let engine = SyncEngine::new(cache.clone(), FakeReplayer::default());
        let SyncOutcome::Completed(report) = engine.sync_once().await.expect("sync") else {
            panic!("expected a completed run");
        };
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);
        assert!(!report.halted);

        let left: Vec<String> = cache
            .list_pending()
            .await
            .expect("list")
            .into_iter()
            .map(|u| u.url)
            .collect();
        assert_eq!(left, vec!["/fail".to_string()]);
    }

    #[tokio::test]
    async fn test_halt_on_first_failure() {
        let cache = memory_cache(true).await;
        for url in ["/fail", "/b", "/c"] {
            enqueue(&cache, url).await;
        }

        let engine = SyncEngine::new(cache.clone(), FakeReplayer::default())
            .with_policy(ReplayPolicy::HaltOnFirstFailure);
        let SyncOutcome::Completed(report) = engine.sync_once().await.expect("sync") else {
            panic!("expected a completed run");
        };
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 0);
        assert!(report.halted);
        assert_eq!(report.remaining, 3);
    }

    #[tokio::test]
    async fn test_reentrant_sync_does_not_duplicate() {
        let cache = memory_cache(true).await;
        enqueue(&cache, "/a").await;

        let replayer = Arc::new(GatedReplayer::default());
        let engine = SyncEngine::new(cache.clone(), Arc::clone(&replayer));

        let first = engine.clone();
        let in_flight = tokio::spawn(async move { first.sync_once().await });
        replayer.entered.notified().await;

        assert!(engine.is_running());
        assert_eq!(engine.sync_once().await.expect("sync"), SyncOutcome::AlreadyRunning);

        replayer.release.notify_one();
        let outcome = in_flight.await.expect("join").expect("sync");
        assert!(matches!(outcome, SyncOutcome::Completed(ref r) if r.delivered == 1));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_background_task_syncs_on_reconnect() {
        let cache = memory_cache(false).await;
        enqueue(&cache, "/a").await;

        let replayer = Arc::new(FakeReplayer::default());
        let (tx, mut rx) = mpsc::channel(8);
        let task = SyncEngine::new(cache.clone(), Arc::clone(&replayer)).spawn(Some(tx));

        // Startup run happens while offline
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("startup event");
        assert!(matches!(first, Some(SyncEvent::Finished(SyncOutcome::Offline))));

        cache.connectivity().set_online(true);
        let delivered = loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("sync event")
                .expect("channel open");
            if let SyncEvent::Finished(SyncOutcome::Completed(report)) = event {
                break report.delivered;
            }
        };

        assert_eq!(delivered, 1);
        assert_eq!(*replayer.delivered.lock(), vec!["/a"]);
        assert!(cache.list_pending().await.expect("list").is_empty());
        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_going_offline_stops_the_drain() {
        let cache = memory_cache(true).await;
        for url in ["/a", "/b", "/c"] {
            enqueue(&cache, url).await;
        }

        let replayer = Arc::new(DisconnectingReplayer {
            connectivity: cache.connectivity().clone(),
            calls: AtomicUsize::new(0),
        });
        let engine = SyncEngine::new(cache.clone(), Arc::clone(&replayer));
        let SyncOutcome::Completed(report) = engine.sync_once().await.expect("sync") else {
            panic!("expected a completed run");
        };

        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(replayer.calls.load(Ordering::SeqCst), 1);
        let left: Vec<String> = cache
            .list_pending()
            .await
            .expect("list")
            .into_iter()
            .map(|u| u.url)
            .collect();
        assert_eq!(left, vec!["/b".to_string(), "/c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_interval_triggers_another_run() {
        let cache = memory_cache(true).await;
        let (tx, mut rx) = mpsc::channel(8);
        let engine = SyncEngine::new(cache.clone(), FakeReplayer::default())
            .with_retry_interval(Some(Duration::from_secs(60)));
        assert_eq!(engine.retry_interval(), Some(Duration::from_secs(60)));

        let start = tokio::time::Instant::now();
        let task = engine.spawn(Some(tx));

        let first = rx.recv().await.expect("startup event");
        assert!(matches!(first, SyncEvent::Finished(SyncOutcome::Completed(_))));

        // Nothing signals the cache, so only the retry tick can wake the task
        let second = rx.recv().await.expect("retry event");
        assert!(matches!(second, SyncEvent::Finished(SyncOutcome::Completed(_))));
        assert!(start.elapsed() >= Duration::from_secs(60));

        task.shutdown().await;
    }
}
