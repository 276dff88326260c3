//! Sync scheduler: decides *when* the queue processor runs.
//!
//! Three triggers feed the same `QueueProcessor::run()`:
//!   - periodic tick while online and the queue has work
//!   - connectivity recovery, after a settle delay
//!   - manual `sync_now()` requests from the handle
//!
//! Losing connectivity pauses the periodic tick but never interrupts an
//! in-flight run. The loop reacts to connectivity *transitions* only, so
//! repeated notifications with an unchanged value are ignored.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use uplink_core::types::RunSummary;
use uplink_core::{UplinkError, UplinkResult};

use crate::network::NetworkMonitor;
use crate::processor::QueueProcessor;
use crate::status::StatusReporter;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub settle_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            interval: Duration::from_secs(30),
            settle_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    NetworkRecovered,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Periodic => "periodic",
            Trigger::NetworkRecovered => "network_recovered",
            Trigger::Manual => "manual",
        }
    }
}

enum Command {
    SyncNow(oneshot::Sender<UplinkResult<RunSummary>>),
}

pub struct SyncScheduler {
    processor: Arc<QueueProcessor>,
    reporter: Arc<StatusReporter>,
    network: Arc<dyn NetworkMonitor>,
    settings: SchedulerSettings,
}

impl SyncScheduler {
    pub fn new(
        processor: Arc<QueueProcessor>,
        reporter: Arc<StatusReporter>,
        network: Arc<dyn NetworkMonitor>,
        settings: SchedulerSettings,
    ) -> Self {
        SyncScheduler {
            processor,
            reporter,
            network,
            settings,
        }
    }

    /// Start the scheduling loop. Dropping the returned handle stops it.
    pub fn spawn(self) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Subscribe before spawning so no transition published after this
        // call can be missed.
        let net = self.network.subscribe();
        let processor = self.processor.clone();
        let join = tokio::spawn(self.run_loop(net, cmd_rx, shutdown_rx));
        SchedulerHandle {
            processor,
            commands: cmd_tx,
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run_loop(
        self,
        mut net: watch::Receiver<bool>,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.settings.interval;
        let mut online = *net.borrow_and_update();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticking = online;
        let mut settle_until: Option<Instant> = None;
        let mut monitor_closed = false;

        info!(online, interval_secs = period.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                cmd = commands.recv() => match cmd {
                    Some(Command::SyncNow(reply)) => {
                        let result = self.trigger(Trigger::Manual).await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },

                changed = net.changed(), if !monitor_closed => {
                    if changed.is_err() {
                        warn!("network monitor closed, connectivity state frozen");
                        monitor_closed = true;
                        continue;
                    }
                    let now_online = *net.borrow_and_update();
                    match (online, now_online) {
                        (false, true) => {
                            info!(
                                settle_secs = self.settings.settle_delay.as_secs(),
                                "network recovered, waiting to settle"
                            );
                            settle_until = Some(Instant::now() + self.settings.settle_delay);
                        }
                        (true, false) => {
                            info!("network lost, periodic sync paused");
                            ticking = false;
                            settle_until = None;
                        }
                        _ => debug!(online = now_online, "repeated connectivity notification ignored"),
                    }
                    online = now_online;
                }

                _ = tokio::time::sleep_until(settle_until.unwrap_or_else(Instant::now)),
                    if settle_until.is_some() =>
                {
                    settle_until = None;
                    let _ = self.trigger(Trigger::NetworkRecovered).await;
                    ticker.reset();
                    ticking = true;
                }

                _ = ticker.tick(), if ticking => {
                    if self.has_work() {
                        let _ = self.trigger(Trigger::Periodic).await;
                    } else {
                        trace!("periodic tick: queue idle");
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    fn has_work(&self) -> bool {
        match self.reporter.snapshot() {
            Ok(snap) => snap.pending + snap.processing > 0,
            Err(e) => {
                warn!(error = %e, "periodic tick: cannot read queue status");
                false
            }
        }
    }

    async fn trigger(&self, trigger: Trigger) -> UplinkResult<RunSummary> {
        debug!(trigger = trigger.as_str(), "sync run requested");
        let result = self.processor.run().await;
        match &result {
            Ok(s) if s.already_running => {
                debug!(trigger = trigger.as_str(), "sync already in progress")
            }
            Ok(s) if s.network_error => debug!(trigger = trigger.as_str(), "sync skipped: offline"),
            Ok(_) => {}
            Err(e) => error!(trigger = trigger.as_str(), error = %e, "sync run failed"),
        }
        result
    }
}

/// Control handle for a running scheduler
pub struct SchedulerHandle {
    processor: Arc<QueueProcessor>,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request an immediate run and wait for its summary.
    ///
    /// Answers `already_running` at once while a periodic or recovery run is
    /// in flight instead of queueing behind it.
    pub async fn sync_now(&self) -> UplinkResult<RunSummary> {
        if self.processor.is_running() {
            debug!(trigger = Trigger::Manual.as_str(), "sync already in progress");
            return Ok(RunSummary::already_running());
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SyncNow(tx))
            .await
            .map_err(|_| UplinkError::Other(anyhow::anyhow!("scheduler is not running")))?;
        rx.await
            .map_err(|_| UplinkError::Other(anyhow::anyhow!("scheduler stopped before replying")))?
    }

    /// Stop the loop and wait for it to exit. A run in progress completes
    /// first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!("scheduler task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::network::NetworkStatus;
    use crate::processor::{ProcessorSettings, RunObserver};
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryTaskStore, TaskLedger, TaskStore};
    use crate::uploader::{RemoteUploader, UploadOutcome};
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};
    use uplink_core::types::{SyncTask, TaskState};

    struct Fixed(bool);

    #[async_trait]
    impl RemoteUploader for Fixed {
        async fn upload(&self, _: &str, _: &serde_json::Value) -> UplinkResult<UploadOutcome> {
            Ok(if self.0 {
                UploadOutcome::success("id", "ok")
            } else {
                UploadOutcome::failure("HTTP 502")
            })
        }
    }

    struct ChannelObserver(mpsc::UnboundedSender<RunSummary>);

    impl RunObserver for ChannelObserver {
        fn run_finished(&self, summary: &RunSummary) {
            let _ = self.0.send(summary.clone());
        }
        fn run_failed(&self, _: &UplinkError) {}
    }

    struct Harness {
        store: Arc<MemoryTaskStore>,
        network: Arc<NetworkStatus>,
        runs: mpsc::UnboundedReceiver<RunSummary>,
        handle: SchedulerHandle,
    }

    fn start(online: bool, succeed: bool, tasks: usize) -> Harness {
        let seed = (0..tasks)
            .map(|_| SyncTask::new("photo_upload", serde_json::json!({}), 1))
            .collect();
        let store = Arc::new(MemoryTaskStore::with_tasks(seed));
        let ledger = Arc::new(TaskLedger::new(store.clone()));
        let network = Arc::new(NetworkStatus::new(online));
        let (tx, runs) = mpsc::unbounded_channel();

        let processor = QueueProcessor::new(
            ledger.clone(),
            Arc::new(Fixed(succeed)),
            network.clone(),
            Arc::new(ManualClock::new(100)),
            RetryPolicy::new(3),
            ProcessorSettings::default(),
        )
        .with_observer(Arc::new(ChannelObserver(tx)));

        let handle = SyncScheduler::new(
            Arc::new(processor),
            Arc::new(StatusReporter::new(ledger)),
            network.clone(),
            SchedulerSettings::default(),
        )
        .spawn();

        Harness {
            store,
            network,
            runs,
            handle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_runs_once_after_settle_delay() {
        let mut h = start(false, true, 2);
        let began = Instant::now();

        h.network.set_online(true);
        h.network.set_online(true);
        h.network.set_online(true);

        let summary = h.runs.recv().await.unwrap();
        let waited = began.elapsed();
        assert!(waited >= Duration::from_secs(5), "ran after {waited:?}");
        assert!(waited < Duration::from_secs(6), "ran after {waited:?}");
        assert_eq!(summary.succeeded, 2);

        // Queue is drained, so neither duplicates nor periodic ticks run again
        let extra = tokio::time::timeout(Duration::from_secs(120), h.runs.recv()).await;
        assert!(extra.is_err(), "unexpected extra run");
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_tick_retries_until_failed() {
        let mut h = start(true, false, 1);
        let began = Instant::now();

        for expected in 1..=3u64 {
            let summary = h.runs.recv().await.unwrap();
            assert_eq!(summary.processed, 1);
            let elapsed = began.elapsed().as_secs();
            assert!(elapsed >= 30 * expected && elapsed < 30 * expected + 1);
        }

        let task = &h.store.load().unwrap()[0];
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempts, 3);

        let extra = tokio::time::timeout(Duration::from_secs(120), h.runs.recv()).await;
        assert!(extra.is_err(), "failed task must not be retried automatically");
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn network_loss_pauses_ticks_until_recovery() {
        let mut h = start(true, false, 1);
        h.network.set_online(false);

        let quiet = tokio::time::timeout(Duration::from_secs(120), h.runs.recv()).await;
        assert!(quiet.is_err(), "no runs while offline");

        let back = Instant::now();
        h.network.set_online(true);
        h.runs.recv().await.unwrap();
        assert!(back.elapsed() >= Duration::from_secs(5));

        // Recovery restarts the periodic tick one interval after that run
        let recovered = Instant::now();
        let next = tokio::time::timeout(Duration::from_secs(60), h.runs.recv()).await;
        assert!(next.is_ok(), "periodic tick did not resume after recovery");
        let gap = recovered.elapsed();
        assert!(gap >= Duration::from_secs(30), "next run after {gap:?}");
        assert!(gap < Duration::from_secs(31), "next run after {gap:?}");
        h.handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flap_during_settle_cancels_recovery_run() {
        let mut h = start(false, true, 1);
        h.network.set_online(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.network.set_online(false);

        let quiet = tokio::time::timeout(Duration::from_secs(60), h.runs.recv()).await;
        assert!(quiet.is_err());
        assert_eq!(h.store.load().unwrap()[0].attempts, 0);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn manual_sync_during_active_run_reports_already_running() {
        struct Held {
            entered: Notify,
            gate: Semaphore,
        }

        #[async_trait]
        impl RemoteUploader for Held {
            async fn upload(&self, _: &str, _: &serde_json::Value) -> UplinkResult<UploadOutcome> {
                self.entered.notify_one();
                let _permit = self.gate.acquire().await.expect("gate closed");
                Ok(UploadOutcome::success("id", "ok"))
            }
        }

        let store = Arc::new(MemoryTaskStore::with_tasks(vec![SyncTask::new(
            "photo_upload",
            serde_json::json!({}),
            1,
        )]));
        let ledger = Arc::new(TaskLedger::new(store.clone()));
        let network = Arc::new(NetworkStatus::new(true));
        let uploader = Arc::new(Held {
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let processor = Arc::new(QueueProcessor::new(
            ledger.clone(),
            uploader.clone(),
            network.clone(),
            Arc::new(ManualClock::new(100)),
            RetryPolicy::new(3),
            ProcessorSettings::default(),
        ));
        let handle = SyncScheduler::new(
            processor.clone(),
            Arc::new(StatusReporter::new(ledger)),
            network,
            SchedulerSettings::default(),
        )
        .spawn();

        let active = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run().await })
        };
        uploader.entered.notified().await;

        let summary = handle.sync_now().await.unwrap();
        assert!(summary.already_running);
        assert_eq!(summary.processed, 0);

        uploader.gate.add_permits(1);
        assert_eq!(active.await.unwrap().unwrap().processed, 1);
        assert_eq!(store.load().unwrap()[0].state, TaskState::Completed);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sync_bypasses_interval() {
        let h = start(true, true, 3);
        let summary = h.handle.sync_now().await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.remaining, 0);

        h.network.set_online(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let offline = h.handle.sync_now().await.unwrap();
        assert!(offline.network_error);
        h.handle.shutdown().await;
    }
}
