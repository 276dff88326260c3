//! Connectivity tracking.
//!
//! Transitions are published on a `tokio::sync::watch` channel; dropping the
//! receiver returned by `subscribe()` is the unsubscribe. Subscribers must
//! tolerate repeated notifications carrying the same value.

use async_trait::async_trait;
use opendal::Operator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub trait NetworkMonitor: Send + Sync {
    /// Point-in-time connectivity check
    fn is_online(&self) -> bool;
    /// Receiver that is notified on every published connectivity value
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Manually driven connectivity state
pub struct NetworkStatus {
    tx: watch::Sender<bool>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        NetworkStatus { tx }
    }

    /// Publish a connectivity value. Subscribers are notified even when the
    /// value is unchanged.
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

impl NetworkMonitor for NetworkStatus {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// ── Probing monitor ──────────────────────────────────────────────────────────

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true when the remote system is reachable.
    async fn probe(&self) -> bool;
}

/// Considers the network up when the storage backend answers a listing
pub struct StorageProbe {
    op: Operator,
}

impl StorageProbe {
    pub fn new(op: Operator) -> Self {
        StorageProbe { op }
    }
}

#[async_trait]
impl ConnectivityProbe for StorageProbe {
    async fn probe(&self) -> bool {
        uplink_storage::is_healthy(&self.op).await
    }
}

const MIN_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Polls a `ConnectivityProbe` and publishes transitions.
///
/// The polling task stops when the monitor is dropped.
pub struct ProbeMonitor {
    status: Arc<NetworkStatus>,
    task: JoinHandle<()>,
}

impl ProbeMonitor {
    /// Start polling. The monitor reports `initial` until the first probe
    /// completes. Intervals below one second are raised to one second.
    pub fn spawn(probe: Arc<dyn ConnectivityProbe>, every: Duration, initial: bool) -> Self {
        let every = every.max(MIN_PROBE_INTERVAL);
        let status = Arc::new(NetworkStatus::new(initial));
        let publisher = status.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = tokio::time::timeout(every, probe.probe())
                    .await
                    .unwrap_or(false);
                let was = publisher.is_online();
                if online != was {
                    if online {
                        info!("connectivity: remote reachable");
                    } else {
                        warn!("connectivity: remote unreachable");
                    }
                    publisher.set_online(online);
                } else {
                    debug!(online, "connectivity probe");
                }
            }
        });

        ProbeMonitor { status, task }
    }
}

impl NetworkMonitor for ProbeMonitor {
    fn is_online(&self) -> bool {
        self.status.is_online()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }
}

impl Drop for ProbeMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagProbe(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for FlagProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn status_notifies_on_duplicate_values() {
        let status = NetworkStatus::new(false);
        let mut rx = status.subscribe();

        status.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        status.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(status.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_monitor_publishes_transitions() {
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let monitor = ProbeMonitor::spawn(probe.clone(), Duration::from_secs(10), false);
        let mut rx = monitor.subscribe();

        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_online());

        probe.0.store(false, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_probe_interval_still_polls() {
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let monitor = ProbeMonitor::spawn(probe, Duration::ZERO, false);
        let mut rx = monitor.subscribe();

        rx.changed().await.unwrap();
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn storage_probe_on_memory_backend() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        assert!(StorageProbe::new(op).probe().await);
    }
}
