//! Daemon lifecycle: startup, storage wiring, scheduler, HTTP server,
//! systemd notify, signal-driven shutdown

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{info, warn};

use uplink_core::config::{expand_tilde, UplinkConfig};
use uplink_storage::Credentials;
use uplink_sync::{
    EngineSettings, JsonTaskStore, NetworkMonitor, NetworkStatus, ProbeMonitor, StatusReporter,
    StorageProbe, StorageUploader, SyncEngine, SystemClock, TaskLedger, TaskStore,
    UploaderRegistry,
};

use crate::metrics::{HealthState, SyncMetrics};

/// Everything the HTTP layer and the scheduler share
pub struct Services {
    pub engine: Arc<SyncEngine>,
    pub network: Arc<dyn NetworkMonitor>,
    pub metrics: SyncMetrics,
    pub registry: Arc<Registry>,
}

pub async fn run(config: UplinkConfig) -> Result<()> {
    info!("daemon starting");

    // Shutdown signals are registered first so an early SIGTERM is not lost
    let signals = ShutdownSignals::register()?;

    // Build storage operator and verify connectivity
    let operator = match Credentials::from_env() {
        Ok(creds) => Some(
            uplink_storage::build_from_core_config(&config.storage, &creds)
                .context("building storage operator")?,
        ),
        Err(e) => {
            warn!("{e:#}  (queue accepts tasks but nothing is uploaded)");
            None
        }
    };

    let services = build_services(&config, operator).await?;

    let scheduler = services.engine.spawn_scheduler();

    match config.daemon.listen_addr.clone() {
        Some(addr) => {
            let app = crate::metrics::router(HealthState {
                registry: services.registry.clone(),
                metrics: services.metrics.clone(),
                network: services.network.clone(),
            })
            .merge(crate::api::router(crate::api::ApiState {
                engine: services.engine.clone(),
                metrics: services.metrics.clone(),
            }));

            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(addr = %addr, "http: listening on /metrics, /healthz, /readyz, /v1/*");

            notify_ready();

            axum::serve(listener, app)
                .with_graceful_shutdown(signals.recv())
                .await
                .context("http server")?;
        }
        None => {
            info!("http: disabled (no daemon.listen_addr)");
            notify_ready();
            signals.recv().await;
        }
    }

    info!("stopping scheduler (current batch completes first)");
    scheduler.shutdown().await;

    info!("uplinkd exiting cleanly");
    Ok(())
}

/// Wire store, uploaders, connectivity and metrics into a ready engine.
///
/// Without an operator the network is pinned offline: tasks are accepted
/// and persisted but never dispatched.
pub async fn build_services(
    config: &UplinkConfig,
    operator: Option<opendal::Operator>,
) -> Result<Services> {
    let queue_path = expand_tilde(&config.sync.queue_path);
    let store: Arc<dyn TaskStore> = Arc::new(JsonTaskStore::open(&queue_path));

    let mut registry = UploaderRegistry::new();
    let network: Arc<dyn NetworkMonitor> = match &operator {
        Some(op) => {
            for kind in &config.sync.upload_kinds {
                registry.register(
                    kind.clone(),
                    Arc::new(StorageUploader::new(op.clone(), &config.storage.remote_prefix)),
                );
            }

            let initial = match uplink_storage::check_health(op).await {
                Ok(()) => {
                    info!(endpoint = %config.storage.endpoint, "storage: connected");
                    true
                }
                Err(e) => {
                    warn!(endpoint = %config.storage.endpoint, "storage: {e}");
                    false
                }
            };
            Arc::new(ProbeMonitor::spawn(
                Arc::new(StorageProbe::new(op.clone())),
                config.sync.probe_interval(),
                initial,
            ))
        }
        None => Arc::new(NetworkStatus::new(false)),
    };

    let mut prom = Registry::default();
    let reporter = Arc::new(StatusReporter::new(Arc::new(TaskLedger::new(store.clone()))));
    let metrics = SyncMetrics::new(&mut prom, reporter);

    let engine = SyncEngine::open(
        store,
        Arc::new(registry),
        network.clone(),
        Arc::new(SystemClock),
        EngineSettings::from_config(&config.sync),
    )
    .with_observer(Arc::new(metrics.clone()));

    let snap = engine.status().context("reading task queue")?;
    info!(
        queue = %queue_path.display(),
        pending = snap.pending,
        processing = snap.processing,
        failed = snap.failed,
        kinds = ?config.sync.upload_kinds,
        "task queue opened"
    );
    metrics.refresh_queue();

    Ok(Services {
        engine: Arc::new(engine),
        network,
        metrics,
        registry: Arc::new(prom),
    })
}

struct ShutdownSignals {
    term: Signal,
    int: Signal,
}

impl ShutdownSignals {
    fn register() -> Result<Self> {
        Ok(ShutdownSignals {
            term: signal(SignalKind::terminate()).context("registering SIGTERM handler")?,
            int: signal(SignalKind::interrupt()).context("registering SIGINT handler")?,
        })
    }

    async fn recv(mut self) {
        tokio::select! {
            _ = self.term.recv() => info!("received SIGTERM"),
            _ = self.int.recv() => info!("received SIGINT"),
        }
    }
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
