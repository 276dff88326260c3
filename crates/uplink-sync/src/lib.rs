//! uplink-sync: offline-first upload queue with bounded retries and
//! connectivity-aware scheduling

pub mod clock;
pub mod engine;
pub mod network;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod uploader;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineSettings, SyncEngine};
pub use network::{ConnectivityProbe, NetworkMonitor, NetworkStatus, ProbeMonitor, StorageProbe};
pub use processor::{ProcessorSettings, QueueProcessor, RunObserver};
pub use retry::RetryPolicy;
pub use scheduler::{SchedulerHandle, SchedulerSettings, SyncScheduler};
pub use status::StatusReporter;
pub use store::{JsonTaskStore, MemoryTaskStore, TaskLedger, TaskStore};
pub use uploader::{RemoteUploader, StorageUploader, UploadOutcome, UploaderRegistry};
