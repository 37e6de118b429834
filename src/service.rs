use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use crate::broadcast::{Observer, SubscriptionId, UpdateBroadcaster};
use crate::config::{ConfigError, StoreConfig};
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::store::{ChangeSet, RawFix, Sample, SampleStore, StoreError, StoreSnapshot, StoreState};

/// The sample store with its broadcaster attached: what a host application
/// holds for the lifetime of its background service.
pub struct LocationService {
    store: SampleStore,
    broadcaster: Arc<UpdateBroadcaster>,
}

impl LocationService {
    pub fn new(config: StoreConfig) -> Result<Self, ConfigError> {
        Self::with_sink(config, Arc::new(LogSink))
    }

    pub fn with_sink(
        config: StoreConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, ConfigError> {
        let broadcaster = Arc::new(UpdateBroadcaster::new(sink.clone()));
        let store = SampleStore::new(config, broadcaster.clone(), sink)?;
        Ok(Self { store, broadcaster })
    }

    pub fn config(&self) -> &StoreConfig {
        self.store.config()
    }

    pub fn state(&self) -> StoreState {
        self.store.state()
    }

    pub fn start(&self) -> Result<(), StoreError> {
        self.store.start()
    }

    /// Tears the service down: clears the store, then unregisters every
    /// observer and releases async watchers. Returns without waiting for an
    /// observer callback that is still running.
    pub fn stop(&self) {
        self.store.stop();
        self.broadcaster.close();
    }

    pub fn submit(
        &self,
        fix: Option<RawFix>,
        observed_at: DateTime<Utc>,
    ) -> Result<ChangeSet, StoreError> {
        self.store.submit(fix, observed_at)
    }

    pub fn current_sample(&self) -> Result<Sample, StoreError> {
        self.store.current_sample()
    }

    pub fn buffer_snapshot(&self) -> Result<Vec<Sample>, StoreError> {
        self.store.buffer_snapshot()
    }

    pub fn is_collecting(&self) -> Result<bool, StoreError> {
        self.store.is_collecting()
    }

    pub fn last_fix(&self) -> Result<Option<Sample>, StoreError> {
        self.store.last_fix()
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.store.snapshot()
    }

    pub fn subscribe(
        &self,
        filter: ChangeSet,
        observer: impl Observer + 'static,
    ) -> Result<SubscriptionId, StoreError> {
        self.broadcaster.subscribe(filter, observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub fn watch(&self) -> Result<watch::Receiver<u64>, StoreError> {
        self.broadcaster.watch()
    }
}
