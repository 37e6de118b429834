use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::ProviderError;
use super::types::ProviderEvent;
use crate::config::{Config, RequestConfig};
use crate::service::LocationService;
use crate::store::StoreError;

/// Why an adapter worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterExit {
    Stopped,
    SourceClosed,
    StoreStopped,
}

#[derive(Debug)]
struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<AdapterExit>,
}

/// Feeds provider events into a `LocationService`. Stopping the adapter
/// leaves the service state untouched, so it can be restarted with a new
/// source.
pub struct ProviderAdapter {
    service: Arc<LocationService>,
    request: RequestConfig,
    interval: std::time::Duration,
    fastest_interval: std::time::Duration,
    worker: Option<WorkerHandle>,
}

impl ProviderAdapter {
    pub fn new(service: Arc<LocationService>, config: &Config) -> Self {
        Self {
            service,
            request: config.request,
            interval: config.store.interval,
            fastest_interval: config.fastest_interval(),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.join.is_finished())
    }

    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, events: mpsc::Receiver<ProviderEvent>) -> Result<(), ProviderError> {
        if self.is_running() {
            return Err(ProviderError::AlreadyRunning);
        }
        self.worker = None;

        log::info!(
            "Requesting location updates every {} (fastest {}, max wait {}, {:?})",
            humantime::format_duration(self.interval),
            humantime::format_duration(self.fastest_interval),
            humantime::format_duration(self.request.max_wait),
            self.request.priority
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let service = self.service.clone();
        let join = tokio::spawn(run_adapter_loop(service, events, stop_rx));
        self.worker = Some(WorkerHandle { stop_tx, join });
        Ok(())
    }

    /// Stops the worker and waits for it. Returns `None` if none was started.
    pub async fn stop(&mut self) -> Option<AdapterExit> {
        let worker = self.worker.take()?;
        let _ = worker.stop_tx.send(());
        let exit = join_worker(worker.join).await;
        log::info!("Location updates stopped ({:?})", exit);
        Some(exit)
    }

    /// Waits for the worker to finish on its own, e.g. when the source closes.
    pub async fn wait(&mut self) -> Option<AdapterExit> {
        let worker = self.worker.take()?;
        Some(join_worker(worker.join).await)
    }
}

async fn join_worker(join: JoinHandle<AdapterExit>) -> AdapterExit {
    match join.await {
        Ok(exit) => exit,
        Err(e) => {
            log::error!("Provider adapter worker failed: {}", e);
            AdapterExit::Stopped
        }
    }
}

/// Translates one provider event into a store submission. Regained
/// availability carries no fix, so it only waits for the next location.
pub fn apply_event(service: &LocationService, event: ProviderEvent) -> Result<(), StoreError> {
    match event {
        ProviderEvent::Location { fix, at } => service.submit(Some(fix), at).map(|_| ()),
        ProviderEvent::Availability {
            available: false,
            at,
        } => {
            log::info!("Location unavailable since {}", at);
            service.submit(None, at).map(|_| ())
        }
        ProviderEvent::Availability {
            available: true,
            at,
        } => {
            log::info!("Location available again since {}", at);
            Ok(())
        }
    }
}

async fn run_adapter_loop(
    service: Arc<LocationService>,
    mut events: mpsc::Receiver<ProviderEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) -> AdapterExit {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut stop_rx => return AdapterExit::Stopped,
        };
        let Some(event) = event else {
            return AdapterExit::SourceClosed;
        };

        match apply_event(&service, event) {
            Ok(()) => {}
            // Rejected before start; the provider keeps delivering.
            Err(StoreError::NotStarted) => {}
            Err(StoreError::Stopped) => return AdapterExit::StoreStopped,
        }
    }
}
