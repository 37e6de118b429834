use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::watch;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::store::{ChangeEvent, ChangeListener, ChangeSet, StoreError};

pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Called from the dispatcher thread with the changes that happened since its
/// previous call. Observers re-read the store for the actual state.
pub trait Observer: Send + Sync {
    fn on_change(&self, changes: ChangeSet) -> ObserverResult;
}

impl<F> Observer for F
where
    F: Fn(ChangeSet) -> ObserverResult + Send + Sync,
{
    fn on_change(&self, changes: ChangeSet) -> ObserverResult {
        self(changes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    filter: ChangeSet,
    observer: Arc<dyn Observer>,
}

#[derive(Default)]
struct Registry {
    pending: ChangeSet,
    subscribers: Vec<Subscriber>,
    delivering: bool,
    closed: bool,
}

struct Inner {
    registry: Mutex<Registry>,
    wake: Condvar,
    sink: Arc<dyn DiagnosticSink>,
}

/// Fans store changes out to observers on a dedicated dispatcher thread.
///
/// Publishing only marks change kinds as pending; the dispatcher drains them,
/// so bursts collapse into one call per observer and a slow observer never
/// holds up the producer.
pub struct UpdateBroadcaster {
    inner: Arc<Inner>,
    next_id: AtomicU64,
    revision: Mutex<Option<watch::Sender<u64>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateBroadcaster {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        let inner = Arc::new(Inner {
            registry: Mutex::new(Registry::default()),
            wake: Condvar::new(),
            sink,
        });
        let worker = inner.clone();
        let dispatcher = thread::spawn(move || worker.dispatch_loop());
        let (revision, _) = watch::channel(0);

        Self {
            inner,
            next_id: AtomicU64::new(1),
            revision: Mutex::new(Some(revision)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn subscribe(
        &self,
        filter: ChangeSet,
        observer: impl Observer + 'static,
    ) -> Result<SubscriptionId, StoreError> {
        let mut registry = lock(&self.inner.registry);
        if registry.closed {
            return Err(StoreError::Stopped);
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        registry.subscribers.push(Subscriber {
            id,
            filter,
            observer: Arc::new(observer),
        });
        log::debug!("Observer {} subscribed to {}", id, filter);
        Ok(id)
    }

    /// Returns false if `id` was not registered. A dispatch already in
    /// progress may still reach the observer once.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = lock(&self.inner.registry);
        let before = registry.subscribers.len();
        registry.subscribers.retain(|s| s.id != id);
        let removed = registry.subscribers.len() != before;
        if removed {
            log::debug!("Observer {} unsubscribed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.registry).subscribers.len()
    }

    /// Latest published revision, for async consumers.
    pub fn watch(&self) -> Result<watch::Receiver<u64>, StoreError> {
        lock(&self.revision)
            .as_ref()
            .map(watch::Sender::subscribe)
            .ok_or(StoreError::Stopped)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.registry).closed
    }

    /// Unregisters every observer, releases watchers and stops the
    /// dispatcher. Safe to call from inside an observer.
    ///
    /// Never waits on observer code: if a callback is running, the dispatcher
    /// is detached and exits once that callback returns, without calling any
    /// further observers.
    pub fn close(&self) {
        let (unregistered, delivering) = {
            let mut registry = lock(&self.inner.registry);
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry.pending = ChangeSet::NONE;
            (
                std::mem::take(&mut registry.subscribers).len(),
                registry.delivering,
            )
        };
        self.inner.wake.notify_all();
        lock(&self.revision).take();

        if let Some(handle) = lock(&self.dispatcher).take() {
            if delivering || handle.thread().id() == thread::current().id() {
                log::debug!("Detaching update dispatcher with a delivery in progress");
            } else if handle.join().is_err() {
                log::error!("Update dispatcher terminated abnormally");
            }
        }
        log::info!(
            "Update broadcaster closed ({} observers unregistered)",
            unregistered
        );
    }
}

impl ChangeListener for UpdateBroadcaster {
    fn publish(&self, event: ChangeEvent) {
        if let Some(revision) = lock(&self.revision).as_ref() {
            revision.send_if_modified(|current| {
                if event.revision > *current {
                    *current = event.revision;
                    true
                } else {
                    false
                }
            });
        }

        {
            let mut registry = lock(&self.inner.registry);
            if registry.closed {
                return;
            }
            registry.pending = registry.pending | event.changes;
        }
        self.inner.wake.notify_one();
    }
}

impl Drop for UpdateBroadcaster {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn dispatch_loop(&self) {
        loop {
            let targets = {
                let mut registry = lock(&self.registry);
                registry.delivering = false;
                while registry.pending.is_empty() && !registry.closed {
                    registry = self
                        .wake
                        .wait(registry)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                if registry.closed {
                    return;
                }
                let changes = std::mem::take(&mut registry.pending);
                registry.delivering = true;
                registry
                    .subscribers
                    .iter()
                    .filter(|s| s.filter.intersects(changes))
                    .map(|s| (s.id, s.filter & changes, s.observer.clone()))
                    .collect::<Vec<_>>()
            };

            for (id, changes, observer) in targets {
                if lock(&self.registry).closed {
                    return;
                }
                self.deliver(id, changes, observer.as_ref());
            }
        }
    }

    fn deliver(&self, id: SubscriptionId, changes: ChangeSet, observer: &dyn Observer) {
        log::trace!("Delivering {} to observer {}", changes, id);
        let reason = match panic::catch_unwind(AssertUnwindSafe(|| observer.on_change(changes))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        self.sink.report(Diagnostic::ObserverFailure {
            subscription: id,
            reason,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Observers run outside every lock, so poisoning can only come from here.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
