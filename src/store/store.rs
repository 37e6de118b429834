use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::buffer::SampleBuffer;
use super::change::{Change, ChangeEvent, ChangeListener, ChangeSet};
use super::error::StoreError;
use super::sample::{RawFix, Sample};
use crate::config::{ConfigError, StoreConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Created,
    Running,
    /// Terminal.
    Stopped,
}

/// Everything a reader can see, copied under a single lock acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub current: Sample,
    pub buffer: Vec<Sample>,
    pub collecting: bool,
    pub revision: u64,
}

#[derive(Debug)]
struct Shared {
    state: StoreState,
    current: Sample,
    buffer: SampleBuffer,
    collecting: bool,
    revision: u64,
}

impl Shared {
    fn ensure_running(&self) -> Result<(), StoreError> {
        match self.state {
            StoreState::Created => Err(StoreError::NotStarted),
            StoreState::Running => Ok(()),
            StoreState::Stopped => Err(StoreError::Stopped),
        }
    }
}

/// Sole owner of the current sample and the retention buffer.
pub struct SampleStore {
    config: StoreConfig,
    shared: Mutex<Shared>,
    listener: Arc<dyn ChangeListener>,
    sink: Arc<dyn DiagnosticSink>,
}

impl SampleStore {
    pub fn new(
        config: StoreConfig,
        listener: Arc<dyn ChangeListener>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, ConfigError> {
        let buffer = SampleBuffer::with_capacity(
            config.retention_chrono()?,
            config.eviction,
            config.capacity_hint(),
        );
        Ok(Self {
            config,
            shared: Mutex::new(Shared {
                state: StoreState::Created,
                current: Sample::unavailable(Utc::now()),
                buffer,
                collecting: false,
                revision: 0,
            }),
            listener,
            sink,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state(&self) -> StoreState {
        self.lock().state
    }

    /// Idempotent while running. A stopped store cannot be restarted.
    pub fn start(&self) -> Result<(), StoreError> {
        let mut shared = self.lock();
        match shared.state {
            StoreState::Created => {
                shared.state = StoreState::Running;
                log::info!(
                    "Sample store started (retention {}, interval {})",
                    humantime::format_duration(self.config.retention),
                    humantime::format_duration(self.config.interval)
                );
                Ok(())
            }
            StoreState::Running => Ok(()),
            StoreState::Stopped => Err(StoreError::Stopped),
        }
    }

    /// Clears all samples and moves to the terminal state. Idempotent.
    pub fn stop(&self) {
        let mut shared = self.lock();
        if shared.state == StoreState::Stopped {
            return;
        }
        let dropped = shared.buffer.len();
        shared.state = StoreState::Stopped;
        shared.buffer.clear();
        shared.current = Sample::unavailable(Utc::now());
        shared.collecting = false;
        shared.revision += 1;
        log::info!("Sample store stopped ({} buffered samples dropped)", dropped);
    }

    /// Records a fix, or an unavailable marker when `fix` is `None`, and
    /// notifies the listener once. Partial fixes are stored as unavailable.
    pub fn submit(
        &self,
        fix: Option<RawFix>,
        observed_at: DateTime<Utc>,
    ) -> Result<ChangeSet, StoreError> {
        let position = fix.and_then(RawFix::into_position);
        let invalid = fix.filter(|_| position.is_none());
        let sample = match position {
            Some(position) => Sample::fix(position, observed_at),
            None => Sample::unavailable(observed_at),
        };

        let event = {
            let mut shared = self.lock();
            if let Err(e) = shared.ensure_running() {
                log::warn!("Rejected sample at {}: {}", observed_at, e);
                return Err(e);
            }

            let mut changes = ChangeSet::from(Change::CurrentSampleChanged);
            if sample.is_available() {
                if let Some(last) = shared.buffer.last() {
                    if last.timestamp() > observed_at {
                        log::debug!(
                            "Out-of-order sample at {} (newest buffered {})",
                            observed_at,
                            last.timestamp()
                        );
                    }
                }
                let evicted = shared.buffer.push(sample.clone());
                log::debug!(
                    "Buffered sample at {} ({} buffered, {} evicted)",
                    observed_at,
                    shared.buffer.len(),
                    evicted
                );
                shared.collecting = true;
                changes.insert(Change::BufferChanged);
            } else {
                log::debug!("Location unavailable at {}", observed_at);
                shared.collecting = false;
            }
            shared.current = sample;
            shared.revision += 1;

            ChangeEvent {
                changes,
                revision: shared.revision,
            }
        };

        if let Some(fix) = invalid {
            self.sink
                .report(Diagnostic::InvalidSample { fix, observed_at });
        }
        self.listener.publish(event);
        Ok(event.changes)
    }

    pub fn current_sample(&self) -> Result<Sample, StoreError> {
        self.read(|shared| shared.current.clone())
    }

    pub fn buffer_snapshot(&self) -> Result<Vec<Sample>, StoreError> {
        self.read(|shared| shared.buffer.snapshot())
    }

    pub fn is_collecting(&self) -> Result<bool, StoreError> {
        self.read(|shared| shared.collecting)
    }

    /// Newest buffered fix, which outlives a current sample gone unavailable.
    pub fn last_fix(&self) -> Result<Option<Sample>, StoreError> {
        self.read(|shared| shared.buffer.last().cloned())
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.read(|shared| StoreSnapshot {
            current: shared.current.clone(),
            buffer: shared.buffer.snapshot(),
            collecting: shared.collecting,
            revision: shared.revision,
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Shared) -> T) -> Result<T, StoreError> {
        let shared = self.lock();
        shared.ensure_running()?;
        Ok(f(&shared))
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Nothing panics while holding this lock; recover rather than cascade.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::testing::RecordingSink;
    use crate::store::Position;
    use chrono::{Duration, TimeZone};

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<ChangeEvent>>,
    }

    impl ChangeListener for RecordingListener {
        fn publish(&self, event: ChangeEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Fixture {
        store: SampleStore,
        listener: Arc<RecordingListener>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let listener = Arc::new(RecordingListener::default());
        let sink = Arc::new(RecordingSink::default());
        let store = SampleStore::new(StoreConfig::default(), listener.clone(), sink.clone())
            .unwrap();
        Fixture {
            store,
            listener,
            sink,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn rejects_everything_before_start() {
        let f = fixture();
        assert_eq!(f.store.state(), StoreState::Created);
        assert_eq!(
            f.store.submit(Some(RawFix::new(1.0, 2.0, 3.0)), t(0)),
            Err(StoreError::NotStarted)
        );
        assert_eq!(f.store.current_sample(), Err(StoreError::NotStarted));
        assert_eq!(f.store.buffer_snapshot(), Err(StoreError::NotStarted));
        assert_eq!(f.store.is_collecting(), Err(StoreError::NotStarted));
        assert!(f.listener.events.lock().unwrap().is_empty());
    }

    #[test]
    fn starts_with_unavailable_sample() {
        let f = fixture();
        f.store.start().unwrap();
        f.store.start().unwrap();
        let current = f.store.current_sample().unwrap();
        assert!(!current.is_available());
        assert!(f.store.buffer_snapshot().unwrap().is_empty());
        assert!(!f.store.is_collecting().unwrap());
        assert_eq!(f.store.last_fix().unwrap(), None);
    }

    #[test]
    fn window_scenario() {
        let f = fixture();
        f.store.start().unwrap();

        let changes = f
            .store
            .submit(Some(RawFix::new(10.0, 45.0, 100.0)), t(0))
            .unwrap();
        assert_eq!(changes, ChangeSet::ALL);
        let first = Sample::fix(
            Position {
                longitude: 10.0,
                latitude: 45.0,
                altitude: 100.0,
            },
            t(0),
        );
        assert_eq!(f.store.current_sample().unwrap(), first);
        assert_eq!(f.store.buffer_snapshot().unwrap(), vec![first.clone()]);
        assert!(f.store.is_collecting().unwrap());

        let changes = f.store.submit(None, t(1)).unwrap();
        assert_eq!(changes, Change::CurrentSampleChanged.into());
        let current = f.store.current_sample().unwrap();
        assert!(!current.is_available());
        assert_eq!(current.timestamp(), t(1));
        assert_eq!(f.store.buffer_snapshot().unwrap(), vec![first.clone()]);
        assert!(!f.store.is_collecting().unwrap());
        assert_eq!(f.store.last_fix().unwrap(), Some(first));

        f.store
            .submit(Some(RawFix::new(10.1, 45.1, 101.0)), t(301))
            .unwrap();
        let buffer = f.store.buffer_snapshot().unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].timestamp(), t(301));
        assert_eq!(buffer[0].longitude(), Some(10.1));

        let revisions: Vec<_> = f
            .listener
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.revision)
            .collect();
        assert_eq!(revisions, vec![1, 2, 3]);
    }

    #[test]
    fn window_invariant_holds_for_increasing_timestamps() {
        let f = fixture();
        f.store.start().unwrap();
        let retention = Duration::minutes(5);
        for i in 0..400 {
            let now = t(i * 3);
            f.store
                .submit(Some(RawFix::new(i as f64, 0.0, 0.0)), now)
                .unwrap();
            let buffer = f.store.buffer_snapshot().unwrap();
            assert!(buffer.iter().all(|s| s.timestamp() >= now - retention));
            assert_eq!(buffer.last().unwrap().timestamp(), now);
        }
    }

    #[test]
    fn partial_fix_is_normalized_and_reported() {
        let f = fixture();
        f.store.start().unwrap();
        f.store
            .submit(Some(RawFix::new(1.0, 1.0, 1.0)), t(0))
            .unwrap();
        let partial = RawFix {
            longitude: Some(2.0),
            latitude: None,
            altitude: Some(2.0),
        };
        let changes = f.store.submit(Some(partial), t(5)).unwrap();
        assert_eq!(changes, Change::CurrentSampleChanged.into());

        let current = f.store.current_sample().unwrap();
        assert!(!current.is_available());
        assert_eq!(current.longitude(), None);
        assert_eq!(current.altitude(), None);
        assert_eq!(f.store.buffer_snapshot().unwrap().len(), 1);
        assert_eq!(
            f.sink.take(),
            vec![Diagnostic::InvalidSample {
                fix: partial,
                observed_at: t(5)
            }]
        );
    }

    #[test]
    fn no_rate_limiting() {
        let f = fixture();
        f.store.start().unwrap();
        for _ in 0..100 {
            f.store
                .submit(Some(RawFix::new(1.0, 1.0, 1.0)), t(0))
                .unwrap();
        }
        assert_eq!(f.store.buffer_snapshot().unwrap().len(), 100);
    }

    #[test]
    fn stop_clears_and_is_terminal() {
        let f = fixture();
        f.store.start().unwrap();
        f.store
            .submit(Some(RawFix::new(1.0, 1.0, 1.0)), t(0))
            .unwrap();
        f.store.stop();
        f.store.stop();
        assert_eq!(f.store.state(), StoreState::Stopped);
        assert_eq!(
            f.store.submit(Some(RawFix::new(1.0, 1.0, 1.0)), t(1)),
            Err(StoreError::Stopped)
        );
        assert_eq!(f.store.snapshot(), Err(StoreError::Stopped));
        assert_eq!(f.store.start(), Err(StoreError::Stopped));

        let shared = f.store.lock();
        assert!(shared.buffer.is_empty());
        assert!(!shared.current.is_available());
        assert!(!shared.collecting);
    }

    #[test]
    fn snapshot_is_consistent() {
        let f = fixture();
        f.store.start().unwrap();
        f.store
            .submit(Some(RawFix::new(1.0, 1.0, 1.0)), t(0))
            .unwrap();
        let snapshot = f.store.snapshot().unwrap();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.buffer.last(), Some(&snapshot.current));
        assert!(snapshot.collecting);
    }
}
