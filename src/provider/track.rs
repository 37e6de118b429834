use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::error::TrackError;
use super::types::ProviderEvent;
use crate::store::RawFix;

/// A recorded or scripted provider feed, replayable through a `ProviderAdapter`.
///
/// ```yaml
/// steps:
///   - time: T+0s
///     fix: { longitude: 10.0, latitude: 45.0, altitude: 100.0 }
///   - available: false
///   - time: 2026-01-12T10:05:00Z
///     fix: { longitude: 10.1, latitude: 45.1, altitude: 101.0 }
/// ```
///
/// Steps without `time` follow the previous step after one interval.
#[derive(Debug, Clone)]
pub struct Track {
    pub steps: Vec<TrackStep>,
}

#[derive(Debug, Clone)]
pub struct TrackStep {
    pub time: Option<StepTime>,
    pub event: TrackEvent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackEvent {
    Fix(RawFix),
    Unavailable,
    Available,
}

/// When a step fires: `T+<duration>` after the replay start, or a fixed
/// RFC 3339 instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepTime {
    After(Duration),
    At(DateTime<Utc>),
}

impl StepTime {
    /// `None` when the result falls outside the representable range.
    pub fn resolve(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            StepTime::After(offset) => start.checked_add_signed(*offset),
            StepTime::At(at) => Some(*at),
        }
    }
}

impl FromStr for StepTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(offset) = s.strip_prefix(['T', 't']) else {
            return DateTime::parse_from_rfc3339(s)
                .map(|at| StepTime::At(at.with_timezone(&Utc)))
                .map_err(|e| format!("'{}': {}", s, e));
        };

        let offset = offset.trim_start();
        if offset.starts_with('-') {
            return Err(format!("'{}': offsets count forward from the start", s));
        }
        let Some(offset) = offset.strip_prefix('+') else {
            return Err(format!("'{}': expected T+<duration>", s));
        };
        let offset = humantime::parse_duration(offset.trim()).map_err(|e| format!("'{}': {}", s, e))?;
        Duration::from_std(offset)
            .map(StepTime::After)
            .map_err(|_| format!("'{}': offset out of range", s))
    }
}

impl fmt::Display for StepTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepTime::After(offset) => match offset.to_std() {
                Ok(offset) => write!(f, "T+{}", humantime::format_duration(offset)),
                Err(_) => write!(f, "T+{}", offset),
            },
            StepTime::At(at) => write!(f, "{}", at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepFields {
    time: Option<String>,
    fix: Option<RawFix>,
    available: Option<bool>,
}

impl Track {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_str(&yaml)
    }

    pub fn from_str(yaml: &str) -> Result<Self, TrackError> {
        let root: serde_yaml::Value = serde_yaml::from_str(yaml)?;

        let steps = root
            .get("steps")
            .and_then(|v| v.as_sequence())
            .ok_or_else(|| TrackError::Step(0, "missing 'steps'".into()))?
            .iter()
            .enumerate()
            .map(|(i, v)| parse_step(i, v))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Track { steps })
    }

    /// Resolves every step to a timestamped event. Fails on the first step
    /// whose time cannot be represented.
    pub fn schedule(
        &self,
        start: DateTime<Utc>,
        interval: std::time::Duration,
    ) -> Result<Vec<ProviderEvent>, TrackError> {
        let interval = Duration::from_std(interval)
            .map_err(|_| TrackError::Interval(humantime::format_duration(interval).to_string()))?;
        let mut previous: Option<DateTime<Utc>> = None;
        let mut events = Vec::with_capacity(self.steps.len());

        for (i, step) in self.steps.iter().enumerate() {
            let at = match (&step.time, previous) {
                (Some(time), _) => time.resolve(start),
                (None, Some(prev)) => prev.checked_add_signed(interval),
                (None, None) => Some(start),
            }
            .ok_or_else(|| TrackError::Step(i, format!("time out of range from {}", start)))?;
            previous = Some(at);

            events.push(match step.event {
                TrackEvent::Fix(fix) => ProviderEvent::Location { fix, at },
                TrackEvent::Unavailable => ProviderEvent::Availability {
                    available: false,
                    at,
                },
                TrackEvent::Available => ProviderEvent::Availability {
                    available: true,
                    at,
                },
            });
        }

        Ok(events)
    }

    /// Sends the scheduled events into `tx`, each at its offset from `start`
    /// on the tokio clock. Returns how many were delivered; nothing is sent
    /// when the track cannot be scheduled.
    pub async fn replay(
        &self,
        start: DateTime<Utc>,
        interval: std::time::Duration,
        tx: mpsc::Sender<ProviderEvent>,
    ) -> Result<usize, TrackError> {
        let events = self.schedule(start, interval)?;
        let origin = Instant::now();
        let mut sent = 0;

        for event in events {
            // Instants before `start` fire immediately.
            let offset = event
                .at()
                .signed_duration_since(start)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            sleep_until(origin + offset).await;

            if tx.send(event).await.is_err() {
                log::warn!("Replay receiver closed after {} events", sent);
                break;
            }
            sent += 1;
        }

        Ok(sent)
    }
}

fn parse_step(i: usize, value: &serde_yaml::Value) -> Result<TrackStep, TrackError> {
    let err = |msg: &str| TrackError::Step(i, msg.into());
    let fields: StepFields =
        serde_yaml::from_value(value.clone()).map_err(|e| err(&e.to_string()))?;

    let time = fields
        .time
        .as_deref()
        .map(StepTime::from_str)
        .transpose()
        .map_err(|e| err(&e))?;

    let event = match (fields.fix, fields.available) {
        (Some(fix), None) => TrackEvent::Fix(fix),
        (None, Some(false)) => TrackEvent::Unavailable,
        (None, Some(true)) => TrackEvent::Available,
        (Some(_), Some(_)) => return Err(err("'fix' and 'available' are exclusive")),
        (None, None) => return Err(err("expected 'fix' or 'available'")),
    };

    Ok(TrackStep { time, event })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TRACK: &str = r#"
steps:
  - time: T+0s
    fix: { longitude: 10.0, latitude: 45.0, altitude: 100.0 }
  - available: false
  - time: T+301s
    fix: { longitude: 10.1, latitude: 45.1, altitude: 101.0 }
  - fix: { longitude: 10.2, latitude: 45.2 }
"#;

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn parses_steps() {
        let track = Track::from_str(TRACK).unwrap();
        assert_eq!(track.steps.len(), 4);
        assert_eq!(track.steps[1].event, TrackEvent::Unavailable);
        assert_eq!(
            track.steps[2].time,
            Some(StepTime::After(Duration::seconds(301)))
        );
        match track.steps[3].event {
            TrackEvent::Fix(fix) => assert_eq!(fix.altitude, None),
            ref other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn untimed_steps_follow_interval() {
        let track = Track::from_str(TRACK).unwrap();
        let events = track
            .schedule(start(), std::time::Duration::from_secs(5))
            .unwrap();
        let offsets: Vec<_> = events
            .iter()
            .map(|e| (e.at() - start()).num_seconds())
            .collect();
        assert_eq!(offsets, vec![0, 5, 301, 306]);
        assert!(matches!(
            events[1],
            ProviderEvent::Availability {
                available: false,
                ..
            }
        ));
    }

    #[test]
    fn parses_step_times() {
        assert_eq!(
            "t+1h 30m".parse::<StepTime>().unwrap(),
            StepTime::After(Duration::minutes(90))
        );
        assert_eq!(
            " T + 10s ".parse::<StepTime>().unwrap(),
            StepTime::After(Duration::seconds(10))
        );
        assert_eq!(
            "2026-01-12T10:00:00+01:00".parse::<StepTime>().unwrap(),
            StepTime::At(Utc.with_ymd_and_hms(2026, 1, 12, 9, 0, 0).unwrap())
        );
        assert_eq!(StepTime::After(Duration::seconds(90)).to_string(), "T+1m 30s");
    }

    #[test]
    fn rejects_unsupported_step_times() {
        for time in ["T-5m", "T5m", "soon", "2026-01-12T10:00:00Z - 10s"] {
            assert!(time.parse::<StepTime>().is_err(), "{}", time);
        }
        assert!(matches!(
            Track::from_str("steps:\n  - time: T-1s\n    available: false\n"),
            Err(TrackError::Step(0, _))
        ));
    }

    #[test]
    fn unrepresentable_offset_fails_to_schedule() {
        let track = Track::from_str(
            "steps:\n  - time: T+0s\n    available: true\n  - time: T+1000000y\n    available: false\n",
        )
        .unwrap();
        assert!(matches!(
            track.schedule(start(), std::time::Duration::from_secs(5)),
            Err(TrackError::Step(1, _))
        ));
    }

    #[test]
    fn unrepresentable_interval_step_fails_to_schedule() {
        let track = Track::from_str(
            "steps:\n  - time: 9999-12-31T23:59:59Z\n    available: false\n  - available: true\n",
        )
        .unwrap();
        let years = std::time::Duration::from_secs(1_000_000 * 365 * 86_400);
        assert!(matches!(
            track.schedule(start(), years),
            Err(TrackError::Step(1, _))
        ));
        assert!(track
            .schedule(start(), std::time::Duration::from_secs(5))
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unschedulable_track_sends_nothing() {
        let track = Track::from_str(
            "steps:\n  - available: false\n  - time: T+1000000y\n    available: true\n",
        )
        .unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let result = track
            .replay(start(), std::time::Duration::from_secs(5), tx)
            .await;
        assert!(matches!(result, Err(TrackError::Step(1, _))));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn rejects_bad_steps() {
        assert!(matches!(
            Track::from_str("nothing: here"),
            Err(TrackError::Step(0, _))
        ));
        assert!(matches!(
            Track::from_str("steps:\n  - time: T+1s\n"),
            Err(TrackError::Step(0, _))
        ));
        assert!(matches!(
            Track::from_str(
                "steps:\n  - fix: { longitude: 1.0 }\n  - fix: { longitude: 1.0 }\n    available: true\n"
            ),
            Err(TrackError::Step(1, _))
        ));
        assert!(matches!(
            Track::from_str("steps:\n  - available: false\n    speed: 3\n"),
            Err(TrackError::Step(0, _))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn replay_paces_events() {
        let track = Track::from_str(TRACK).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let origin = Instant::now();
        let replay = tokio::spawn(async move {
            track
                .replay(start(), std::time::Duration::from_secs(5), tx)
                .await
        });

        let mut elapsed = Vec::new();
        while rx.recv().await.is_some() {
            elapsed.push(origin.elapsed().as_secs());
        }
        assert_eq!(replay.await.unwrap().unwrap(), 4);
        assert_eq!(elapsed, vec![0, 5, 301, 306]);
    }
}
