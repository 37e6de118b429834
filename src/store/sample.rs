use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A complete coordinate triple. Partial fixes never make it this far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
}

/// A fix as delivered by a location provider, before validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

impl RawFix {
    pub fn new(longitude: f64, latitude: f64, altitude: f64) -> Self {
        Self {
            longitude: Some(longitude),
            latitude: Some(latitude),
            altitude: Some(altitude),
        }
    }

    /// Returns the position only if every coordinate is present and finite.
    pub fn into_position(self) -> Option<Position> {
        let finite = |v: Option<f64>| v.filter(|v| v.is_finite());
        Some(Position {
            longitude: finite(self.longitude)?,
            latitude: finite(self.latitude)?,
            altitude: finite(self.altitude)?,
        })
    }
}

impl From<Position> for RawFix {
    fn from(p: Position) -> Self {
        RawFix::new(p.longitude, p.latitude, p.altitude)
    }
}

/// One location observation, or an "unavailable" marker when `position` is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    #[serde(flatten)]
    position: Option<Position>,
    timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn fix(position: Position, timestamp: DateTime<Utc>) -> Self {
        Self {
            position: Some(position),
            timestamp,
        }
    }

    pub fn unavailable(timestamp: DateTime<Utc>) -> Self {
        Self {
            position: None,
            timestamp,
        }
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn longitude(&self) -> Option<f64> {
        self.position.map(|p| p.longitude)
    }

    pub fn latitude(&self) -> Option<f64> {
        self.position.map(|p| p.latitude)
    }

    pub fn altitude(&self) -> Option<f64> {
        self.position.map(|p| p.altitude)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_available(&self) -> bool {
        self.position.is_some()
    }
}
