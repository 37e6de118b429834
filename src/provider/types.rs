use chrono::{DateTime, Utc};

use crate::store::RawFix;

/// What a location provider delivers to its adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderEvent {
    Location { fix: RawFix, at: DateTime<Utc> },
    Availability { available: bool, at: DateTime<Utc> },
}

impl ProviderEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ProviderEvent::Location { at, .. } | ProviderEvent::Availability { at, .. } => *at,
        }
    }
}
