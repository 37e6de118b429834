use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::broadcast::SubscriptionId;
use crate::store::RawFix;

/// Conditions the core recovers from locally and only reports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Diagnostic {
    #[error("invalid sample at {observed_at}: partial fix {fix:?} treated as unavailable")]
    InvalidSample {
        fix: RawFix,
        observed_at: DateTime<Utc>,
    },
    #[error("observer {subscription} failed: {reason}")]
    ObserverFailure {
        subscription: SubscriptionId,
        reason: String,
    },
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Routes diagnostics to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::InvalidSample { .. } => log::warn!("{}", diagnostic),
            Diagnostic::ObserverFailure { .. } => log::error!("{}", diagnostic),
        }
    }
}
