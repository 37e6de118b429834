use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider adapter already running")]
    AlreadyRunning,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("step {0}: {1}")]
    Step(usize, String),
    #[error("interval {0} out of range")]
    Interval(String),
}
