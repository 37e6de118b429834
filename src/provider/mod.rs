mod adapter;
mod error;
mod track;
mod types;

pub use adapter::{apply_event, AdapterExit, ProviderAdapter};
pub use error::{ProviderError, TrackError};
pub use track::{StepTime, Track, TrackEvent, TrackStep};
pub use types::ProviderEvent;
