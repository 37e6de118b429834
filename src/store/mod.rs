mod buffer;
mod change;
mod error;
mod sample;
mod store;

pub use buffer::{EvictionBoundary, SampleBuffer};
pub use change::{Change, ChangeEvent, ChangeListener, ChangeSet};
pub use error::StoreError;
pub use sample::{Position, RawFix, Sample};
pub use store::{SampleStore, StoreSnapshot, StoreState};
