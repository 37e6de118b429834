mod broadcaster;

pub use broadcaster::{Observer, ObserverResult, SubscriptionId, UpdateBroadcaster};
