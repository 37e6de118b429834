//! Aggregates a stream of location fixes into a time-windowed sample buffer
//! and notifies observers of changes without blocking the producer.

pub mod broadcast;
pub mod config;
pub mod diagnostics;
pub mod provider;
pub mod service;
pub mod store;

pub use config::Config;
pub use service::LocationService;
