// Change event decoding
pub mod event;

// Active schedule resolution
pub mod schedule;

// Schedule store backends
pub mod store;

// Message bus transports and device publisher
pub mod bus;

// Event → resolve → publish composition
pub mod pipeline;

// HTTP trigger endpoint
pub mod api;

// Service configuration
pub mod config;

// Dispatch error taxonomy
pub mod error;

pub use error::DispatchError;
pub use pipeline::{DispatchReport, SchedulePipeline};
