//! Job orchestration for the reel rendering core.
//!
//! This crate provides:
//! - The processing service: job table, FIFO queue and background worker
//! - The render pipeline chaining composition, transition and overlay
//! - Job callbacks and a broadcast event stream
//! - Cooperative cancellation and bounded transcoder concurrency
//! - Worker configuration, structured job logging and metrics

pub mod callbacks;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod stats;

pub use callbacks::{JobCallbacks, JobEvent};
pub use config::{CompositionConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use manifest::JobManifest;
pub use pipeline::RenderPipeline;
pub use service::ProcessingService;
pub use stats::{QueueStatus, ServiceStatistics};
