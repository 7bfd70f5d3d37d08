//! Shared data models for the reel rendering core.
//!
//! This crate provides Serde-serializable types for:
//! - Effect families, effects and their parameter validation
//! - Canvas dimensions and media asset descriptors
//! - Processing jobs and the job status state machine
//! - Encoding configuration

pub mod asset;
pub mod dimensions;
pub mod effect;
pub mod encoding;
pub mod error;
pub mod job;
pub mod job_status;

// Re-export common types
pub use asset::{is_supported_media, MediaAsset, SUPPORTED_EXTENSIONS};
pub use dimensions::Dimensions;
pub use effect::{params, Easing, Effect, EffectComplexity, EffectFamily, EffectParameters};
pub use encoding::EncodingConfig;
pub use error::{ValidationError, ValidationResult};
pub use job::{EffectPlan, JobId, ProcessingJob};
pub use job_status::JobStatus;
