//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reel_media::StackLayout;
use reel_models::{Dimensions, EncodingConfig};

use crate::error::{WorkerError, WorkerResult};

/// Output canvas and how main and background share it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionConfig {
    pub output_width: u32,
    pub output_height: u32,
    pub layout: StackLayout,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            output_width: 1080,
            output_height: 1920,
            layout: StackLayout::Vertical,
        }
    }
}

impl CompositionConfig {
    pub fn canvas(&self) -> WorkerResult<Dimensions> {
        Dimensions::new(self.output_width, self.output_height)
            .map_err(|e| WorkerError::config_error(e.to_string()))
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent FFmpeg processes across all jobs
    pub max_concurrent_transcodes: usize,
    /// How long the worker waits on an empty queue before re-checking for shutdown
    pub queue_poll_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Time FFmpeg gets to quit after a cancel before it is killed
    pub cancel_grace_period: Duration,
    /// Hard limit on a single FFmpeg run
    pub transcode_timeout: Duration,
    /// Work directory for intermediate files
    pub work_dir: PathBuf,
    /// Where tiled overlay textures are cached
    pub generated_assets_dir: PathBuf,
    /// Capacity of the job event broadcast channel
    pub event_buffer: usize,
    pub composition: CompositionConfig,
    pub encoding: EncodingConfig,
}

fn default_transcodes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transcodes: default_transcodes(),
            queue_poll_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(5),
            cancel_grace_period: Duration::from_secs(5),
            transcode_timeout: Duration::from_secs(300),
            work_dir: std::env::temp_dir().join("reel"),
            generated_assets_dir: PathBuf::from("generated_effects"),
            event_buffer: 256,
            composition: CompositionConfig::default(),
            encoding: EncodingConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables. Unset or unparsable values
    /// fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let encoding_defaults = defaults.encoding.clone();

        Self {
            max_concurrent_transcodes: env_parse("REEL_MAX_TRANSCODES")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_transcodes),
            queue_poll_interval: Duration::from_millis(
                env_parse("REEL_QUEUE_POLL_MS").unwrap_or(1000),
            ),
            shutdown_timeout: Duration::from_secs(
                env_parse("REEL_SHUTDOWN_TIMEOUT_SECS").unwrap_or(5),
            ),
            cancel_grace_period: Duration::from_secs(
                env_parse("REEL_CANCEL_GRACE_SECS").unwrap_or(5),
            ),
            transcode_timeout: Duration::from_secs(
                env_parse("REEL_TRANSCODE_TIMEOUT_SECS").unwrap_or(300),
            ),
            work_dir: std::env::var("REEL_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            generated_assets_dir: std::env::var("REEL_GENERATED_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.generated_assets_dir),
            event_buffer: env_parse("REEL_EVENT_BUFFER")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_buffer),
            composition: CompositionConfig {
                output_width: env_parse("REEL_OUTPUT_WIDTH").unwrap_or(defaults.composition.output_width),
                output_height: env_parse("REEL_OUTPUT_HEIGHT")
                    .unwrap_or(defaults.composition.output_height),
                layout: std::env::var("REEL_LAYOUT")
                    .ok()
                    .and_then(|s| StackLayout::parse(&s))
                    .unwrap_or(defaults.composition.layout),
            },
            encoding: EncodingConfig {
                codec: std::env::var("REEL_VIDEO_CODEC").unwrap_or(encoding_defaults.codec),
                preset: std::env::var("REEL_PRESET").unwrap_or(encoding_defaults.preset),
                crf: env_parse("REEL_CRF").unwrap_or(encoding_defaults.crf),
                audio_codec: std::env::var("REEL_AUDIO_CODEC").unwrap_or(encoding_defaults.audio_codec),
                audio_bitrate: std::env::var("REEL_AUDIO_BITRATE")
                    .unwrap_or(encoding_defaults.audio_bitrate),
                ..encoding_defaults
            },
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_transcodes == 0 {
            return Err(WorkerError::config_error("max_concurrent_transcodes must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(WorkerError::config_error("event_buffer must be at least 1"));
        }
        if self.queue_poll_interval.is_zero() {
            return Err(WorkerError::config_error("queue_poll_interval must be positive"));
        }
        self.composition.canvas()?;
        self.encoding.validate()?;
        Ok(())
    }
}
