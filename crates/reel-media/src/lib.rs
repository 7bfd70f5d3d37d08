//! Effect rendering on top of the FFmpeg CLI.
//!
//! This crate provides:
//! - Reveal geometry for every transition family
//! - Filter programs expressing that geometry for FFmpeg
//! - Effect processors and a registry that rejects duplicate claims
//! - GIF texture tiling for overlays
//! - Type-safe FFmpeg command building, progress parsing and cancellation
//! - Media inspection through ffprobe, with a caching layer

pub mod assets;
pub mod command;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod geometry;
pub mod inspect;
pub mod probe;
pub mod processors;
pub mod progress;
pub mod texture;
pub mod transcoder;

pub use assets::{GeneratedAssets, GeneratedFile};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegInput, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use filters::{compose_program, FilterProgram, StackLayout};
pub use fs_utils::move_into_place;
pub use geometry::{progress, reveal_at, CircleMask, Rect, Reveal, SlideDirection};
pub use inspect::{scan_media_files, CachingInspector, FfprobeInspector, MediaInspector};
pub use probe::{probe_video, VideoInfo};
pub use processors::{
    run_program, ApplyContext, EffectOutcome, EffectProcessor, EffectProcessorRegistry,
    PercentCallback,
};
pub use progress::{FfmpegProgress, ProgressCallback, ProgressLine, ProgressParser};
pub use texture::{TextureTiler, TileGrid, TilingOutcome};
pub use transcoder::{TranscodeControl, Transcoder};
