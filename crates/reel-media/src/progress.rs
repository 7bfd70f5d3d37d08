//! Parsing of FFmpeg's `-progress` key/value stream.
//!
//! FFmpeg writes blocks of `key=value` lines, each terminated by
//! `progress=continue` or `progress=end`. The runner sends that stream to
//! stderr alongside ordinary log output, so every line is classified first.

use serde::{Deserialize, Serialize};

/// Keys FFmpeg emits inside a progress block.
const PROGRESS_KEYS: &[&str] = &[
    "frame", "fps", "stream_0_0_q", "bitrate", "total_size", "out_time_us", "out_time_ms",
    "out_time", "dup_frames", "drop_frames", "speed", "progress",
];

/// One completed progress block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    /// Position in the output, in milliseconds.
    pub out_time_ms: i64,
    /// Multiple of realtime; 0 when FFmpeg reports `N/A`.
    pub speed: f64,
    /// Set on the final `progress=end` block.
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Share of `total_ms` rendered so far, in `[0, 100]`.
    pub fn percentage(&self, total_ms: i64) -> f64 {
        match (self.is_complete, total_ms) {
            (true, _) => 100.0,
            (false, t) if t <= 0 => 0.0,
            (false, t) => (self.out_time_ms as f64 * 100.0 / t as f64).clamp(0.0, 100.0),
        }
    }
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(FfmpegProgress) + Send + 'static>;

/// What a stderr line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// A block finished; here is its snapshot.
    Block(FfmpegProgress),
    /// A field inside a block that is still open.
    Field,
    /// Ordinary log output.
    Log,
}

/// Accumulates fields until a block closes.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> ProgressLine {
        let Some((key, value)) = line.trim().split_once('=') else {
            return ProgressLine::Log;
        };
        let key = key.trim();
        if !PROGRESS_KEYS.contains(&key) {
            return ProgressLine::Log;
        }

        let value = value.trim();
        match key {
            // Both keys carry microseconds.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "speed" => {
                self.current.speed = value
                    .strip_suffix('x')
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0.0);
            }
            "progress" => {
                self.current.is_complete = value == "end";
                return ProgressLine::Block(self.current.clone());
            }
            _ => {}
        }
        ProgressLine::Field
    }
}
