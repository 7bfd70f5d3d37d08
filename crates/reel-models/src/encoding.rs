//! Output encoding settings shared by every render stage.

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};

/// Highest CRF accepted by x264/x265.
pub const MAX_CRF: u8 = 51;

/// Codec, quality and audio settings applied to each intermediate and the
/// final output. Intermediates use the same settings so chained stages never
/// change pixel format or audio layout between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub codec: String,
    pub preset: String,
    /// Constant Rate Factor, lower is better.
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Appended verbatim after the generated arguments.
    pub extra_args: Vec<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".into(),
            preset: "ultrafast".into(),
            crf: 23,
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
            extra_args: Vec::new(),
        }
    }
}

impl EncodingConfig {
    /// Every setting FFmpeg would reject outright.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut issues = Vec::new();
        if self.codec.trim().is_empty() {
            issues.push("video codec must not be empty".to_string());
        }
        if self.audio_codec.trim().is_empty() {
            issues.push("audio codec must not be empty".to_string());
        }
        if self.crf > MAX_CRF {
            issues.push(format!("crf must be at most {} (got {})", MAX_CRF, self.crf));
        }
        ValidationError::check(issues)
    }

    /// Output arguments for one FFmpeg run.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let pairs = [
            ("-c:v", self.codec.clone()),
            ("-preset", self.preset.clone()),
            ("-crf", self.crf.to_string()),
            ("-pix_fmt", "yuv420p".to_string()),
            ("-c:a", self.audio_codec.clone()),
            ("-b:a", self.audio_bitrate.clone()),
            ("-movflags", "+faststart".to_string()),
        ];
        pairs
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .flat_map(|(flag, value)| [flag.to_string(), value])
            .chain(self.extra_args.iter().cloned())
            .collect()
    }
}
