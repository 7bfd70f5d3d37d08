//! ffprobe-backed stream inspection.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// What the renderer needs to know about a source clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Seconds; always positive.
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    /// Bytes, 0 when ffprobe omits it.
    pub size: u64,
    /// Bits per second, 0 when ffprobe omits it.
    pub bitrate: u64,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    format: Format,
    #[serde(default)]
    streams: Vec<Stream>,
}

#[derive(Debug, Default, Deserialize)]
struct Format {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Stream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

fn number<T: std::str::FromStr>(field: &Option<String>) -> Option<T> {
    field.as_deref().and_then(|s| s.trim().parse().ok())
}

/// Run ffprobe on `path`. A missing file or unreadable video stream is an error.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(check_ffprobe()?)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(MediaError::FfprobeFailed {
            message: format!("cannot read {}", path.display()),
            stderr: (!stderr.is_empty()).then_some(stderr),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Interpret ffprobe's `-print_format json` report.
pub fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let report: Report = serde_json::from_slice(json)?;

    let video = report
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("no video stream".into()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::InvalidVideo("video stream has no dimensions".into())),
    };

    // Some containers only carry the duration on the stream.
    let duration = number::<f64>(&report.format.duration)
        .or_else(|| number(&video.duration))
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| MediaError::InvalidVideo("unknown or zero duration".into()))?;

    // avg_frame_rate reads 0/0 in some containers.
    let fps = [&video.avg_frame_rate, &video.r_frame_rate]
        .into_iter()
        .filter_map(|rate| rate.as_deref().and_then(parse_frame_rate))
        .find(|fps| *fps > 0.0)
        .unwrap_or(30.0);

    Ok(VideoInfo {
        duration,
        width,
        height,
        fps,
        codec: video.codec_name.clone().unwrap_or_default(),
        size: number(&report.format.size).unwrap_or(0),
        bitrate: number(&report.format.bit_rate).unwrap_or(0),
        has_audio: report.streams.iter().any(|s| s.codec_type == "audio"),
    })
}

/// `"30000/1001"` or `"29.97"`; `None` for a zero denominator.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let (num, den): (f64, f64) = (num.parse().ok()?, den.parse().ok()?);
            (den > 0.0).then(|| num / den)
        }
        None => s.parse().ok(),
    }
}
