//! Media inspection: turning a path into a [`MediaAsset`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::fs;
use tracing::debug;

use reel_models::{is_supported_media, Dimensions, MediaAsset};

use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// Resolves duration and dimensions for a media file.
#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> MediaResult<MediaAsset>;
}

/// Inspector backed by ffprobe.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfprobeInspector;

impl FfprobeInspector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    async fn inspect(&self, path: &Path) -> MediaResult<MediaAsset> {
        let info = probe_video(path).await?;
        let dimensions = Dimensions::new(info.width, info.height)?;
        let asset = MediaAsset::new(path, info.duration, dimensions)?
            .with_metadata("codec", info.codec)
            .with_metadata("fps", info.fps)
            .with_metadata("bitrate", info.bitrate)
            .with_metadata("file_size", info.size)
            .with_metadata("has_audio", info.has_audio);
        Ok(asset)
    }
}

struct CacheEntry {
    asset: MediaAsset,
    file_size: u64,
}

/// Memoizes another inspector by path.
///
/// An entry is discarded when the file's size changed or it is older than
/// the TTL.
pub struct CachingInspector<I> {
    inner: I,
    ttl: ChronoDuration,
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl<I: MediaInspector> CachingInspector<I> {
    pub const DEFAULT_TTL_HOURS: i64 = 24;

    pub fn new(inner: I) -> Self {
        Self::with_ttl(inner, ChronoDuration::hours(Self::DEFAULT_TTL_HOURS))
    }

    pub fn with_ttl(inner: I, ttl: ChronoDuration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, path: &Path, file_size: u64) -> Option<MediaAsset> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get(path)?;
        let fresh = entry
            .asset
            .cached_at()
            .map(|at| Utc::now() - at < self.ttl)
            .unwrap_or(false);
        if fresh && entry.file_size == file_size {
            return Some(entry.asset.clone());
        }
        entries.remove(path);
        None
    }
}

#[async_trait]
impl<I: MediaInspector> MediaInspector for CachingInspector<I> {
    async fn inspect(&self, path: &Path) -> MediaResult<MediaAsset> {
        let file_size = match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Err(MediaError::FileNotFound(path.to_path_buf())),
        };

        if let Some(asset) = self.cached(path, file_size) {
            debug!(path = %path.display(), "media inspection cache hit");
            return Ok(asset);
        }

        let mut asset = self.inner.inspect(path).await?;
        asset.mark_as_cached();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                path.to_path_buf(),
                CacheEntry {
                    asset: asset.clone(),
                    file_size,
                },
            );
        }
        Ok(asset)
    }
}

/// Supported media files under `dir`, sorted, at most `max_results`.
pub async fn scan_media_files(dir: &Path, recursive: bool, max_results: usize) -> MediaResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MediaError::FileNotFound(dir.to_path_buf()));
    }

    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if file_type.is_file() && is_supported_media(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    found.truncate(max_results);
    Ok(found)
}
