//! Media asset descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::dimensions::Dimensions;
use crate::error::{ValidationError, ValidationResult};

/// Container extensions the renderer accepts, lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Whether the path has a supported container extension (case-insensitive).
pub fn is_supported_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Inspected description of a video on disk.
///
/// Two descriptors with the same path compare and hash equal regardless of
/// their metadata or cache timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    path: PathBuf,
    duration: f64,
    dimensions: Dimensions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cached_at: Option<DateTime<Utc>>,
}

impl MediaAsset {
    /// Create a descriptor for an existing, non-empty file of a supported container.
    pub fn new(path: impl AsRef<Path>, duration: f64, dimensions: Dimensions) -> ValidationResult<Self> {
        let path = path.as_ref();
        let mut issues = Vec::new();

        if path.as_os_str().is_empty() {
            issues.push("media path must not be empty".to_string());
        } else {
            if !is_supported_media(path) {
                issues.push(format!(
                    "unsupported container for {} (expected one of {})",
                    path.display(),
                    SUPPORTED_EXTENSIONS.join(", ")
                ));
            }
            match std::fs::metadata(path) {
                Ok(meta) if !meta.is_file() => {
                    issues.push(format!("{} is not a regular file", path.display()))
                }
                Ok(meta) if meta.len() == 0 => {
                    issues.push(format!("{} is empty", path.display()))
                }
                Ok(_) => {}
                Err(_) => issues.push(format!("media file not found: {}", path.display())),
            }
        }

        if !(duration.is_finite() && duration > 0.0) {
            issues.push(format!("media duration must be positive (got {})", duration));
        }

        ValidationError::check(issues)?;

        Ok(Self {
            path: path.to_path_buf(),
            duration,
            dimensions,
            metadata: BTreeMap::new(),
            cached_at: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width()
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height()
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Enrich with a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.cached_at
    }

    pub fn mark_as_cached(&mut self) {
        self.cached_at = Some(Utc::now());
    }

    /// File name including extension.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File stem, used for listings.
    pub fn display_name(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filename())
    }

    /// Current size on disk, if the file is still readable.
    pub fn file_size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|meta| meta.len())
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

impl PartialEq for MediaAsset {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for MediaAsset {}

impl Hash for MediaAsset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn write_clip(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn dims() -> Dimensions {
        Dimensions::new(1920, 1080).unwrap()
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_media(Path::new("clip.MP4")));
        assert!(is_supported_media(Path::new("a/b/clip.mkv")));
        assert!(!is_supported_media(Path::new("clip.gif")));
        assert!(!is_supported_media(Path::new("clip")));
    }

    #[test]
    fn test_new_validates_file_and_duration() {
        let dir = TempDir::new().unwrap();
        let empty = write_clip(&dir, "empty.mp4", b"");
        let err = MediaAsset::new(&empty, 0.0, dims()).unwrap_err();
        assert_eq!(err.issues().len(), 2);

        let missing = dir.path().join("missing.mov");
        assert!(MediaAsset::new(&missing, 3.0, dims()).is_err());

        let clip = write_clip(&dir, "clip.mp4", b"not really video");
        let asset = MediaAsset::new(&clip, 3.0, dims()).unwrap();
        assert_eq!(asset.filename(), "clip.mp4");
        assert_eq!(asset.display_name(), "clip");
        assert_eq!(asset.file_size(), Some(16));
    }

    #[test]
    fn test_equality_is_by_path() {
        let dir = TempDir::new().unwrap();
        let clip = write_clip(&dir, "clip.mp4", b"data");
        let a = MediaAsset::new(&clip, 3.0, dims()).unwrap();
        let mut b = MediaAsset::new(&clip, 9.0, Dimensions::new(640, 480).unwrap())
            .unwrap()
            .with_metadata("codec", "h264");
        b.mark_as_cached();

        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
