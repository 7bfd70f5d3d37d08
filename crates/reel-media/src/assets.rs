//! Generated asset directory (tiled textures and other derived files).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use reel_models::Dimensions;

use crate::error::MediaResult;
use crate::texture::tiled_texture_name;

/// One file in the generated directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Owns the directory derived assets are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAssets {
    root: PathBuf,
}

impl GeneratedAssets {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it is missing.
    pub async fn ensure(&self) -> MediaResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Where the tiled version of `source` for `canvas` lives.
    pub fn tiled_texture_path(&self, source: &Path, canvas: Dimensions) -> PathBuf {
        self.path_for(&tiled_texture_name(source, canvas))
    }

    /// Regular files in the directory, sorted by name. Empty if it does not exist.
    pub async fn list(&self) -> MediaResult<Vec<GeneratedFile>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(GeneratedFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size: metadata.len(),
                modified: DateTime::<Utc>::from(modified),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Total bytes used by generated files.
    pub async fn total_size(&self) -> MediaResult<u64> {
        Ok(self.list().await?.iter().map(|f| f.size).sum())
    }

    /// Delete files last modified more than `max_age` ago. Returns how many went.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> MediaResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        for file in self.list().await? {
            if file.modified >= cutoff {
                continue;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    debug!(file = %file.name, "removed stale generated asset");
                    removed += 1;
                }
                Err(e) => warn!(file = %file.name, error = %e, "failed to remove generated asset"),
            }
        }

        if removed > 0 {
            info!(removed, dir = %self.root.display(), "cleaned up generated assets");
        }
        Ok(removed)
    }
}
