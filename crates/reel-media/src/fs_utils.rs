//! Placing finished renders at their output path.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// EXDEV: rename across mount points.
const CROSS_DEVICE: i32 = 18;

/// Move `src` to `dst` without ever replacing an existing `dst`.
///
/// Missing parent directories are created. When `src` and `dst` live on
/// different filesystems the file is copied to `<dst>.partial` first, so a
/// reader never observes a truncated `dst`.
pub async fn move_into_place(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    if !fs::try_exists(src).await? {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    if fs::try_exists(dst).await? {
        return Err(MediaError::OutputExists(dst.to_path_buf()));
    }
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE) => {
            debug!(src = %src.display(), dst = %dst.display(), "cross-device move, copying");
            copy_then_remove(src, dst).await
        }
        other => Ok(other?),
    }
}

async fn copy_then_remove(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = dst.with_extension("partial");
    let placed = async {
        fs::copy(src, &staging).await?;
        fs::rename(&staging, dst).await
    }
    .await;

    if let Err(e) = placed {
        if let Err(cleanup) = fs::remove_file(&staging).await {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(path = %staging.display(), "could not remove staging file: {}", cleanup);
            }
        }
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!(path = %src.display(), "could not remove source after copy: {}", e);
    }
    Ok(())
}
