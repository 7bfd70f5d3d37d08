//! The external transcoder seam.
//!
//! Processors build an [`FfmpegCommand`] and hand it to a [`Transcoder`].
//! Production uses [`crate::command::FfmpegRunner`]; tests substitute fakes.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::progress::ProgressCallback;

/// Per-invocation controls.
#[derive(Default)]
pub struct TranscodeControl {
    /// Flipped to `true` to request termination.
    pub cancel: Option<watch::Receiver<bool>>,
    /// Receives parsed progress blocks.
    pub on_progress: Option<ProgressCallback>,
}

impl TranscodeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Whether cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Executes a filter program and reports success, failure, or cancellation.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Run `command` to completion.
    ///
    /// Returns `MediaError::Cancelled` if `control.cancel` fires first, and a
    /// transcoder fault (`FfmpegFailed`, `Timeout`, `FfmpegNotFound`) otherwise.
    async fn transcode(&self, command: &FfmpegCommand, control: TranscodeControl) -> MediaResult<()>;
}

/// Resolve once `rx` reads `true`. Never resolves if the sender goes away first.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
