//! JSON job manifests read by the worker binary.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use reel_media::MediaInspector;
use reel_models::{Effect, ProcessingJob};

use crate::error::{WorkerError, WorkerResult};

/// `{ "main": ..., "background": ..., "output": ..., "effects": [...] }`
#[derive(Debug, Clone, Deserialize)]
pub struct JobManifest {
    pub main: PathBuf,
    #[serde(default)]
    pub background: Option<PathBuf>,
    pub output: PathBuf,
    #[serde(default)]
    pub effects: Vec<Effect>,
}

impl JobManifest {
    pub fn from_json(bytes: &[u8]) -> WorkerResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| WorkerError::config_error(format!("invalid job manifest: {}", e)))
    }

    pub async fn load(path: &Path) -> WorkerResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_json(&bytes)
    }

    /// Inspect the referenced media and build a pending job.
    pub async fn into_job(self, inspector: &dyn MediaInspector) -> WorkerResult<ProcessingJob> {
        let main = inspector.inspect(&self.main).await?;
        let mut job = ProcessingJob::new(main, &self.output).with_effects(self.effects);
        if let Some(background) = &self.background {
            job = job.with_background(inspector.inspect(background).await?);
        }
        Ok(job)
    }
}
