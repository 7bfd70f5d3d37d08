//! Processing jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::asset::MediaAsset;
use crate::effect::Effect;
use crate::error::{ValidationError, ValidationResult};
use crate::job_status::JobStatus;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a job's effect list is reduced for rendering: one primary transition
/// plus one independent overlay. Everything else is reported as skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectPlan {
    pub transition: Option<Effect>,
    pub overlay: Option<Effect>,
    pub skipped: Vec<Effect>,
}

impl EffectPlan {
    pub fn is_empty(&self) -> bool {
        self.transition.is_none() && self.overlay.is_none()
    }
}

/// One request to render a composited video.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingJob {
    id: JobId,
    main_asset: MediaAsset,
    #[serde(skip_serializing_if = "Option::is_none")]
    background_asset: Option<MediaAsset>,
    effects: Vec<Effect>,
    output_path: PathBuf,
    status: JobStatus,
    /// Progress (0-100)
    progress: f32,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,
}

impl ProcessingJob {
    /// Create a pending job for the given main clip and output path.
    pub fn new(main_asset: MediaAsset, output_path: impl AsRef<Path>) -> Self {
        Self {
            id: JobId::new(),
            main_asset,
            background_asset: None,
            effects: Vec::new(),
            output_path: output_path.as_ref().to_path_buf(),
            status: JobStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_background(mut self, background: MediaAsset) -> Self {
        self.background_asset = Some(background);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn main_asset(&self) -> &MediaAsset {
        &self.main_asset
    }

    pub fn background_asset(&self) -> Option<&MediaAsset> {
        self.background_asset.as_ref()
    }

    pub fn has_background(&self) -> bool {
        self.background_asset.is_some()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns `false` and leaves the job untouched otherwise. Entering
    /// `Processing` stamps the start time, entering a terminal state stamps the
    /// completion time, and `Completed` clears any earlier error.
    pub fn transition_to(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        let now = Utc::now();
        match next {
            JobStatus::Processing => self.started_at = Some(now),
            JobStatus::Completed => {
                self.completed_at = Some(now);
                self.error_message = None;
            }
            JobStatus::Failed | JobStatus::Cancelled => self.completed_at = Some(now),
            JobStatus::Pending | JobStatus::Queued => {}
        }
        self.status = next;
        true
    }

    /// Transition to `Failed`, recording the error.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.transition_to(JobStatus::Failed) {
            return false;
        }
        self.error_message = Some(message.into());
        true
    }

    /// Transition to `Completed` with full progress.
    pub fn complete(&mut self) -> bool {
        if !self.transition_to(JobStatus::Completed) {
            return false;
        }
        self.progress = 100.0;
        true
    }

    /// Set progress; values outside `[0, 100]` are rejected.
    pub fn set_progress(&mut self, progress: f32) -> ValidationResult<()> {
        if !(progress.is_finite() && (0.0..=100.0).contains(&progress)) {
            return Err(ValidationError::new(format!(
                "progress must be within [0, 100] (got {})",
                progress
            )));
        }
        self.progress = progress;
        Ok(())
    }

    /// Re-queue a failed or cancelled job, clearing the previous attempt.
    pub fn reset_for_retry(&mut self) -> bool {
        if !matches!(self.status, JobStatus::Failed | JobStatus::Cancelled) {
            return false;
        }
        if !self.transition_to(JobStatus::Queued) {
            return false;
        }
        self.progress = 0.0;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
        true
    }

    /// Wall time between start and completion.
    pub fn processing_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    /// Expected render time in seconds: a base share of the main clip plus each effect.
    pub fn estimated_duration(&self) -> f64 {
        let video_duration = self.main_asset.duration();
        let base = video_duration * 0.5;
        self.effects
            .iter()
            .map(|effect| effect.estimated_processing_time(video_duration))
            .fold(base, |acc, t| acc + t)
    }

    /// Reduce the effect list to a primary transition and an overlay.
    ///
    /// The first transition and the first overlay win, in list order.
    /// `None` effects are dropped silently; any further transitions or
    /// overlays are returned in `skipped`.
    pub fn effect_plan(&self) -> EffectPlan {
        let mut plan = EffectPlan::default();
        for effect in &self.effects {
            let family = effect.family();
            if family.is_transition() && plan.transition.is_none() {
                plan.transition = Some(effect.clone());
            } else if family.is_overlay() && plan.overlay.is_none() {
                plan.overlay = Some(effect.clone());
            } else if family.requires_duration() {
                plan.skipped.push(effect.clone());
            }
        }
        plan
    }

    /// Every rule this job violates before it may be queued.
    pub fn validation_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !self.main_asset.exists() {
            issues.push(format!(
                "main video not found: {}",
                self.main_asset.path().display()
            ));
        }

        if let Some(background) = &self.background_asset {
            if !background.exists() {
                issues.push(format!(
                    "background video not found: {}",
                    background.path().display()
                ));
            }
        }

        if self.output_path.as_os_str().is_empty() {
            issues.push("output path must not be empty".to_string());
        } else if self.output_path.exists() {
            issues.push(format!(
                "output path already exists: {}",
                self.output_path.display()
            ));
        }

        for (index, effect) in self.effects.iter().enumerate() {
            let revalidated =
                Effect::with_parameters(effect.family(), effect.duration(), effect.parameters().clone());
            if let Err(e) = revalidated {
                issues.extend(
                    e.into_issues()
                        .into_iter()
                        .map(|issue| format!("effect {} ({}): {}", index, effect.family(), issue)),
                );
            }
        }

        issues
    }

    /// `Ok` when [`Self::validation_issues`] is empty.
    pub fn validate(&self) -> ValidationResult<()> {
        ValidationError::check(self.validation_issues())
    }
}
