//! Effect processors.
//!
//! Each effect family is handled by exactly one processor implementing
//! [`EffectProcessor`]. A processor re-validates the effect against its own
//! limits, estimates cost, builds a [`FilterProgram`] over the asset's real
//! dimensions and hands it to the [`Transcoder`]. Processors never retry;
//! that is the caller's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info};

use reel_models::{EffectFamily, Effect, EncodingConfig, MediaAsset, ValidationError};

use crate::assets::GeneratedAssets;
use crate::error::{MediaError, MediaResult};
use crate::filters::FilterProgram;
use crate::progress::FfmpegProgress;
use crate::transcoder::{cancelled, TranscodeControl, Transcoder};

pub mod circle;
pub mod fade;
pub mod overlay;
pub mod slide;

pub use circle::{CircleParams, CircleProcessor};
pub use fade::{FadeParams, FadeProcessor};
pub use overlay::{OverlayParams, OverlayProcessor};
pub use slide::{SlideParams, SlideProcessor};

/// Metric names recorded around transcoder invocations.
pub mod names {
    pub const TRANSCODE_DURATION_SECONDS: &str = "reel_transcode_duration_seconds";
    pub const TRANSCODES_TOTAL: &str = "reel_transcodes_total";
}

/// Progress sink receiving a percentage in `[0, 100]`.
pub type PercentCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Shared resources handed to every `apply` call.
#[derive(Clone)]
pub struct ApplyContext {
    pub transcoder: Arc<dyn Transcoder>,
    /// Bounds concurrent transcoder invocations across all jobs.
    pub permits: Arc<Semaphore>,
    pub encoding: EncodingConfig,
    pub cancel: Option<watch::Receiver<bool>>,
    pub on_progress: Option<PercentCallback>,
}

impl ApplyContext {
    pub fn new(transcoder: Arc<dyn Transcoder>, permits: Arc<Semaphore>) -> Self {
        Self {
            transcoder,
            permits,
            encoding: EncodingConfig::default(),
            cancel: None,
            on_progress: None,
        }
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, on_progress: PercentCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Result of a successful `apply`.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectOutcome {
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// Turns an [`Effect`] over a [`MediaAsset`] into a rendered file.
#[async_trait]
pub trait EffectProcessor: Send + Sync {
    /// Name of this processor for logging and registry errors.
    fn name(&self) -> &'static str;

    /// Families this processor claims.
    fn families(&self) -> &'static [EffectFamily];

    fn can_handle(&self, family: EffectFamily) -> bool {
        self.families().contains(&family)
    }

    /// Longest effect this processor renders, in seconds.
    fn max_duration(&self) -> f64;

    /// Family-specific parameter checks on top of the duration bounds.
    fn validate_parameters(&self, _effect: &Effect) -> Vec<String> {
        Vec::new()
    }

    /// Every reason this processor refuses `effect`; empty when accepted.
    fn validate(&self, effect: &Effect) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.can_handle(effect.family()) {
            issues.push(format!(
                "processor '{}' does not handle effect family {}",
                self.name(),
                effect.family()
            ));
            return issues;
        }

        let duration = effect.duration();
        if !(duration.is_finite() && duration > 0.0) {
            issues.push(format!("{} duration must be positive (got {})", effect.family(), duration));
        } else if duration > self.max_duration() {
            issues.push(format!(
                "{} duration {:.2}s exceeds the {:.0}s processor limit",
                effect.family(),
                duration,
                self.max_duration()
            ));
        }

        issues.extend(self.validate_parameters(effect));
        issues
    }

    /// Estimated processing time in seconds.
    fn estimate_cost(&self, asset: &MediaAsset, effect: &Effect) -> f64;

    /// Build the filter program for `effect` over `asset`.
    fn build_program(&self, asset: &MediaAsset, effect: &Effect) -> MediaResult<FilterProgram>;

    /// Generate any auxiliary assets the program references.
    async fn prepare(&self, _asset: &MediaAsset, _effect: &Effect) -> MediaResult<()> {
        Ok(())
    }

    /// Render `effect` over `asset` into `output`.
    async fn apply(
        &self,
        asset: &MediaAsset,
        effect: &Effect,
        output: &Path,
        ctx: &ApplyContext,
    ) -> MediaResult<EffectOutcome> {
        ValidationError::check(self.validate(effect))?;
        self.prepare(asset, effect).await?;
        let program = self.build_program(asset, effect)?;
        let elapsed = run_program(self.name(), &program, output, ctx).await?;
        Ok(EffectOutcome {
            output_path: output.to_path_buf(),
            elapsed,
        })
    }
}

/// Execute `program` under a transcoder permit, forwarding progress and
/// cancellation.
pub async fn run_program(
    name: &'static str,
    program: &FilterProgram,
    output: &Path,
    ctx: &ApplyContext,
) -> MediaResult<Duration> {
    let acquire = ctx.permits.clone().acquire_owned();
    let permit = match ctx.cancel.clone() {
        Some(mut rx) => tokio::select! {
            permit = acquire => permit,
            _ = cancelled(&mut rx) => return Err(MediaError::Cancelled),
        },
        None => acquire.await,
    }
    .map_err(|_| MediaError::internal("transcoder permits closed"))?;

    let mut control = TranscodeControl::new();
    if let Some(rx) = ctx.cancel.clone() {
        control = control.with_cancel(rx);
    }
    if let Some(on_progress) = ctx.on_progress.clone() {
        let total_ms = (program.duration * 1000.0) as i64;
        control = control.with_progress(Box::new(move |p: FfmpegProgress| {
            on_progress(p.percentage(total_ms))
        }));
    }

    let command = program.to_command(output, &ctx.encoding);
    debug!(processor = name, output = %output.display(), "dispatching filter program");

    let start = Instant::now();
    let result = ctx.transcoder.transcode(&command, control).await;
    let elapsed = start.elapsed();
    drop(permit);

    let outcome = match &result {
        Ok(()) => "success",
        Err(e) if e.is_cancelled() => "cancelled",
        Err(_) => "failure",
    };
    let labels = [("processor", name.to_string()), ("outcome", outcome.to_string())];
    counter!(names::TRANSCODES_TOTAL, &labels).increment(1);
    histogram!(names::TRANSCODE_DURATION_SECONDS, &labels).record(elapsed.as_secs_f64());

    result?;
    info!(
        processor = name,
        elapsed_ms = elapsed.as_millis() as u64,
        "filter program completed"
    );
    Ok(elapsed)
}

/// Family-to-processor table. Registration fails if a family is already claimed.
#[derive(Clone, Default)]
pub struct EffectProcessorRegistry {
    processors: HashMap<EffectFamily, Arc<dyn EffectProcessor>>,
}

impl EffectProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the slide, circle, fade and overlay processors.
    pub fn with_defaults(assets: GeneratedAssets) -> MediaResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(SlideProcessor::new()))?;
        registry.register(Arc::new(CircleProcessor::new()))?;
        registry.register(Arc::new(FadeProcessor::new()))?;
        registry.register(Arc::new(OverlayProcessor::new(assets)))?;
        Ok(registry)
    }

    /// Claim every family of `processor`. Nothing is registered on conflict.
    pub fn register(&mut self, processor: Arc<dyn EffectProcessor>) -> MediaResult<()> {
        for family in processor.families() {
            if let Some(existing) = self.processors.get(family) {
                return Err(MediaError::DuplicateProcessor {
                    family: *family,
                    existing: existing.name(),
                    incoming: processor.name(),
                });
            }
        }
        for family in processor.families() {
            self.processors.insert(*family, Arc::clone(&processor));
        }
        debug!(processor = processor.name(), "registered effect processor");
        Ok(())
    }

    pub fn get(&self, family: EffectFamily) -> Option<&Arc<dyn EffectProcessor>> {
        self.processors.get(&family)
    }

    pub fn resolve(&self, family: EffectFamily) -> MediaResult<Arc<dyn EffectProcessor>> {
        self.get(family)
            .cloned()
            .ok_or(MediaError::NoProcessor(family))
    }

    /// Registered families, sorted.
    pub fn families(&self) -> Vec<EffectFamily> {
        let mut families: Vec<_> = self.processors.keys().copied().collect();
        families.sort();
        families
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Validate against the owning processor; `None` effects need none.
    pub fn validate(&self, effect: &Effect) -> Vec<String> {
        if effect.family() == EffectFamily::None {
            return Vec::new();
        }
        match self.get(effect.family()) {
            Some(processor) => processor.validate(effect),
            None => vec![MediaError::NoProcessor(effect.family()).to_string()],
        }
    }

    pub fn estimate_cost(&self, asset: &MediaAsset, effect: &Effect) -> MediaResult<f64> {
        if effect.family() == EffectFamily::None {
            return Ok(0.0);
        }
        Ok(self.resolve(effect.family())?.estimate_cost(asset, effect))
    }
}

impl std::fmt::Debug for EffectProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<_> = self
            .processors
            .iter()
            .map(|(family, p)| (family.as_str(), p.name()))
            .collect();
        entries.sort();
        f.debug_struct("EffectProcessorRegistry")
            .field("processors", &entries)
            .finish()
    }
}
