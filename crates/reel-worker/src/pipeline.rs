//! Render pipeline for a single job.
//!
//! Stages run in a scratch directory under the work dir:
//!
//! 1. compose: fit main (and background) onto the output canvas
//! 2. transition: the primary transition, if any
//! 3. overlay: the GIF overlay, if any
//! 4. finalize: move the last intermediate to the job's output path
//!
//! Each stage reads the previous stage's file, so effects chain on one
//! derived asset instead of being composed into a single graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Semaphore};

use reel_media::{
    compose_program, move_into_place, run_program, ApplyContext, EffectProcessorRegistry,
    MediaError, PercentCallback, Transcoder,
};
use reel_models::{Dimensions, Effect, MediaAsset, ProcessingJob};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;

const COMPOSE_WEIGHT: f64 = 50.0;
const TRANSITION_WEIGHT: f64 = 35.0;
const OVERLAY_WEIGHT: f64 = 15.0;

/// One slice of overall job progress.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StageSpan {
    start: f64,
    width: f64,
}

impl StageSpan {
    fn scale(&self, percent: f64) -> f64 {
        (self.start + self.width * percent.clamp(0.0, 100.0) / 100.0).min(100.0)
    }
}

/// Split 0..100 across the stages that will actually run.
fn stage_spans(has_transition: bool, has_overlay: bool) -> (StageSpan, StageSpan, StageSpan) {
    let transition = if has_transition { TRANSITION_WEIGHT } else { 0.0 };
    let overlay = if has_overlay { OVERLAY_WEIGHT } else { 0.0 };
    let total = COMPOSE_WEIGHT + transition + overlay;
    let norm = |w: f64| w / total * 100.0;

    let compose = StageSpan { start: 0.0, width: norm(COMPOSE_WEIGHT) };
    let transition = StageSpan { start: compose.width, width: norm(transition) };
    let overlay = StageSpan {
        start: transition.start + transition.width,
        width: norm(overlay),
    };
    (compose, transition, overlay)
}

/// Renders jobs through the processor registry.
#[derive(Clone)]
pub struct RenderPipeline {
    registry: Arc<EffectProcessorRegistry>,
    transcoder: Arc<dyn Transcoder>,
    permits: Arc<Semaphore>,
    config: WorkerConfig,
}

impl RenderPipeline {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<EffectProcessorRegistry>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_transcodes.max(1)));
        Self {
            registry,
            transcoder,
            permits,
            config,
        }
    }

    pub fn registry(&self) -> &EffectProcessorRegistry {
        &self.registry
    }

    /// Render `job` to its output path.
    ///
    /// Progress is reported as an overall percentage. Returns
    /// `MediaError::Cancelled` (wrapped) as soon as `cancel` reads `true`.
    pub async fn render(
        &self,
        job: &ProcessingJob,
        cancel: watch::Receiver<bool>,
        on_progress: PercentCallback,
    ) -> WorkerResult<PathBuf> {
        let logger = JobLogger::new(job.id(), "render");
        let started = Instant::now();
        let canvas = self.config.composition.canvas()?;

        let plan = job.effect_plan();
        for skipped in &plan.skipped {
            logger.log_warning(&format!(
                "skipping {}: only one transition and one overlay are applied",
                skipped
            ));
        }
        let (compose_span, transition_span, overlay_span) =
            stage_spans(plan.transition.is_some(), plan.overlay.is_some());

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job.id()))
            .tempdir_in(&self.config.work_dir)?;

        let base_ctx = ApplyContext::new(Arc::clone(&self.transcoder), Arc::clone(&self.permits))
            .with_encoding(self.config.encoding.clone())
            .with_cancel(cancel);
        if base_ctx.is_cancelled() {
            return Err(MediaError::Cancelled.into());
        }

        logger.log_start(&format!(
            "{} effect(s), canvas {}, layout {}",
            job.effect_count(),
            canvas,
            self.config.composition.layout.as_str()
        ));

        let composed_path = scratch.path().join("composed.mp4");
        let main = job.main_asset();
        let program = compose_program(
            main.path(),
            job.background_asset().map(|b| b.path()),
            self.config.composition.layout,
            canvas,
            main.duration(),
        );
        run_program(
            "compose",
            &program,
            &composed_path,
            &stage_context(&base_ctx, &on_progress, compose_span),
        )
        .await?;
        on_progress(compose_span.scale(100.0));
        let mut current = intermediate(&composed_path, main.duration(), canvas)?;

        if let Some(effect) = &plan.transition {
            let output = scratch.path().join("transition.mp4");
            let ctx = stage_context(&base_ctx, &on_progress, transition_span);
            current = self.apply_effect(&logger, &current, effect, &output, &ctx).await?;
            on_progress(transition_span.scale(100.0));
        }

        if let Some(effect) = &plan.overlay {
            let output = scratch.path().join("overlay.mp4");
            let ctx = stage_context(&base_ctx, &on_progress, overlay_span);
            current = self.apply_effect(&logger, &current, effect, &output, &ctx).await?;
            on_progress(overlay_span.scale(100.0));
        }

        move_into_place(current.path(), job.output_path()).await?;
        logger.log_completion(
            &format!("wrote {}", job.output_path().display()),
            started.elapsed().as_millis() as u64,
        );
        Ok(job.output_path().to_path_buf())
    }

    async fn apply_effect(
        &self,
        logger: &JobLogger,
        asset: &MediaAsset,
        effect: &Effect,
        output: &Path,
        ctx: &ApplyContext,
    ) -> WorkerResult<MediaAsset> {
        let processor = self.registry.resolve(effect.family())?;
        let stage = logger.for_stage(processor.name());
        stage.log_progress(&format!("applying {}", effect));

        let outcome = processor.apply(asset, effect, output, ctx).await?;
        stage.log_completion(&effect.to_string(), outcome.elapsed.as_millis() as u64);
        intermediate(&outcome.output_path, asset.duration(), asset.dimensions())
    }
}

fn stage_context(base: &ApplyContext, on_progress: &PercentCallback, span: StageSpan) -> ApplyContext {
    let on_progress = Arc::clone(on_progress);
    base.clone()
        .with_progress(Arc::new(move |percent: f64| on_progress(span.scale(percent))))
}

fn intermediate(path: &Path, duration: f64, canvas: Dimensions) -> WorkerResult<MediaAsset> {
    Ok(MediaAsset::new(path, duration, canvas)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_spans_cover_full_range() {
        let (compose, transition, overlay) = stage_spans(true, true);
        assert!((compose.scale(100.0) - 50.0).abs() < 1e-9);
        assert!((transition.scale(100.0) - 85.0).abs() < 1e-9);
        assert!((overlay.scale(100.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_compose_alone_spans_everything() {
        let (compose, transition, overlay) = stage_spans(false, false);
        assert_eq!(compose.scale(50.0), 50.0);
        assert_eq!(compose.scale(100.0), 100.0);
        assert_eq!(transition.width, 0.0);
        assert_eq!(overlay.width, 0.0);
    }

    #[test]
    fn test_overlay_only_follows_compose() {
        let (compose, _, overlay) = stage_spans(false, true);
        let compose_end = compose.scale(100.0);
        assert!((overlay.start - compose_end).abs() < 1e-9);
        assert!((overlay.scale(100.0) - 100.0).abs() < 1e-9);
        assert!(overlay.scale(150.0) <= 100.0);
    }
}
