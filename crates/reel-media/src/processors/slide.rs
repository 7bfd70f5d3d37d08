//! Slide transitions: the clip travels in from one edge over black.

use async_trait::async_trait;
use reel_models::{params, Easing, Effect, EffectFamily, MediaAsset};

use super::EffectProcessor;
use crate::error::{MediaError, MediaResult};
use crate::filters::{slide_program, FilterProgram};
use crate::geometry::SlideDirection;

const FAMILIES: &[EffectFamily] = &[
    EffectFamily::SlideRightToLeft,
    EffectFamily::SlideLeftToRight,
    EffectFamily::SlideTopToBottom,
    EffectFamily::SlideBottomToTop,
];

/// Typed slide parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlideParams {
    pub easing: Easing,
}

impl SlideParams {
    pub fn from_effect(effect: &Effect) -> Self {
        Self {
            easing: effect.easing(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlideProcessor;

impl SlideProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EffectProcessor for SlideProcessor {
    fn name(&self) -> &'static str {
        "slide"
    }

    fn families(&self) -> &'static [EffectFamily] {
        FAMILIES
    }

    fn max_duration(&self) -> f64 {
        10.0
    }

    fn validate_parameters(&self, effect: &Effect) -> Vec<String> {
        match effect.text(params::EASING) {
            Some(easing) if easing.parse::<Easing>().is_err() => {
                vec![format!("unsupported easing '{}'", easing)]
            }
            _ => Vec::new(),
        }
    }

    fn estimate_cost(&self, asset: &MediaAsset, effect: &Effect) -> f64 {
        let mut cost = asset.duration() * 0.2;
        if effect.duration() > 3.0 {
            cost *= 1.2;
        }
        if SlideParams::from_effect(effect).easing != Easing::Linear {
            cost *= 1.1;
        }
        cost
    }

    fn build_program(&self, asset: &MediaAsset, effect: &Effect) -> MediaResult<FilterProgram> {
        let direction = SlideDirection::from_family(effect.family())
            .ok_or(MediaError::NoProcessor(effect.family()))?;
        Ok(slide_program(
            asset.path(),
            asset.dimensions(),
            asset.duration(),
            direction,
            SlideParams::from_effect(effect).easing,
            effect.duration(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::asset;
    use reel_models::EffectParameters;
    use serde_json::json;

    fn eased(family: EffectFamily, duration: f64, easing: &str) -> Effect {
        let mut parameters = EffectParameters::new();
        parameters.insert(params::EASING.to_string(), json!(easing));
        Effect::with_parameters(family, duration, parameters).unwrap()
    }

    #[test]
    fn test_slide_processor_claims_slides_only() {
        let processor = SlideProcessor::new();
        assert_eq!(processor.name(), "slide");
        assert!(processor.can_handle(EffectFamily::SlideBottomToTop));
        assert!(!processor.can_handle(EffectFamily::FadeIn));
    }

    #[test]
    fn test_slide_cost_multipliers() {
        let dir = tempfile::tempdir().unwrap();
        let clip = asset(&dir, "clip.mp4", 10.0, 1080, 1920);
        let processor = SlideProcessor::new();

        let short = Effect::new(EffectFamily::SlideRightToLeft, 2.0).unwrap();
        assert!((processor.estimate_cost(&clip, &short) - 2.0).abs() < 1e-9);

        let long_eased = eased(EffectFamily::SlideRightToLeft, 4.0, "ease-out");
        assert!((processor.estimate_cost(&clip, &long_eased) - 2.0 * 1.2 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_slide_program_uses_asset_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let clip = asset(&dir, "clip.mp4", 6.0, 640, 360);
        let effect = eased(EffectFamily::SlideLeftToRight, 1.5, "linear");
        let program = SlideProcessor::new().build_program(&clip, &effect).unwrap();

        assert!(program.graph.contains("s=640x360"));
        assert!(program.graph.contains("x='-640*(1-min(1,t/1.5))'"));
        assert_eq!(program.duration, 6.0);
        assert!(SlideProcessor::new().validate(&effect).is_empty());
    }
}
