//! Fade-in over a solid color.

use async_trait::async_trait;
use reel_models::{effect::is_valid_color, params, Effect, EffectFamily, MediaAsset};

use super::EffectProcessor;
use crate::error::MediaResult;
use crate::filters::{fade_program, FilterProgram};

const FAMILIES: &[EffectFamily] = &[EffectFamily::FadeIn];

/// Typed fade parameters. `alpha` is the opacity the clip starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeParams {
    pub color: String,
    pub alpha: f64,
}

impl Default for FadeParams {
    fn default() -> Self {
        Self {
            color: "black".to_string(),
            alpha: 0.0,
        }
    }
}

impl FadeParams {
    pub fn from_effect(effect: &Effect) -> Self {
        let defaults = Self::default();
        Self {
            color: effect
                .text(params::COLOR)
                .map(str::to_string)
                .unwrap_or(defaults.color),
            alpha: effect.number(params::ALPHA).unwrap_or(defaults.alpha),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FadeProcessor;

impl FadeProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EffectProcessor for FadeProcessor {
    fn name(&self) -> &'static str {
        "fade"
    }

    fn families(&self) -> &'static [EffectFamily] {
        FAMILIES
    }

    fn max_duration(&self) -> f64 {
        30.0
    }

    fn validate_parameters(&self, effect: &Effect) -> Vec<String> {
        let params = FadeParams::from_effect(effect);
        let mut issues = Vec::new();
        if !is_valid_color(&params.color) {
            issues.push(format!("unsupported fade color '{}'", params.color));
        }
        if !(0.0..=1.0).contains(&params.alpha) {
            issues.push(format!("alpha must be within [0, 1] (got {})", params.alpha));
        }
        issues
    }

    fn estimate_cost(&self, asset: &MediaAsset, effect: &Effect) -> f64 {
        let mut cost = asset.duration() * 0.15;
        if effect.duration() > 5.0 {
            cost *= 1.1;
        }
        if effect.has_parameter(params::COLOR) || effect.has_parameter(params::ALPHA) {
            cost *= 1.05;
        }
        cost
    }

    fn build_program(&self, asset: &MediaAsset, effect: &Effect) -> MediaResult<FilterProgram> {
        let params = FadeParams::from_effect(effect);
        Ok(fade_program(
            asset.path(),
            asset.dimensions(),
            asset.duration(),
            &params.color,
            params.alpha,
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

    #[test]
    fn test_fade_defaults() {
        let effect = Effect::new(EffectFamily::FadeIn, 2.0).unwrap();
        assert_eq!(FadeParams::from_effect(&effect), FadeParams::default());
    }

    #[test]
    fn test_fade_cost_and_program() {
        let dir = tempfile::tempdir().unwrap();
        let clip = asset(&dir, "clip.mp4", 20.0, 1080, 1920);
        let mut parameters = EffectParameters::new();
        parameters.insert(params::COLOR.to_string(), json!("white"));
        parameters.insert(params::ALPHA.to_string(), json!(0.5));
        let effect = Effect::with_parameters(EffectFamily::FadeIn, 6.0, parameters).unwrap();

        let processor = FadeProcessor::new();
        assert!((processor.estimate_cost(&clip, &effect) - 3.0 * 1.1 * 1.05).abs() < 1e-9);
        assert!(processor.validate(&effect).is_empty());

        let program = processor.build_program(&clip, &effect).unwrap();
        assert!(program.graph.contains("color=c=0xFFFFFF"));
        assert!(program.graph.contains("255*(0.5+(1-0.5)*min(1,T/6))"));
    }

    #[test]
    fn test_fade_processor_limit() {
        let effect = Effect::new(EffectFamily::FadeIn, 25.0).unwrap();
        assert!(FadeProcessor::new().validate(&effect).is_empty());
        assert!(FadeProcessor::new().max_duration() >= effect.duration());
    }
}
