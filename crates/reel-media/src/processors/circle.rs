//! Circular reveals: expanding disc, contracting disc and clock wipes.

use async_trait::async_trait;
use reel_models::{params, Effect, EffectFamily, MediaAsset};

use super::EffectProcessor;
use crate::error::{MediaError, MediaResult};
use crate::filters::{circle_program, CircleShape, FilterProgram};
use crate::geometry::CircleMask;

const FAMILIES: &[EffectFamily] = &[
    EffectFamily::CircleExpand,
    EffectFamily::CircleContract,
    EffectFamily::CircleRotateClockwise,
    EffectFamily::CircleRotateCounterClockwise,
];

/// Typed circle parameters. Centers are canvas fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleParams {
    pub radius: Option<f64>,
    pub center_x: f64,
    pub center_y: f64,
}

impl Default for CircleParams {
    fn default() -> Self {
        Self {
            radius: None,
            center_x: 0.5,
            center_y: 0.5,
        }
    }
}

impl CircleParams {
    pub fn from_effect(effect: &Effect) -> Self {
        let defaults = Self::default();
        Self {
            radius: effect.number(params::RADIUS),
            center_x: effect.number(params::CENTER_X).unwrap_or(defaults.center_x),
            center_y: effect.number(params::CENTER_Y).unwrap_or(defaults.center_y),
        }
    }

    /// Whether anything differs from a centered mask with automatic radius.
    pub fn is_customized(&self) -> bool {
        *self != Self::default()
    }
}

fn shape_for(family: EffectFamily) -> Option<CircleShape> {
    match family {
        EffectFamily::CircleExpand => Some(CircleShape::Expand),
        EffectFamily::CircleContract => Some(CircleShape::Contract),
        EffectFamily::CircleRotateClockwise => Some(CircleShape::Clockwise),
        EffectFamily::CircleRotateCounterClockwise => Some(CircleShape::CounterClockwise),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct CircleProcessor;

impl CircleProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EffectProcessor for CircleProcessor {
    fn name(&self) -> &'static str {
        "circle"
    }

    fn families(&self) -> &'static [EffectFamily] {
        FAMILIES
    }

    fn max_duration(&self) -> f64 {
        10.0
    }

    fn validate_parameters(&self, effect: &Effect) -> Vec<String> {
        let params = CircleParams::from_effect(effect);
        let mut issues = Vec::new();
        if let Some(radius) = params.radius {
            if !(radius.is_finite() && radius > 0.0) {
                issues.push(format!("radius must be positive (got {})", radius));
            }
        }
        for (key, value) in [(params::CENTER_X, params.center_x), (params::CENTER_Y, params.center_y)] {
            if !(0.0..=1.0).contains(&value) {
                issues.push(format!("{} must be within [0, 1] (got {})", key, value));
            }
        }
        issues
    }

    fn estimate_cost(&self, asset: &MediaAsset, effect: &Effect) -> f64 {
        let mut cost = asset.duration() * 0.4;
        if effect.family().is_rotate() {
            cost *= 1.5;
        }
        if CircleParams::from_effect(effect).is_customized() {
            cost *= 1.2;
        }
        if effect.duration() > 3.0 {
            cost *= 1.3;
        }
        cost
    }

    fn build_program(&self, asset: &MediaAsset, effect: &Effect) -> MediaResult<FilterProgram> {
        let shape = shape_for(effect.family()).ok_or(MediaError::NoProcessor(effect.family()))?;
        let params = CircleParams::from_effect(effect);
        let mask = CircleMask::new(asset.dimensions(), params.center_x, params.center_y, params.radius);
        Ok(circle_program(
            asset.path(),
            asset.dimensions(),
            asset.duration(),
            shape,
            mask,
            effect.duration(),
        ))
    }
}
