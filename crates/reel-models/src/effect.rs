//! Effect families and validated effect values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ValidationError, ValidationResult};

/// Family-specific parameters, keyed by name.
pub type EffectParameters = BTreeMap<String, Value>;

/// Recognized parameter names.
pub mod params {
    pub const RADIUS: &str = "radius";
    pub const CENTER_X: &str = "centerX";
    pub const CENTER_Y: &str = "centerY";
    pub const EASING: &str = "easing";
    pub const COLOR: &str = "color";
    pub const ALPHA: &str = "alpha";
    pub const GIF_PATH: &str = "gifPath";
    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const SCALE: &str = "scale";
}

/// Named colors accepted by the fade family in addition to `#RRGGBB`.
pub const NAMED_COLORS: &[&str] = &[
    "black",
    "white",
    "red",
    "green",
    "blue",
    "yellow",
    "cyan",
    "magenta",
    "gray",
    "grey",
    "orange",
    "purple",
    "brown",
    "pink",
    "transparent",
];

/// Closed set of effect families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectFamily {
    None,
    SlideRightToLeft,
    SlideLeftToRight,
    SlideTopToBottom,
    SlideBottomToTop,
    CircleExpand,
    CircleContract,
    CircleRotateClockwise,
    CircleRotateCounterClockwise,
    FadeIn,
    GifOverlay,
}

impl EffectFamily {
    /// Every family, in declaration order.
    pub const ALL: [EffectFamily; 11] = [
        EffectFamily::None,
        EffectFamily::SlideRightToLeft,
        EffectFamily::SlideLeftToRight,
        EffectFamily::SlideTopToBottom,
        EffectFamily::SlideBottomToTop,
        EffectFamily::CircleExpand,
        EffectFamily::CircleContract,
        EffectFamily::CircleRotateClockwise,
        EffectFamily::CircleRotateCounterClockwise,
        EffectFamily::FadeIn,
        EffectFamily::GifOverlay,
    ];

    /// Get string representation of the family.
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectFamily::None => "none",
            EffectFamily::SlideRightToLeft => "slide_right_to_left",
            EffectFamily::SlideLeftToRight => "slide_left_to_right",
            EffectFamily::SlideTopToBottom => "slide_top_to_bottom",
            EffectFamily::SlideBottomToTop => "slide_bottom_to_top",
            EffectFamily::CircleExpand => "circle_expand",
            EffectFamily::CircleContract => "circle_contract",
            EffectFamily::CircleRotateClockwise => "circle_rotate_clockwise",
            EffectFamily::CircleRotateCounterClockwise => "circle_rotate_counter_clockwise",
            EffectFamily::FadeIn => "fade_in",
            EffectFamily::GifOverlay => "gif_overlay",
        }
    }

    pub fn is_slide(&self) -> bool {
        matches!(
            self,
            EffectFamily::SlideRightToLeft
                | EffectFamily::SlideLeftToRight
                | EffectFamily::SlideTopToBottom
                | EffectFamily::SlideBottomToTop
        )
    }

    pub fn is_circle(&self) -> bool {
        matches!(
            self,
            EffectFamily::CircleExpand
                | EffectFamily::CircleContract
                | EffectFamily::CircleRotateClockwise
                | EffectFamily::CircleRotateCounterClockwise
        )
    }

    pub fn is_rotate(&self) -> bool {
        matches!(
            self,
            EffectFamily::CircleRotateClockwise | EffectFamily::CircleRotateCounterClockwise
        )
    }

    pub fn is_fade(&self) -> bool {
        matches!(self, EffectFamily::FadeIn)
    }

    pub fn is_overlay(&self) -> bool {
        matches!(self, EffectFamily::GifOverlay)
    }

    /// Opening transitions mask the clip; overlays decorate it independently.
    pub fn is_transition(&self) -> bool {
        self.is_slide() || self.is_circle() || self.is_fade()
    }

    /// Only `None` may (and must) have a zero duration.
    pub fn requires_duration(&self) -> bool {
        !matches!(self, EffectFamily::None)
    }

    /// Longest duration accepted at construction, in seconds.
    pub fn max_duration(&self) -> f64 {
        match self {
            EffectFamily::None => 0.0,
            EffectFamily::FadeIn => 30.0,
            EffectFamily::GifOverlay => 60.0,
            _ => 10.0,
        }
    }

    pub fn complexity(&self) -> EffectComplexity {
        match self {
            EffectFamily::None => EffectComplexity::Trivial,
            EffectFamily::CircleExpand | EffectFamily::CircleContract => EffectComplexity::Moderate,
            EffectFamily::CircleRotateClockwise
            | EffectFamily::CircleRotateCounterClockwise
            | EffectFamily::GifOverlay => EffectComplexity::High,
            _ => EffectComplexity::Low,
        }
    }

    /// Fraction of the video duration this family typically costs to render.
    pub fn time_factor(&self) -> f64 {
        match self {
            EffectFamily::None => 0.01,
            EffectFamily::FadeIn => 0.12,
            f if f.is_slide() => 0.15,
            _ => 0.3,
        }
    }
}

impl fmt::Display for EffectFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EffectFamily {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == normalized)
            .ok_or_else(|| ValidationError::new(format!("unknown effect family '{}'", s)))
    }
}

/// Coarse rendering cost classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectComplexity {
    Trivial,
    Low,
    Moderate,
    High,
}

/// Progress easing curves for slide transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl Easing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Easing::Linear => "linear",
            Easing::EaseIn => "ease-in",
            Easing::EaseOut => "ease-out",
            Easing::EaseInOut => "ease-in-out",
        }
    }

    /// Map linear progress in `[0, 1]` onto the curve. Endpoints are fixed.
    pub fn apply(&self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            Easing::Linear => p,
            Easing::EaseIn => p * p,
            Easing::EaseOut => 1.0 - (1.0 - p) * (1.0 - p),
            Easing::EaseInOut => {
                if p < 0.5 {
                    2.0 * p * p
                } else {
                    1.0 - 2.0 * (1.0 - p) * (1.0 - p)
                }
            }
        }
    }
}

impl FromStr for Easing {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Easing::Linear),
            "ease-in" => Ok(Easing::EaseIn),
            "ease-out" => Ok(Easing::EaseOut),
            "ease-in-out" => Ok(Easing::EaseInOut),
            other => Err(ValidationError::new(format!(
                "easing must be one of linear, ease-in, ease-out, ease-in-out (got '{}')",
                other
            ))),
        }
    }
}

/// An immutable, validated effect.
///
/// Construction checks the duration against the family and every recognized
/// parameter against its range, so holding an `Effect` means it is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEffect")]
pub struct Effect {
    family: EffectFamily,
    duration: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    parameters: EffectParameters,
}

#[derive(Deserialize)]
struct RawEffect {
    family: EffectFamily,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    parameters: EffectParameters,
}

impl TryFrom<RawEffect> for Effect {
    type Error = ValidationError;

    fn try_from(raw: RawEffect) -> Result<Self, Self::Error> {
        Self::with_parameters(raw.family, raw.duration, raw.parameters)
    }
}

impl Effect {
    /// Create an effect without parameters.
    pub fn new(family: EffectFamily, duration: f64) -> ValidationResult<Self> {
        Self::with_parameters(family, duration, EffectParameters::new())
    }

    /// Create an effect with family-specific parameters.
    pub fn with_parameters(
        family: EffectFamily,
        duration: f64,
        parameters: EffectParameters,
    ) -> ValidationResult<Self> {
        ValidationError::check(validate_effect(family, duration, &parameters))?;
        Ok(Self {
            family,
            duration,
            parameters,
        })
    }

    /// The no-op effect.
    pub fn none() -> Self {
        Self {
            family: EffectFamily::None,
            duration: 0.0,
            parameters: EffectParameters::new(),
        }
    }

    /// Convenience constructor for a texture overlay.
    pub fn gif_overlay(gif_path: impl Into<String>, duration: f64) -> ValidationResult<Self> {
        let mut parameters = EffectParameters::new();
        parameters.insert(params::GIF_PATH.to_string(), Value::String(gif_path.into()));
        Self::with_parameters(EffectFamily::GifOverlay, duration, parameters)
    }

    pub fn family(&self) -> EffectFamily {
        self.family
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn parameters(&self) -> &EffectParameters {
        &self.parameters
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    /// Numeric parameter, if present and numeric.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    /// String parameter, if present and a string.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Slide easing; linear when unset.
    pub fn easing(&self) -> Easing {
        self.text(params::EASING)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// Estimated render time for a video of the given length, in seconds.
    pub fn estimated_processing_time(&self, video_duration: f64) -> f64 {
        video_duration * self.family.time_factor()
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}s)", self.family, self.duration)
    }
}

fn validate_effect(family: EffectFamily, duration: f64, parameters: &EffectParameters) -> Vec<String> {
    let mut issues = Vec::new();

    if !duration.is_finite() {
        issues.push("duration must be a finite number".to_string());
    } else if !family.requires_duration() {
        if duration != 0.0 {
            issues.push(format!("duration must be 0 for effect family {}", family));
        }
    } else if duration <= 0.0 {
        issues.push(format!("duration must be positive for effect family {}", family));
    } else if duration > family.max_duration() {
        issues.push(format!(
            "duration {:.2}s exceeds the {:.0}s maximum for effect family {}",
            duration,
            family.max_duration(),
            family
        ));
    }

    if family.is_slide() {
        if let Some(value) = parameters.get(params::EASING) {
            match value.as_str() {
                Some(s) => {
                    if let Err(e) = s.parse::<Easing>() {
                        issues.extend(e.into_issues());
                    }
                }
                None => issues.push("easing must be a string".to_string()),
            }
        }
    }

    if family.is_circle() {
        check_number(parameters, params::RADIUS, &mut issues, |r| r > 0.0, "must be positive");
        check_number(parameters, params::CENTER_X, &mut issues, unit_range, "must be within [0, 1]");
        check_number(parameters, params::CENTER_Y, &mut issues, unit_range, "must be within [0, 1]");
    }

    if family.is_fade() {
        if let Some(value) = parameters.get(params::COLOR) {
            match value.as_str() {
                Some(color) if is_valid_color(color) => {}
                Some(color) => issues.push(format!(
                    "color must be #RRGGBB or a named color (got '{}')",
                    color
                )),
                None => issues.push("color must be a string".to_string()),
            }
        }
        check_number(parameters, params::ALPHA, &mut issues, unit_range, "must be within [0, 1]");
    }

    if family.is_overlay() {
        match parameters.get(params::GIF_PATH).map(Value::as_str) {
            None => issues.push("gifPath is required for gif overlays".to_string()),
            Some(None) => issues.push("gifPath must be a string".to_string()),
            Some(Some(path)) if path.trim().is_empty() => {
                issues.push("gifPath must not be empty".to_string())
            }
            Some(Some(path)) if !path.to_lowercase().ends_with(".gif") => {
                issues.push(format!("gifPath must reference a .gif file (got '{}')", path))
            }
            Some(Some(_)) => {}
        }
        check_number(parameters, params::X, &mut issues, |v| v >= 0.0, "must be non-negative");
        check_number(parameters, params::Y, &mut issues, |v| v >= 0.0, "must be non-negative");
        check_number(parameters, params::SCALE, &mut issues, |v| v > 0.0, "must be positive");
    }

    issues
}

fn unit_range(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn check_number(
    parameters: &EffectParameters,
    key: &str,
    issues: &mut Vec<String>,
    accept: impl Fn(f64) -> bool,
    rule: &str,
) {
    let Some(value) = parameters.get(key) else {
        return;
    };
    match value.as_f64() {
        Some(v) if v.is_finite() && accept(v) => {}
        Some(v) => issues.push(format!("{} {} (got {})", key, rule, v)),
        None => issues.push(format!("{} must be a number", key)),
    }
}

/// `#RRGGBB` or one of [`NAMED_COLORS`].
pub fn is_valid_color(color: &str) -> bool {
    if let Some(hex) = color.strip_prefix('#') {
        return hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    NAMED_COLORS.contains(&color.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params_of(value: Value) -> EffectParameters {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_non_positive_duration_rejected_for_every_timed_family() {
        for family in EffectFamily::ALL.into_iter().filter(|f| f.requires_duration()) {
            for duration in [0.0, -1.0] {
                let result = if family.is_overlay() {
                    Effect::gif_overlay("star.gif", duration)
                } else {
                    Effect::new(family, duration)
                };
                assert!(result.is_err(), "{} accepted duration {}", family, duration);
            }
        }
    }

    #[test]
    fn test_none_requires_zero_duration() {
        assert!(Effect::new(EffectFamily::None, 0.0).is_ok());
        assert!(Effect::new(EffectFamily::None, 1.0).is_err());
        assert_eq!(Effect::none().duration(), 0.0);
    }

    #[test]
    fn test_family_maximums() {
        assert!(Effect::new(EffectFamily::SlideLeftToRight, 10.0).is_ok());
        assert!(Effect::new(EffectFamily::SlideLeftToRight, 10.5).is_err());
        assert!(Effect::new(EffectFamily::FadeIn, 30.0).is_ok());
        assert!(Effect::new(EffectFamily::CircleExpand, 11.0).is_err());
        assert!(Effect::gif_overlay("a.gif", 60.0).is_ok());
        assert!(Effect::gif_overlay("a.gif", 61.0).is_err());
    }

    #[test]
    fn test_circle_parameter_ranges() {
        let bad = Effect::with_parameters(
            EffectFamily::CircleExpand,
            2.0,
            params_of(json!({"radius": -5, "centerX": 1.5, "centerY": "mid"})),
        )
        .unwrap_err();
        assert_eq!(bad.issues().len(), 3);

        let good = Effect::with_parameters(
            EffectFamily::CircleRotateClockwise,
            2.0,
            params_of(json!({"radius": 300, "centerX": 0.25, "centerY": 0.75})),
        )
        .unwrap();
        assert_eq!(good.number(params::RADIUS), Some(300.0));
    }

    #[test]
    fn test_easing_validation_and_curve() {
        assert!(Effect::with_parameters(
            EffectFamily::SlideTopToBottom,
            1.0,
            params_of(json!({"easing": "bounce"})),
        )
        .is_err());

        let eased = Effect::with_parameters(
            EffectFamily::SlideTopToBottom,
            1.0,
            params_of(json!({"easing": "ease-in-out"})),
        )
        .unwrap();
        assert_eq!(eased.easing(), Easing::EaseInOut);

        for easing in [Easing::Linear, Easing::EaseIn, Easing::EaseOut, Easing::EaseInOut] {
            assert_eq!(easing.apply(0.0), 0.0);
            assert_eq!(easing.apply(1.0), 1.0);
            assert_eq!(easing.apply(2.0), 1.0);
        }
        assert!((Easing::EaseIn.apply(0.5) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_fade_color_and_alpha() {
        let ok = Effect::with_parameters(
            EffectFamily::FadeIn,
            3.0,
            params_of(json!({"color": "#FFaa00", "alpha": 0.5})),
        );
        assert!(ok.is_ok());

        let err = Effect::with_parameters(
            EffectFamily::FadeIn,
            3.0,
            params_of(json!({"color": "chartreuse", "alpha": 1.5})),
        )
        .unwrap_err();
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_overlay_requires_gif_path() {
        let err = Effect::new(EffectFamily::GifOverlay, 5.0).unwrap_err();
        assert!(err.issues()[0].contains("gifPath"));
        assert!(Effect::gif_overlay("texture.png", 5.0).is_err());

        let err = Effect::with_parameters(
            EffectFamily::GifOverlay,
            5.0,
            params_of(json!({"gifPath": "star.gif", "x": -1, "scale": 0})),
        )
        .unwrap_err();
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_family_predicates() {
        assert!(EffectFamily::SlideBottomToTop.is_slide());
        assert!(EffectFamily::CircleContract.is_circle());
        assert!(EffectFamily::FadeIn.is_transition());
        assert!(!EffectFamily::GifOverlay.is_transition());
        assert!(!EffectFamily::None.requires_duration());
        assert_eq!(EffectFamily::None.complexity(), EffectComplexity::Trivial);
        assert_eq!(
            "circle-rotate-clockwise".parse::<EffectFamily>().unwrap(),
            EffectFamily::CircleRotateClockwise
        );
        assert!("spiral".parse::<EffectFamily>().is_err());
    }

    #[test]
    fn test_deserialize_runs_validation() {
        let effect: Effect = serde_json::from_value(json!({
            "family": "circle_expand",
            "duration": 2.0,
            "parameters": {"radius": 400}
        }))
        .unwrap();
        assert_eq!(effect.family(), EffectFamily::CircleExpand);

        let invalid = serde_json::from_value::<Effect>(json!({"family": "fade_in", "duration": 0}));
        assert!(invalid.is_err());
    }

    #[test]
    fn test_estimated_processing_time() {
        let slide = Effect::new(EffectFamily::SlideRightToLeft, 2.0).unwrap();
        assert!((slide.estimated_processing_time(10.0) - 1.5).abs() < 1e-9);
    }
}
