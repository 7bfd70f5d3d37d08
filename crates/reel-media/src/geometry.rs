//! Reveal geometry for transition effects.
//!
//! Every function here is pure. Given elapsed time `t`, the effect duration
//! `d` and the canvas, it answers which part of the clip is visible. Progress
//! is always `min(1, t/d)`, and once `t >= d` every family is fully revealed.

use std::f64::consts::TAU;

use reel_models::{params, Dimensions, Easing, Effect, EffectFamily};

/// Normalized transition progress, clamped to `[0, 1]`.
pub fn progress(elapsed: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 1.0;
    }
    (elapsed / duration).clamp(0.0, 1.0)
}

/// Axis-aligned visible region, half-open on the far edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.area() <= 0.0
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

/// Direction the incoming clip travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideDirection {
    RightToLeft,
    LeftToRight,
    TopToBottom,
    BottomToTop,
}

impl SlideDirection {
    pub fn from_family(family: EffectFamily) -> Option<Self> {
        match family {
            EffectFamily::SlideRightToLeft => Some(Self::RightToLeft),
            EffectFamily::SlideLeftToRight => Some(Self::LeftToRight),
            EffectFamily::SlideTopToBottom => Some(Self::TopToBottom),
            EffectFamily::SlideBottomToTop => Some(Self::BottomToTop),
            _ => None,
        }
    }

    /// Top-left position of the clip at (eased) progress `p`.
    pub fn offset(&self, p: f64, canvas: Dimensions) -> (f64, f64) {
        let w = canvas.width() as f64;
        let h = canvas.height() as f64;
        let remaining = 1.0 - p.clamp(0.0, 1.0);
        match self {
            SlideDirection::RightToLeft => (w * remaining, 0.0),
            SlideDirection::LeftToRight => (-w * remaining, 0.0),
            SlideDirection::TopToBottom => (0.0, -h * remaining),
            SlideDirection::BottomToTop => (0.0, h * remaining),
        }
    }
}

/// Visible part of the canvas for a slide at (eased) progress `p`.
pub fn slide_reveal(direction: SlideDirection, p: f64, canvas: Dimensions) -> Rect {
    let w = canvas.width() as f64;
    let h = canvas.height() as f64;
    let (dx, dy) = direction.offset(p, canvas);
    Rect {
        x0: dx.max(0.0),
        y0: dy.max(0.0),
        x1: (dx + w).min(w),
        y1: (dy + h).min(h),
    }
}

/// Center and animated radius limit of a circular mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleMask {
    pub cx: f64,
    pub cy: f64,
    pub max_radius: f64,
}

impl CircleMask {
    /// Mask centered at fractional `(center_x, center_y)` of the canvas.
    ///
    /// Without an explicit radius the limit is the larger of the canvas
    /// diagonal and the distance from the center to its farthest corner, so
    /// off-center masks still reach every pixel.
    pub fn new(canvas: Dimensions, center_x: f64, center_y: f64, radius: Option<f64>) -> Self {
        let cx = center_x * canvas.width() as f64;
        let cy = center_y * canvas.height() as f64;
        let max_radius = radius.unwrap_or_else(|| Self::reach(canvas, cx, cy));
        Self { cx, cy, max_radius }
    }

    /// Centered mask using the default radius.
    pub fn centered(canvas: Dimensions) -> Self {
        Self::new(canvas, 0.5, 0.5, None)
    }

    /// Read center and radius parameters from a circle effect.
    pub fn for_effect(effect: &Effect, canvas: Dimensions) -> Self {
        Self::new(
            canvas,
            effect.number(params::CENTER_X).unwrap_or(0.5),
            effect.number(params::CENTER_Y).unwrap_or(0.5),
            effect.number(params::RADIUS),
        )
    }

    fn reach(canvas: Dimensions, cx: f64, cy: f64) -> f64 {
        let w = canvas.width() as f64;
        let h = canvas.height() as f64;
        let farthest = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
            .iter()
            .map(|(x, y)| (x - cx).hypot(y - cy))
            .fold(0.0_f64, f64::max);
        canvas.diagonal().max(farthest)
    }

    pub fn expand_radius(&self, p: f64) -> f64 {
        p.clamp(0.0, 1.0) * self.max_radius
    }

    pub fn contract_radius(&self, p: f64) -> f64 {
        (1.0 - p.clamp(0.0, 1.0)) * self.max_radius
    }

    pub fn distance(&self, x: f64, y: f64) -> f64 {
        (x - self.cx).hypot(y - self.cy)
    }

    /// Angle of a point around the center in `[0, 2π)`, clockwise on screen.
    pub fn angle(&self, x: f64, y: f64) -> f64 {
        (y - self.cy).atan2(x - self.cx).rem_euclid(TAU)
    }
}

/// Sweep angle of a clock wipe at progress `p`.
pub fn sweep_angle(p: f64) -> f64 {
    p.clamp(0.0, 1.0) * TAU
}

/// Opacity of a fade at progress `p`, starting from `initial`.
pub fn fade_alpha(p: f64, initial: f64) -> f64 {
    let a0 = initial.clamp(0.0, 1.0);
    (a0 + (1.0 - a0) * p.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// `background·(1-alpha) + foreground·alpha`.
pub fn composite(background: f64, foreground: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    background * (1.0 - alpha) + foreground * alpha
}

/// The reveal mask of an effect at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reveal {
    /// Whole clip visible.
    Full,
    /// Only the rectangle is visible.
    Rect(Rect),
    /// Inside the disc is visible.
    Disc { mask: CircleMask, radius: f64 },
    /// An opaque disc hides the clip; outside it is visible.
    Hole { mask: CircleMask, radius: f64 },
    /// Angular clock wipe.
    Sweep {
        mask: CircleMask,
        angle: f64,
        clockwise: bool,
    },
    /// Uniform blend over a background.
    Blend { alpha: f64 },
}

impl Reveal {
    /// Opacity of the clip at pixel center `(x, y)`, in `[0, 1]`.
    pub fn opacity(&self, x: f64, y: f64) -> f64 {
        let visible = match self {
            Reveal::Full => true,
            Reveal::Rect(rect) => rect.contains(x, y),
            Reveal::Disc { mask, radius } => mask.distance(x, y) <= *radius,
            Reveal::Hole { mask, radius } => mask.distance(x, y) > *radius,
            Reveal::Sweep {
                mask,
                angle,
                clockwise,
            } => {
                let phi = mask.angle(x, y);
                if *clockwise {
                    phi < *angle
                } else {
                    phi >= TAU - angle
                }
            }
            Reveal::Blend { alpha } => return *alpha,
        };
        if visible {
            1.0
        } else {
            0.0
        }
    }

    pub fn is_visible(&self, x: f64, y: f64) -> bool {
        self.opacity(x, y) > 0.0
    }

    /// Mean opacity over pixel centers, sampled every `step` pixels.
    pub fn coverage(&self, canvas: Dimensions, step: u32) -> f64 {
        let step = step.max(1);
        let mut total = 0.0;
        let mut samples = 0u64;
        for py in (0..canvas.height()).step_by(step as usize) {
            for px in (0..canvas.width()).step_by(step as usize) {
                total += self.opacity(px as f64 + 0.5, py as f64 + 0.5);
                samples += 1;
            }
        }
        if samples == 0 {
            0.0
        } else {
            total / samples as f64
        }
    }
}

/// Reveal mask of `effect` at `elapsed` seconds on `canvas`.
pub fn reveal_at(effect: &Effect, canvas: Dimensions, elapsed: f64) -> Reveal {
    let family = effect.family();
    let p = progress(elapsed, effect.duration());
    if p >= 1.0 || !family.is_transition() {
        return Reveal::Full;
    }

    if let Some(direction) = SlideDirection::from_family(family) {
        return Reveal::Rect(slide_reveal(direction, effect.easing().apply(p), canvas));
    }

    let mask = CircleMask::for_effect(effect, canvas);
    match family {
        EffectFamily::CircleExpand => Reveal::Disc {
            mask,
            radius: mask.expand_radius(p),
        },
        EffectFamily::CircleContract => Reveal::Hole {
            mask,
            radius: mask.contract_radius(p),
        },
        EffectFamily::CircleRotateClockwise => Reveal::Sweep {
            mask,
            angle: sweep_angle(p),
            clockwise: true,
        },
        EffectFamily::CircleRotateCounterClockwise => Reveal::Sweep {
            mask,
            angle: sweep_angle(p),
            clockwise: false,
        },
        EffectFamily::FadeIn => Reveal::Blend {
            alpha: fade_alpha(p, effect.number(params::ALPHA).unwrap_or(0.0)),
        },
        _ => Reveal::Full,
    }
}

/// Easing curve as a transcoder expression over the progress expression `p`.
pub fn easing_expr(easing: Easing, p: &str) -> String {
    match easing {
        Easing::Linear => p.to_string(),
        Easing::EaseIn => format!("pow({p},2)"),
        Easing::EaseOut => format!("(1-pow(1-{p},2))"),
        Easing::EaseInOut => format!("if(lt({p},0.5),2*pow({p},2),1-2*pow(1-{p},2))"),
    }
}

/// `min(1, t/d)` as a transcoder expression over the time variable `var`.
pub fn progress_expr(var: &str, duration: f64) -> String {
    format!("min(1,{var}/{})", fmt_num(duration))
}

/// Format a number for an expression: fixed precision, trailing zeros trimmed.
pub fn fmt_num(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
