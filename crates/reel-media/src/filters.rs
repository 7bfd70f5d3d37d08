//! FFmpeg filter programs.
//!
//! Each builder renders the reveal geometry from [`crate::geometry`] as a
//! `filter_complex` graph whose final video pad is labelled `[v]`.

use std::path::{Path, PathBuf};

use reel_models::{Dimensions, EncodingConfig};

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::geometry::{easing_expr, fmt_num, progress_expr, CircleMask, SlideDirection};

/// Label of the final video pad in every program.
pub const OUTPUT_LABEL: &str = "v";

/// A declarative filter program: inputs, graph, and expected output length.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterProgram {
    pub inputs: Vec<FfmpegInput>,
    pub graph: String,
    /// Map audio from the first input when present.
    pub map_audio: bool,
    /// Output length in seconds, used for progress and as a hard limit.
    pub duration: f64,
}

impl FilterProgram {
    pub fn new(main: impl AsRef<Path>, graph: impl Into<String>, duration: f64) -> Self {
        Self {
            inputs: vec![FfmpegInput::new(main)],
            graph: graph.into(),
            map_audio: true,
            duration,
        }
    }

    pub fn with_input(mut self, input: FfmpegInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Paths of every input, in `-i` order.
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.inputs.iter().map(|i| i.path().to_path_buf()).collect()
    }

    /// Render as a complete FFmpeg invocation.
    pub fn to_command(&self, output: impl AsRef<Path>, encoding: &EncodingConfig) -> FfmpegCommand {
        let mut inputs = self.inputs.iter();
        let first = inputs
            .next()
            .map(|i| i.path().to_path_buf())
            .unwrap_or_default();

        let mut cmd = FfmpegCommand::new(first, output);
        if let Some(first_input) = self.inputs.first() {
            for arg in first_input.args() {
                cmd = cmd.input_arg(arg.clone());
            }
        }
        for input in inputs {
            cmd = cmd.input(input.clone());
        }

        cmd = cmd
            .filter_complex(self.graph.clone())
            .map(format!("[{}]", OUTPUT_LABEL));
        if self.map_audio {
            cmd = cmd.map("0:a?");
        }
        cmd.encoding(encoding).duration(self.duration)
    }
}

/// How main and background share the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackLayout {
    /// Main on top, background below.
    #[default]
    Vertical,
    /// Main on the left, background on the right.
    Horizontal,
}

impl StackLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackLayout::Vertical => "vertical",
            StackLayout::Horizontal => "horizontal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vertical" | "vstack" => Some(StackLayout::Vertical),
            "horizontal" | "hstack" => Some(StackLayout::Horizontal),
            _ => None,
        }
    }

    /// Size of each half, rounded down to even for 4:2:0 chroma.
    pub fn cell(&self, canvas: Dimensions) -> (u32, u32) {
        let even = |v: u32| (v & !1).max(2);
        match self {
            StackLayout::Vertical => (even(canvas.width()), even(canvas.height() / 2)),
            StackLayout::Horizontal => (even(canvas.width() / 2), even(canvas.height())),
        }
    }

    /// Size of the stacked result.
    pub fn stacked(&self, canvas: Dimensions) -> (u32, u32) {
        let (w, h) = self.cell(canvas);
        match self {
            StackLayout::Vertical => (w, h * 2),
            StackLayout::Horizontal => (w * 2, h),
        }
    }
}

fn fit_into(label_in: &str, w: u32, h: u32, label_out: &str) -> String {
    format!(
        "[{label_in}]scale={w}:{h}:force_original_aspect_ratio=decrease:flags=lanczos,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1[{label_out}]"
    )
}

/// Fit the main clip (and the looping background, when given) onto the canvas.
pub fn compose_program(
    main: &Path,
    background: Option<&Path>,
    layout: StackLayout,
    canvas: Dimensions,
    duration: f64,
) -> FilterProgram {
    match background {
        None => {
            let (w, h) = (canvas.width() & !1, canvas.height() & !1);
            FilterProgram::new(main, fit_into("0:v", w, h, OUTPUT_LABEL), duration)
        }
        Some(background) => {
            let (w, h) = layout.cell(canvas);
            let stack = match layout {
                StackLayout::Vertical => "vstack",
                StackLayout::Horizontal => "hstack",
            };
            let graph = format!(
                "{};{};[main][background]{stack}=inputs=2:shortest=1[{OUTPUT_LABEL}]",
                fit_into("0:v", w, h, "main"),
                fit_into("1:v", w, h, "background"),
            );
            FilterProgram::new(main, graph, duration).with_input(
                FfmpegInput::new(background)
                    .arg("-stream_loop")
                    .arg("-1"),
            )
        }
    }
}

fn solid_background(color: &str, canvas: Dimensions, duration: f64) -> String {
    format!(
        "color=c={color}:s={}x{}:d={}[bg]",
        canvas.width(),
        canvas.height(),
        fmt_num(duration)
    )
}

/// Keep RGB, replace alpha with `alpha_expr` (0..255).
fn alpha_mask(canvas: Dimensions, alpha_expr: &str) -> String {
    format!(
        "[0:v]scale={}:{},format=rgba,geq=r='r(X,Y)':g='g(X,Y)':b='b(X,Y)':a='{alpha_expr}'[clip]",
        canvas.width(),
        canvas.height()
    )
}

/// The clip slides in over black along `direction`.
pub fn slide_program(
    main: &Path,
    canvas: Dimensions,
    clip_duration: f64,
    direction: SlideDirection,
    easing: reel_models::Easing,
    effect_duration: f64,
) -> FilterProgram {
    let p = easing_expr(easing, &progress_expr("t", effect_duration));
    let w = canvas.width();
    let h = canvas.height();
    let (x, y) = match direction {
        SlideDirection::RightToLeft => (format!("{w}*(1-{p})"), "0".to_string()),
        SlideDirection::LeftToRight => (format!("-{w}*(1-{p})"), "0".to_string()),
        SlideDirection::TopToBottom => ("0".to_string(), format!("-{h}*(1-{p})")),
        SlideDirection::BottomToTop => ("0".to_string(), format!("{h}*(1-{p})")),
    };

    let graph = format!(
        "{};[0:v]scale={w}:{h},setsar=1[clip];[bg][clip]overlay=x='{x}':y='{y}':eval=frame:shortest=1[{OUTPUT_LABEL}]",
        solid_background("black", canvas, clip_duration),
    );
    FilterProgram::new(main, graph, clip_duration)
}

/// Which circular mask to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircleShape {
    Expand,
    Contract,
    Clockwise,
    CounterClockwise,
}

/// Per-pixel circular or angular mask over black.
pub fn circle_program(
    main: &Path,
    canvas: Dimensions,
    clip_duration: f64,
    shape: CircleShape,
    mask: CircleMask,
    effect_duration: f64,
) -> FilterProgram {
    let d = fmt_num(effect_duration);
    let p = progress_expr("T", effect_duration);
    let cx = fmt_num(mask.cx);
    let cy = fmt_num(mask.cy);
    let r = fmt_num(mask.max_radius);
    let dist = format!("hypot(X-{cx},Y-{cy})");
    let angle = format!("mod(atan2(Y-{cy},X-{cx})+2*PI,2*PI)");

    let visible = match shape {
        CircleShape::Expand => format!("lte({dist},{p}*{r})"),
        CircleShape::Contract => format!("gt({dist},(1-{p})*{r})"),
        CircleShape::Clockwise => format!("lt({angle},{p}*2*PI)"),
        CircleShape::CounterClockwise => format!("gte({angle},2*PI-{p}*2*PI)"),
    };
    let alpha = format!("if(gte(T,{d}),255,if({visible},255,0))");

    let graph = format!(
        "{};{};[bg][clip]overlay=shortest=1[{OUTPUT_LABEL}]",
        solid_background("black", canvas, clip_duration),
        alpha_mask(canvas, &alpha),
    );
    FilterProgram::new(main, graph, clip_duration)
}

/// Clip fades in over a solid color, starting at `initial_alpha`.
pub fn fade_program(
    main: &Path,
    canvas: Dimensions,
    clip_duration: f64,
    color: &str,
    initial_alpha: f64,
    effect_duration: f64,
) -> FilterProgram {
    let a0 = fmt_num(initial_alpha.clamp(0.0, 1.0));
    let p = progress_expr("T", effect_duration);
    let alpha = format!("255*({a0}+(1-{a0})*{p})");

    let graph = format!(
        "{};{};[bg][clip]overlay=shortest=1[{OUTPUT_LABEL}]",
        solid_background(&ffmpeg_color(color), canvas, clip_duration),
        alpha_mask(canvas, &alpha),
    );
    FilterProgram::new(main, graph, clip_duration)
}

/// Looping texture composited at `(x, y)` while `t < effect_duration`.
pub fn overlay_program(
    main: &Path,
    texture: &Path,
    clip_duration: f64,
    x: f64,
    y: f64,
    scale: f64,
    effect_duration: f64,
) -> FilterProgram {
    let position = format!(
        "x={}:y={}:shortest=1:enable='lt(t,{})'",
        fmt_num(x),
        fmt_num(y),
        fmt_num(effect_duration)
    );
    let graph = if (scale - 1.0).abs() > f64::EPSILON {
        let s = fmt_num(scale);
        format!("[1:v]scale=iw*{s}:ih*{s}[texture];[0:v][texture]overlay={position}[{OUTPUT_LABEL}]")
    } else {
        format!("[0:v][1:v]overlay={position}[{OUTPUT_LABEL}]")
    };

    FilterProgram::new(main, graph, clip_duration)
        .with_input(FfmpegInput::new(texture).arg("-ignore_loop").arg("0"))
}

/// Translate an accepted color name or `#RRGGBB` into FFmpeg color syntax.
pub fn ffmpeg_color(color: &str) -> String {
    if let Some(hex) = color.strip_prefix('#') {
        return format!("0x{}", hex.to_uppercase());
    }
    let hex = match color.to_lowercase().as_str() {
        "transparent" => return "black@0".to_string(),
        "white" => "FFFFFF",
        "red" => "FF0000",
        "green" => "008000",
        "blue" => "0000FF",
        "yellow" => "FFFF00",
        "cyan" => "00FFFF",
        "magenta" => "FF00FF",
        "gray" | "grey" => "808080",
        "orange" => "FFA500",
        "purple" => "800080",
        "brown" => "A52A2A",
        "pink" => "FFC0CB",
        _ => "000000",
    };
    format!("0x{}", hex)
}
