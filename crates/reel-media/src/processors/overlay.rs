//! GIF texture overlay.
//!
//! The source GIF is tiled to the clip's canvas once, cached in the
//! generated asset directory, then looped over the clip at `(x, y)`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use reel_models::{params, Effect, EffectFamily, MediaAsset, ValidationError};

use super::EffectProcessor;
use crate::assets::GeneratedAssets;
use crate::error::{MediaError, MediaResult};
use crate::filters::{overlay_program, FilterProgram};
use crate::texture::{TextureTiler, TilingOutcome};

const FAMILIES: &[EffectFamily] = &[EffectFamily::GifOverlay];

/// Typed overlay parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayParams {
    pub gif_path: PathBuf,
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl OverlayParams {
    pub const DEFAULT_X: f64 = 10.0;
    pub const DEFAULT_Y: f64 = 10.0;
    pub const DEFAULT_SCALE: f64 = 1.0;

    pub fn from_effect(effect: &Effect) -> MediaResult<Self> {
        let gif_path = effect
            .text(params::GIF_PATH)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ValidationError::new("gifPath is required for gif overlays"))?;
        Ok(Self {
            gif_path: PathBuf::from(gif_path),
            x: effect.number(params::X).unwrap_or(Self::DEFAULT_X),
            y: effect.number(params::Y).unwrap_or(Self::DEFAULT_Y),
            scale: effect.number(params::SCALE).unwrap_or(Self::DEFAULT_SCALE),
        })
    }
}

#[derive(Debug, Clone)]
pub struct OverlayProcessor {
    assets: GeneratedAssets,
    tiler: TextureTiler,
}

impl OverlayProcessor {
    pub fn new(assets: GeneratedAssets) -> Self {
        Self {
            assets,
            tiler: TextureTiler::new(),
        }
    }

    /// Cached tiled texture of `gif_path` sized to `asset`.
    pub fn texture_path(&self, asset: &MediaAsset, gif_path: &Path) -> PathBuf {
        self.assets.tiled_texture_path(gif_path, asset.dimensions())
    }
}

#[async_trait]
impl EffectProcessor for OverlayProcessor {
    fn name(&self) -> &'static str {
        "gif_overlay"
    }

    fn families(&self) -> &'static [EffectFamily] {
        FAMILIES
    }

    fn max_duration(&self) -> f64 {
        60.0
    }

    fn validate_parameters(&self, effect: &Effect) -> Vec<String> {
        let params = match OverlayParams::from_effect(effect) {
            Ok(params) => params,
            Err(e) => return vec![e.to_string()],
        };

        let mut issues = Vec::new();
        if !params.gif_path.is_file() {
            issues.push(format!("gif file not found: {}", params.gif_path.display()));
        }
        if params.x < 0.0 || params.y < 0.0 {
            issues.push(format!("overlay position must be non-negative (got {}, {})", params.x, params.y));
        }
        if !(params.scale.is_finite() && params.scale > 0.0) {
            issues.push(format!("scale must be positive (got {})", params.scale));
        }
        issues
    }

    fn estimate_cost(&self, asset: &MediaAsset, effect: &Effect) -> f64 {
        let mut cost = asset.duration() * 0.3;
        if effect.duration() > 10.0 {
            cost *= 1.2;
        }
        if [params::X, params::Y, params::SCALE]
            .iter()
            .any(|key| effect.has_parameter(key))
        {
            cost *= 1.1;
        }
        cost
    }

    fn build_program(&self, asset: &MediaAsset, effect: &Effect) -> MediaResult<FilterProgram> {
        let params = OverlayParams::from_effect(effect)?;
        let texture = self.texture_path(asset, &params.gif_path);
        Ok(overlay_program(
            asset.path(),
            &texture,
            asset.duration(),
            params.x,
            params.y,
            params.scale,
            effect.duration(),
        ))
    }

    async fn prepare(&self, asset: &MediaAsset, effect: &Effect) -> MediaResult<()> {
        let params = OverlayParams::from_effect(effect)?;
        let texture = self.texture_path(asset, &params.gif_path);
        self.assets.ensure().await?;

        let tiler = self.tiler;
        let canvas = asset.dimensions();
        let outcome = tokio::task::spawn_blocking(move || tiler.tile_gif(&params.gif_path, &texture, canvas))
            .await
            .map_err(|e| MediaError::internal(format!("texture tiling task failed: {}", e)))??;

        if outcome == TilingOutcome::AlreadyExists {
            debug!("reusing cached tiled texture");
        }
        Ok(())
    }
}
