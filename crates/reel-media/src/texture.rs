//! Texture tiling for GIF overlays.
//!
//! A small looping GIF is turned into a mosaic covering the whole canvas.
//! Odd columns are mirrored and odd rows flipped so neighbouring tiles meet
//! on identical edges. Frame timing and disposal survive unchanged.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use gif::{ColorOutput, DecodeOptions, DisposalMethod, Encoder, Frame, Repeat};
use image::{imageops, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use reel_models::Dimensions;

use crate::error::{MediaError, MediaResult};

/// Delay substituted for frames that declare none, in centiseconds.
pub const DEFAULT_FRAME_DELAY_CS: u16 = 10;

/// NeuQuant speed used when a frame has more than 256 colors.
const QUANTIZER_SPEED: i32 = 10;

/// Tile layout covering a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl TileGrid {
    pub fn new(tile_width: u32, tile_height: u32, canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            tiles_x: canvas_width.div_ceil(tile_width.max(1)),
            tiles_y: canvas_height.div_ceil(tile_height.max(1)),
            tile_width,
            tile_height,
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Top-left corner of tile `(x, y)`.
    pub fn origin(&self, x: u32, y: u32) -> (u32, u32) {
        (x * self.tile_width, y * self.tile_height)
    }
}

/// What [`TextureTiler::tile_gif`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilingOutcome {
    Generated { frames: usize },
    AlreadyExists,
}

/// Expand palette indices to RGBA.
///
/// Every index whose palette color equals the transparent entry's color gets
/// alpha 0, everything else alpha 255. Out-of-range indices are transparent.
pub fn resolve_transparency(indices: &[u8], palette: &[u8], transparent: Option<u8>) -> Vec<u8> {
    let color = |index: usize| palette.get(index * 3..index * 3 + 3);
    let key = transparent.and_then(|t| color(t as usize));

    let mut rgba = Vec::with_capacity(indices.len() * 4);
    for &index in indices {
        match color(index as usize) {
            Some(rgb) => {
                rgba.extend_from_slice(rgb);
                rgba.push(if key == Some(rgb) { 0 } else { 255 });
            }
            None => rgba.extend_from_slice(&[0, 0, 0, 0]),
        }
    }
    rgba
}

/// Cover a `canvas_width x canvas_height` canvas with alternately mirrored
/// and flipped copies of `tile`, alpha-composited and clipped at the edges.
pub fn tile_frame(tile: &RgbaImage, canvas_width: u32, canvas_height: u32) -> RgbaImage {
    let grid = TileGrid::new(tile.width(), tile.height(), canvas_width, canvas_height);
    let mirrored = imageops::flip_horizontal(tile);
    let flipped = imageops::flip_vertical(tile);
    let both = imageops::flip_vertical(&mirrored);

    let mut canvas = RgbaImage::new(canvas_width, canvas_height);
    for y in 0..grid.tiles_y {
        for x in 0..grid.tiles_x {
            let source = match (x % 2 == 1, y % 2 == 1) {
                (false, false) => tile,
                (true, false) => &mirrored,
                (false, true) => &flipped,
                (true, true) => &both,
            };
            let (ox, oy) = grid.origin(x, y);
            imageops::overlay(&mut canvas, source, ox as i64, oy as i64);
        }
    }
    canvas
}

/// Hex digits of the source key kept in texture names.
const SOURCE_KEY_LEN: usize = 12;

/// Identifies one version of one GIF: its canonical path plus size and
/// mtime when the file can be read.
fn source_key(source: &Path) -> String {
    let canonical = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    if let Ok(meta) = fs::metadata(&canonical) {
        hasher.update(meta.len().to_le_bytes());
        if let Ok(age) = meta.modified().map(|m| m.duration_since(std::time::UNIX_EPOCH)) {
            hasher.update(age.unwrap_or_default().as_nanos().to_le_bytes());
        }
    }
    let mut key = format!("{:x}", hasher.finalize());
    key.truncate(SOURCE_KEY_LEN);
    key
}

/// `<stem>_<key>_tiled_<W>x<H>.gif`, where `<key>` distinguishes sources
/// that share a file stem.
pub fn tiled_texture_name(source: &Path, canvas: Dimensions) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "texture".to_string());
    format!(
        "{}_{}_tiled_{}x{}.gif",
        stem,
        source_key(source),
        canvas.width(),
        canvas.height()
    )
}

/// Decodes a GIF, tiles every frame and writes the looping result.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureTiler;

impl TextureTiler {
    pub fn new() -> Self {
        Self
    }

    /// Tile `source` onto `canvas` and write it to `output`.
    ///
    /// Returns [`TilingOutcome::AlreadyExists`] without touching anything if
    /// `output` is present. The result is written beside `output` and renamed
    /// into place, so a partial file never appears under the final name.
    pub fn tile_gif(&self, source: &Path, output: &Path, canvas: Dimensions) -> MediaResult<TilingOutcome> {
        if output.exists() {
            debug!(output = %output.display(), "tiled texture already exists");
            return Ok(TilingOutcome::AlreadyExists);
        }
        if canvas.width() > u16::MAX as u32 || canvas.height() > u16::MAX as u32 {
            return Err(MediaError::texture(format!("canvas {} exceeds GIF limits", canvas)));
        }
        if !source.exists() {
            return Err(MediaError::FileNotFound(source.to_path_buf()));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = partial_path(output);
        let frames = match self.write_tiled(source, &partial, canvas) {
            Ok(frames) => frames,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };
        fs::rename(&partial, output)?;

        info!(
            source = %source.display(),
            output = %output.display(),
            frames,
            canvas = %canvas,
            "generated tiled texture"
        );
        Ok(TilingOutcome::Generated { frames })
    }

    fn write_tiled(&self, source: &Path, destination: &Path, canvas: Dimensions) -> MediaResult<usize> {
        let mut options = DecodeOptions::new();
        options.set_color_output(ColorOutput::Indexed);
        let mut decoder = options.read_info(BufReader::new(File::open(source)?))?;

        let tile_width = decoder.width() as u32;
        let tile_height = decoder.height() as u32;
        if tile_width == 0 || tile_height == 0 {
            return Err(MediaError::texture("source GIF has an empty logical screen"));
        }
        let global_palette = decoder.global_palette().map(<[u8]>::to_vec);

        let (width, height) = (canvas.width() as u16, canvas.height() as u16);
        let writer = BufWriter::new(File::create(destination)?);
        let mut encoder = Encoder::new(writer, width, height, &[])?;
        encoder.set_repeat(Repeat::Infinite)?;

        let mut frames = 0;
        while let Some(frame) = decoder.read_next_frame()? {
            let tile = frame_to_tile(frame, global_palette.as_deref(), tile_width, tile_height)?;
            let mut pixels = tile_frame(&tile, canvas.width(), canvas.height()).into_raw();
            // one transparent color, so it maps to a single reserved index
            for pixel in pixels.chunks_exact_mut(4) {
                if pixel[3] == 0 {
                    pixel.fill(0);
                }
            }

            let mut tiled = Frame::from_rgba_speed(width, height, &mut pixels, QUANTIZER_SPEED);
            tiled.delay = if frame.delay == 0 {
                DEFAULT_FRAME_DELAY_CS
            } else {
                frame.delay
            };
            tiled.dispose = match frame.dispose {
                DisposalMethod::Any => DisposalMethod::Background,
                other => other,
            };
            encoder.write_frame(&tiled)?;
            frames += 1;
        }

        if frames == 0 {
            return Err(MediaError::texture("source GIF contains no frames"));
        }
        encoder.into_inner()?.flush()?;
        Ok(frames)
    }
}

/// Place one decoded frame onto a transparent tile the size of the logical screen.
fn frame_to_tile(
    frame: &Frame<'_>,
    global_palette: Option<&[u8]>,
    tile_width: u32,
    tile_height: u32,
) -> MediaResult<RgbaImage> {
    let palette = frame
        .palette
        .as_deref()
        .or(global_palette)
        .ok_or_else(|| MediaError::texture("GIF frame has no palette"))?;

    let rgba = resolve_transparency(&frame.buffer, palette, frame.transparent);
    let patch = RgbaImage::from_raw(frame.width as u32, frame.height as u32, rgba)
        .ok_or_else(|| MediaError::texture("GIF frame buffer does not match its size"))?;

    let mut tile = RgbaImage::new(tile_width, tile_height);
    imageops::replace(&mut tile, &patch, frame.left as i64, frame.top as i64);
    Ok(tile)
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    output.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLUE: [u8; 3] = [0, 0, 255];
    const KEY: [u8; 3] = [255, 0, 255];

    /// 64x64 fixture: left half red, top-right green, bottom-right blue,
    /// with a transparent pixel at (5, 5).
    fn write_fixture(path: &Path) {
        let palette: Vec<u8> = [RED, GREEN, BLUE, KEY].concat();
        let mut indices = vec![0u8; 64 * 64];
        for y in 0..64 {
            for x in 0..64 {
                indices[y * 64 + x] = if x < 32 {
                    0
                } else if y < 32 {
                    1
                } else {
                    2
                };
            }
        }
        indices[5 * 64 + 5] = 3;

        let mut bytes = Vec::new();
        {
            let mut encoder = Encoder::new(&mut bytes, 64, 64, &palette).unwrap();
            let frame = Frame {
                width: 64,
                height: 64,
                delay: 7,
                transparent: Some(3),
                buffer: Cow::Owned(indices),
                ..Frame::default()
            };
            encoder.write_frame(&frame).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    fn read_rgba(path: &Path) -> (u32, u32, Vec<(u16, Vec<u8>)>) {
        let mut options = DecodeOptions::new();
        options.set_color_output(ColorOutput::RGBA);
        let mut decoder = options.read_info(File::open(path).unwrap()).unwrap();
        let (w, h) = (decoder.width() as u32, decoder.height() as u32);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            frames.push((frame.delay, frame.buffer.to_vec()));
        }
        (w, h, frames)
    }

    fn pixel(buffer: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [buffer[i], buffer[i + 1], buffer[i + 2], buffer[i + 3]]
    }

    fn opaque(rgb: [u8; 3]) -> [u8; 4] {
        [rgb[0], rgb[1], rgb[2], 255]
    }

    #[test]
    fn test_grid_uses_ceiling_division() {
        let grid = TileGrid::new(64, 64, 200, 200);
        assert_eq!((grid.tiles_x, grid.tiles_y), (4, 4));
        assert_eq!(grid.tile_count(), 16);
        assert_eq!(grid.origin(3, 1), (192, 64));
    }

    #[test]
    fn test_transparency_matches_key_color() {
        // entries 1 and 3 share the key color
        let palette: Vec<u8> = [RED, KEY, BLUE, KEY].concat();
        let rgba = resolve_transparency(&[0, 1, 2, 3, 9], &palette, Some(3));
        assert_eq!(&rgba[0..4], &[255, 0, 0, 255]);
        assert_eq!(rgba[7], 0);
        assert_eq!(rgba[11], 255);
        assert_eq!(rgba[15], 0);
        assert_eq!(&rgba[16..20], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_tiles_alternate_mirror_and_flip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sparkle.gif");
        let output = dir.path().join("out").join("sparkle_tiled_200x200.gif");
        write_fixture(&source);

        let canvas = Dimensions::new(200, 200).unwrap();
        let outcome = TextureTiler::new().tile_gif(&source, &output, canvas).unwrap();
        assert_eq!(outcome, TilingOutcome::Generated { frames: 1 });

        let (w, h, frames) = read_rgba(&output);
        assert_eq!((w, h), (200, 200));
        assert_eq!(frames.len(), 1);
        let (delay, buffer) = &frames[0];
        assert_eq!(*delay, 7);

        // tile (0, 0) is the original
        assert_eq!(pixel(buffer, w, 10, 10), opaque(RED));
        assert_eq!(pixel(buffer, w, 40, 10), opaque(GREEN));
        assert_eq!(pixel(buffer, w, 5, 5)[3], 0);

        // tile (1, 0) is mirrored: local x maps to 63 - x
        assert_eq!(pixel(buffer, w, 64, 10), opaque(GREEN));
        assert_eq!(pixel(buffer, w, 64 + 40, 10), opaque(RED));
        assert_eq!(pixel(buffer, w, 64 + 58, 5)[3], 0);

        // tile (0, 1) is flipped: local y maps to 63 - y
        assert_eq!(pixel(buffer, w, 40, 64), opaque(BLUE));
        assert_eq!(pixel(buffer, w, 40, 64 + 40), opaque(GREEN));

        // last column is clipped at the canvas edge
        assert_eq!(pixel(buffer, w, 199, 10), opaque(GREEN));
    }

    #[test]
    fn test_existing_output_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sparkle.gif");
        let output = dir.path().join("sparkle_tiled_128x128.gif");
        write_fixture(&source);
        let canvas = Dimensions::new(128, 128).unwrap();

        let tiler = TextureTiler::new();
        tiler.tile_gif(&source, &output, canvas).unwrap();
        let before = fs::read(&output).unwrap();
        let modified = fs::metadata(&output).unwrap().modified().unwrap();

        assert_eq!(
            tiler.tile_gif(&source, &output, canvas).unwrap(),
            TilingOutcome::AlreadyExists
        );
        assert_eq!(fs::read(&output).unwrap(), before);
        assert_eq!(fs::metadata(&output).unwrap().modified().unwrap(), modified);
    }

    #[test]
    fn test_missing_source_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("none_tiled_64x64.gif");
        let err = TextureTiler::new()
            .tile_gif(&dir.path().join("none.gif"), &output, Dimensions::new(64, 64).unwrap())
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
        assert!(!partial_path(&output).exists());
    }

    #[test]
    fn test_texture_name() {
        let canvas = Dimensions::new(1080, 1920).unwrap();
        let name = tiled_texture_name(Path::new("/fx/sparkle.gif"), canvas);
        let key = name
            .strip_prefix("sparkle_")
            .and_then(|rest| rest.strip_suffix("_tiled_1080x1920.gif"))
            .unwrap();
        assert_eq!(key.len(), SOURCE_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, tiled_texture_name(Path::new("/fx/sparkle.gif"), canvas));
    }

    #[test]
    fn test_same_stem_in_other_directory_gets_own_texture() {
        let dir = tempfile::tempdir().unwrap();
        let canvas = Dimensions::new(64, 64).unwrap();
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        write_fixture(&a.join("star.gif"));
        write_fixture(&b.join("star.gif"));

        let first = tiled_texture_name(&a.join("star.gif"), canvas);
        let second = tiled_texture_name(&b.join("star.gif"), canvas);
        assert_ne!(first, second);
        assert!(first.starts_with("star_") && second.starts_with("star_"));

        let tiler = TextureTiler::new();
        let out = dir.path().join("generated");
        for (source, name) in [(a.join("star.gif"), &first), (b.join("star.gif"), &second)] {
            let outcome = tiler.tile_gif(&source, &out.join(name), canvas).unwrap();
            assert_eq!(outcome, TilingOutcome::Generated { frames: 1 });
        }
    }
}
