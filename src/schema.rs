use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{de::Error as DeError, Deserialize, Deserializer};

use crate::errors::{RenderError, RenderResult};

/// YAML description of one scroll-video render.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderManifest {
    pub canvas: Canvas,
    pub fps: u32,
    pub scroll: Scroll,
    #[serde(default)]
    pub margins: Margins,
    #[serde(default)]
    pub background: Background,
    #[serde(default)]
    pub audio: Option<PathBuf>,
    #[serde(default = "default_codec")]
    pub codec: String,
    /// Pre-rendered tall bitmap to scroll. Producing it (layout, line
    /// wrapping) is someone else's job.
    pub source_image: PathBuf,
}

fn default_codec() -> String {
    crate::capability::HW_CODEC.to_owned()
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scroll {
    /// Requested scroll speed in pixels per frame. May be fractional; the
    /// timeline rounds it to a whole pixel.
    pub px_per_frame: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Margins {
    /// Height of the band painted over scrolling content at the canvas top.
    #[serde(default)]
    pub top: u32,
    #[serde(default)]
    pub bottom: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Background {
    #[serde(default)]
    pub color: Color,
    /// Remote URL or local path. Failure to materialize it degrades to the
    /// solid color, never to a failed render.
    #[serde(default)]
    pub image: Option<String>,
}

impl Default for Background {
    fn default() -> Self {
        Self {
            color: Color::default(),
            image: None,
        }
    }
}

/// RGB[A] color parsed from `#rgb`, `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 4]);

impl Default for Color {
    fn default() -> Self {
        Self([0, 0, 0, 255])
    }
}

impl Color {
    pub fn parse(raw: &str) -> Result<Self> {
        let hex = raw.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            bail!("color '{raw}' contains non-hex characters");
        }
        let channels = match hex.len() {
            3 => hex
                .chars()
                .map(|c| {
                    u8::from_str_radix(&format!("{c}{c}"), 16)
                        .with_context(|| format!("invalid hex digit in color '{raw}'"))
                })
                .collect::<Result<Vec<_>>>()?,
            6 | 8 => (0..hex.len())
                .step_by(2)
                .map(|i| {
                    u8::from_str_radix(&hex[i..i + 2], 16)
                        .with_context(|| format!("invalid hex digit in color '{raw}'"))
                })
                .collect::<Result<Vec<_>>>()?,
            other => bail!("color '{raw}' must have 3, 6 or 8 hex digits, got {other}"),
        };

        let mut rgba = [0u8, 0, 0, 255];
        rgba[..channels.len().min(4)].copy_from_slice(&channels[..channels.len().min(4)]);
        Ok(Self(rgba))
    }

    /// `#rrggbb` form used in lavfi color sources; alpha is not carried into
    /// the opaque compositing pipeline.
    pub fn to_rgb_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rgb_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(DeError::custom)
    }
}

impl RenderManifest {
    pub fn validate(&self) -> Result<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            bail!(
                "canvas must be positive, got {}x{}",
                self.canvas.width,
                self.canvas.height
            );
        }
        if self.canvas.width % 2 != 0 || self.canvas.height % 2 != 0 {
            // yuv420p output subsamples chroma 2x2.
            bail!(
                "canvas dimensions must be even for yuv420p output, got {}x{}",
                self.canvas.width,
                self.canvas.height
            );
        }
        if self.fps == 0 {
            bail!("fps must be > 0");
        }
        if !self.scroll.px_per_frame.is_finite() || self.scroll.px_per_frame <= 0.0 {
            bail!(
                "scroll.px_per_frame must be a positive number, got {}",
                self.scroll.px_per_frame
            );
        }
        if self.margins.top >= self.canvas.height {
            bail!(
                "margins.top ({}) must be smaller than the canvas height ({})",
                self.margins.top,
                self.canvas.height
            );
        }
        if self.margins.bottom >= self.canvas.height {
            bail!(
                "margins.bottom ({}) must be smaller than the canvas height ({})",
                self.margins.bottom,
                self.canvas.height
            );
        }
        if self.codec.trim().is_empty() {
            bail!("codec cannot be empty");
        }
        if self.source_image.as_os_str().is_empty() {
            bail!("source_image path cannot be empty");
        }
        Ok(())
    }
}

/// Decode and validate a render manifest from disk.
pub fn load_and_validate_manifest(path: &Path) -> Result<RenderManifest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let manifest: RenderManifest = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to decode manifest {}", path.display()))?;
    manifest.validate()?;
    Ok(manifest)
}

/// A validated render request with the source bitmap loaded. Immutable once
/// constructed; everything downstream is derived from it.
#[derive(Debug)]
pub struct RenderRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub px_per_frame: f64,
    pub top_margin: u32,
    pub bottom_margin: u32,
    pub background_color: Color,
    pub background_image: Option<String>,
    pub audio: Option<PathBuf>,
    pub codec: String,
    pub source: image::DynamicImage,
}

impl RenderRequest {
    /// Load the source bitmap named by the manifest, resolving relative paths
    /// against `base_dir`.
    pub fn from_manifest(manifest: &RenderManifest, base_dir: &Path) -> RenderResult<Self> {
        manifest.validate().map_err(RenderError::Other)?;

        let source_path = if manifest.source_image.is_absolute() {
            manifest.source_image.clone()
        } else {
            base_dir.join(&manifest.source_image)
        };
        let source = image::open(&source_path).map_err(|error| {
            RenderError::validation(format!(
                "failed to decode source image {}: {error}",
                source_path.display()
            ))
        })?;

        Ok(Self {
            width: manifest.canvas.width,
            height: manifest.canvas.height,
            fps: manifest.fps,
            px_per_frame: manifest.scroll.px_per_frame,
            top_margin: manifest.margins.top,
            bottom_margin: manifest.margins.bottom,
            background_color: manifest.background.color,
            background_image: manifest.background.image.clone(),
            audio: manifest.audio.clone(),
            codec: manifest.codec.clone(),
            source,
        })
    }

    pub fn image_height(&self) -> u32 {
        self.source.height()
    }
}
