use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use tracing::{info, warn};
use url::Url;

use crate::schema::Color;

const DOWNLOAD_ATTEMPTS: u32 = 3;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_PAUSE: Duration = Duration::from_secs(1);
// Some hosts refuse requests without a browser user agent.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Background for the composite: a solid color, or an image on local disk.
/// A materialized remote image is a temporary artifact owned by the render
/// invocation and must be deleted when the invocation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundAsset {
    SolidColor(Color),
    LocalImage { path: PathBuf, temporary: bool },
}

impl BackgroundAsset {
    /// Decide solid-color vs image background. Background acquisition is
    /// always optional: any failure degrades to the solid color and is never
    /// surfaced as an error.
    pub fn resolve(
        color: Color,
        reference: Option<&str>,
        canvas_width: u32,
        canvas_height: u32,
        output_path: &Path,
    ) -> Self {
        let Some(reference) = reference else {
            return Self::SolidColor(color);
        };

        if is_remote(reference) {
            let save_path = background_save_path(output_path);
            match fetch_and_normalize(reference, canvas_width, canvas_height, &save_path) {
                Ok(path) => {
                    info!("background image materialized at {}", path.display());
                    return Self::LocalImage {
                        path,
                        temporary: true,
                    };
                }
                Err(error) => {
                    warn!("background image unavailable ({error:#}), falling back to solid color");
                    return Self::SolidColor(color);
                }
            }
        }

        let path = PathBuf::from(reference);
        if path.exists() {
            Self::LocalImage {
                path,
                temporary: false,
            }
        } else {
            warn!(
                "background image path {} does not exist, falling back to solid color",
                path.display()
            );
            Self::SolidColor(color)
        }
    }

    pub fn image_path(&self) -> Option<&Path> {
        match self {
            Self::SolidColor(_) => None,
            Self::LocalImage { path, .. } => Some(path),
        }
    }

    /// Path to delete when the render invocation ends, if any.
    pub fn temp_path(&self) -> Option<&Path> {
        match self {
            Self::LocalImage {
                path,
                temporary: true,
            } => Some(path),
            _ => None,
        }
    }
}

fn is_remote(reference: &str) -> bool {
    Url::parse(reference)
        .map(|url| matches!(url.scheme(), "http" | "https" | "ftp"))
        .unwrap_or(false)
}

fn background_save_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "render".to_owned());
    output_path.with_file_name(format!("{stem}_background.png"))
}

/// Image Asset Service: fetch a remote image, normalize it to the canvas and
/// save it as PNG at `save_path`. Retries transient failures a bounded number
/// of times.
pub fn fetch_and_normalize(
    image_url: &str,
    canvas_width: u32,
    canvas_height: u32,
    save_path: &Path,
) -> Result<PathBuf> {
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to construct http client")?;

    let mut last_error = None;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        info!("downloading background image {image_url} (attempt {attempt}/{DOWNLOAD_ATTEMPTS})");
        match download_once(&client, image_url) {
            Ok(decoded) => {
                let normalized = normalize_to_canvas(&decoded, canvas_width, canvas_height);
                if let Some(parent) = save_path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create directory {}", parent.display())
                    })?;
                }
                normalized
                    .save(save_path)
                    .with_context(|| format!("failed to write {}", save_path.display()))?;
                return Ok(save_path.to_path_buf());
            }
            Err(error) => {
                warn!("background download attempt {attempt} failed: {error:#}");
                last_error = Some(error);
                if attempt < DOWNLOAD_ATTEMPTS {
                    thread::sleep(RETRY_PAUSE);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("download failed")))
}

fn download_once(client: &reqwest::blocking::Client, image_url: &str) -> Result<DynamicImage> {
    let response = client
        .get(image_url)
        .send()
        .with_context(|| format!("request to {image_url} failed"))?
        .error_for_status()
        .with_context(|| format!("{image_url} returned an error status"))?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    if !content_type.is_empty() && !content_type.starts_with("image/") {
        // Keep going: some servers mislabel images. Decoding is the arbiter.
        warn!("background response has content-type '{content_type}'");
    }

    let bytes = response
        .bytes()
        .with_context(|| format!("failed to read body from {image_url}"))?;
    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("{image_url} did not decode as an image"))?;
    if decoded.width() == 0 || decoded.height() == 0 {
        bail!("{image_url} decoded to an empty image");
    }
    Ok(decoded)
}

/// Scale-to-fit preserving aspect ratio when the image exceeds the canvas,
/// center on a canvas-sized board when it ends up smaller, and crop from the
/// top-left when a dimension still overhangs.
pub fn normalize_to_canvas(
    decoded: &DynamicImage,
    canvas_width: u32,
    canvas_height: u32,
) -> DynamicImage {
    let mut working = decoded.to_rgba8();

    if working.width() > canvas_width || working.height() > canvas_height {
        working = DynamicImage::ImageRgba8(working)
            .resize(canvas_width, canvas_height, FilterType::Lanczos3)
            .to_rgba8();
    }

    if working.width() < canvas_width || working.height() < canvas_height {
        let mut board = RgbaImage::from_pixel(canvas_width, canvas_height, image::Rgba([0, 0, 0, 255]));
        let paste_x = i64::from((canvas_width - working.width().min(canvas_width)) / 2);
        let paste_y = i64::from((canvas_height - working.height().min(canvas_height)) / 2);
        image::imageops::overlay(&mut board, &working, paste_x, paste_y);
        working = board;
    }

    if working.width() > canvas_width || working.height() > canvas_height {
        working = image::imageops::crop_imm(
            &working,
            0,
            0,
            canvas_width.min(working.width()),
            canvas_height.min(working.height()),
        )
        .to_image();
    }

    DynamicImage::ImageRgba8(working)
}
