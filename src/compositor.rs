//! Rendering back-ends that turn a layout plan into an artifact.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CompositorKind;
use crate::error::{CollageError, Result};
use crate::layout::LayoutPlan;
use crate::models::{Artifact, ImageRef, OutputFormat};

#[async_trait]
pub trait Compositor: Send + Sync {
  /// Produces the artifact for `plan`. `None` means the task is layout-only.
  async fn render(
    &self,
    task_id: Uuid,
    plan: &LayoutPlan,
    images: &[ImageRef],
    format: OutputFormat,
  ) -> Result<Option<Artifact>>;

  /// Removes an artifact whose task was cancelled before it could commit.
  async fn discard(&self, _artifact: &Artifact) -> Result<()> {
    Ok(())
  }
}

pub fn build_compositor(kind: CompositorKind, output_dir: impl Into<PathBuf>) -> Arc<dyn Compositor> {
  match kind {
    CompositorKind::Image => Arc::new(ImageCompositor::new(output_dir)),
    CompositorKind::Manifest => Arc::new(ManifestCompositor::new(output_dir)),
    CompositorKind::DryRun => Arc::new(DryRunCompositor),
  }
}

fn artifact_name(task_id: Uuid, extension: &str) -> String {
  format!("collage_{}_{}.{}", task_id, Utc::now().format("%Y%m%d%H%M%S"), extension)
}

async fn write_artifact(dir: &Path, name: String, bytes: Vec<u8>) -> Result<PathBuf> {
  tokio::fs::create_dir_all(dir)
    .await
    .map_err(|e| CollageError::Render(format!("cannot create {}: {e}", dir.display())))?;
  let path = dir.join(name);
  tokio::fs::write(&path, bytes)
    .await
    .map_err(|e| CollageError::Render(format!("cannot write {}: {e}", path.display())))?;
  Ok(path)
}

async fn remove_artifact(artifact: &Artifact) -> Result<()> {
  match tokio::fs::remove_file(&artifact.path).await {
    Ok(()) => {
      debug!("Discarded artifact {}", artifact.path.display());
      Ok(())
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(CollageError::Internal(format!("cannot remove {}: {e}", artifact.path.display()))),
  }
}

/// Composites the referenced image files onto a single canvas.
pub struct ImageCompositor {
  output_dir: PathBuf,
}

impl ImageCompositor {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self { output_dir: output_dir.into() }
  }
}

#[async_trait]
impl Compositor for ImageCompositor {
  async fn render(
    &self,
    task_id: Uuid,
    plan: &LayoutPlan,
    images: &[ImageRef],
    format: OutputFormat,
  ) -> Result<Option<Artifact>> {
    let plan = plan.clone();
    let images = images.to_vec();
    let encoded = tokio::task::spawn_blocking(move || composite(&plan, &images, format))
      .await
      .map_err(|e| CollageError::Internal(format!("render task aborted: {e}")))??;

    let bytes = encoded.bytes.len() as u64;
    let path = write_artifact(&self.output_dir, artifact_name(task_id, format.extension()), encoded.bytes).await?;
    info!("Task {} collage written to {} ({} bytes)", task_id, path.display(), bytes);
    Ok(Some(Artifact {
      path,
      media_type: format.media_type().to_string(),
      width: encoded.width,
      height: encoded.height,
      bytes,
    }))
  }

  async fn discard(&self, artifact: &Artifact) -> Result<()> {
    remove_artifact(artifact).await
  }
}

struct Encoded {
  bytes: Vec<u8>,
  width: u32,
  height: u32,
}

fn composite(plan: &LayoutPlan, images: &[ImageRef], format: OutputFormat) -> Result<Encoded> {
  let background = parse_hex(&plan.background_color)?;
  let mut canvas = RgbaImage::from_pixel(plan.canvas.width, plan.canvas.height, background);

  for placement in &plan.placements {
    let source = images
      .iter()
      .find(|image| image.image_id == placement.image_id)
      .ok_or_else(|| CollageError::Render(format!("placement references unknown image '{}'", placement.image_id)))?;
    let path = source
      .path
      .as_ref()
      .ok_or_else(|| CollageError::Render(format!("image '{}' has no source file", source.image_id)))?;
    let decoded = image::open(path)
      .map_err(|e| CollageError::Render(format!("cannot decode {}: {e}", path.display())))?;
    let rect = placement.rect;
    let fitted = decoded.resize_to_fill(rect.width, rect.height, FilterType::Lanczos3);
    imageops::overlay(&mut canvas, &fitted.to_rgba8(), rect.x as i64, rect.y as i64);
  }

  let (width, height) = canvas.dimensions();
  let image = match format {
    OutputFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
    OutputFormat::Png | OutputFormat::Webp => DynamicImage::ImageRgba8(canvas),
  };
  let target = match format {
    OutputFormat::Jpeg => ImageFormat::Jpeg,
    OutputFormat::Png => ImageFormat::Png,
    OutputFormat::Webp => ImageFormat::WebP,
  };
  let mut cursor = Cursor::new(Vec::new());
  image
    .write_to(&mut cursor, target)
    .map_err(|e| CollageError::Render(format!("cannot encode {}: {e}", format.extension())))?;
  Ok(Encoded { bytes: cursor.into_inner(), width, height })
}

fn parse_hex(color: &str) -> Result<Rgba<u8>> {
  let hex = color.strip_prefix('#').unwrap_or(color);
  let channel = |range: std::ops::Range<usize>| {
    hex
      .get(range)
      .and_then(|digits| u8::from_str_radix(digits, 16).ok())
      .ok_or_else(|| CollageError::validation(format!("background color '{color}' is not of the form #RRGGBB")))
  };
  if hex.len() != 6 {
    return Err(CollageError::validation(format!("background color '{color}' is not of the form #RRGGBB")));
  }
  Ok(Rgba([channel(0..2)?, channel(2..4)?, channel(4..6)?, 255]))
}

/// Writes the placement plan as JSON instead of pixels.
pub struct ManifestCompositor {
  output_dir: PathBuf,
}

impl ManifestCompositor {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self { output_dir: output_dir.into() }
  }
}

#[async_trait]
impl Compositor for ManifestCompositor {
  async fn render(
    &self,
    task_id: Uuid,
    plan: &LayoutPlan,
    _images: &[ImageRef],
    _format: OutputFormat,
  ) -> Result<Option<Artifact>> {
    let bytes = serde_json::to_vec_pretty(plan).map_err(|e| CollageError::Internal(format!("plan serialization: {e}")))?;
    let size = bytes.len() as u64;
    let path = write_artifact(&self.output_dir, artifact_name(task_id, "json"), bytes).await?;
    Ok(Some(Artifact {
      path,
      media_type: "application/json".to_string(),
      width: plan.canvas.width,
      height: plan.canvas.height,
      bytes: size,
    }))
  }

  async fn discard(&self, artifact: &Artifact) -> Result<()> {
    remove_artifact(artifact).await
  }
}

pub struct DryRunCompositor;

#[async_trait]
impl Compositor for DryRunCompositor {
  async fn render(&self, task_id: Uuid, plan: &LayoutPlan, _: &[ImageRef], _: OutputFormat) -> Result<Option<Artifact>> {
    if plan.placements.is_empty() {
      warn!("Task {} produced an empty plan", task_id);
    }
    Ok(None)
  }
}
