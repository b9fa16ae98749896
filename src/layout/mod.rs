//! Placement computation for collage layouts.
//!
//! Pure and deterministic: the same images, spec and seed always yield the
//! same plan. No I/O happens here; the compositor consumes the plan.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CollageError, Result};

pub mod circular;
pub mod freeform;
pub mod grid;
pub mod mosaic;
pub mod stacked;

pub const MAX_IMAGES: usize = 20;
pub const MAX_CANVAS_SIDE: u32 = 4096;
pub const MAX_SPACING: u32 = 100;

static HEX_COLOR: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex color pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutAlgorithm {
  Grid,
  Stacked,
  Circular,
  Freeform,
  Mosaic,
}

impl LayoutAlgorithm {
  pub const ALL: [LayoutAlgorithm; 5] = [
    LayoutAlgorithm::Grid,
    LayoutAlgorithm::Stacked,
    LayoutAlgorithm::Circular,
    LayoutAlgorithm::Freeform,
    LayoutAlgorithm::Mosaic,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      LayoutAlgorithm::Grid => "grid",
      LayoutAlgorithm::Stacked => "stacked",
      LayoutAlgorithm::Circular => "circular",
      LayoutAlgorithm::Freeform => "freeform",
      LayoutAlgorithm::Mosaic => "mosaic",
    }
  }
}

impl fmt::Display for LayoutAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for LayoutAlgorithm {
  type Err = CollageError;

  fn from_str(s: &str) -> Result<Self> {
    let wanted = s.trim().to_ascii_lowercase();
    LayoutAlgorithm::ALL
      .into_iter()
      .find(|algorithm| algorithm.as_str() == wanted)
      .ok_or_else(|| CollageError::validation(format!("unknown layout algorithm '{}'", s.trim())))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
  pub width: u32,
  pub height: u32,
}

impl Size {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl Rect {
  pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
    Self { x, y, width, height }
  }

  pub fn right(&self) -> u64 {
    self.x as u64 + self.width as u64
  }

  pub fn bottom(&self) -> u64 {
    self.y as u64 + self.height as u64
  }

  /// Area shared with `other`; zero when the rectangles only touch.
  pub fn overlap_area(&self, other: &Rect) -> u64 {
    let left = self.x.max(other.x) as u64;
    let top = self.y.max(other.y) as u64;
    let right = self.right().min(other.right());
    let bottom = self.bottom().min(other.bottom());
    if right <= left || bottom <= top {
      return 0;
    }
    (right - left) * (bottom - top)
  }

  pub fn intersects(&self, other: &Rect) -> bool {
    self.overlap_area(other) > 0
  }

  pub fn within(&self, canvas: Size) -> bool {
    self.right() <= canvas.width as u64 && self.bottom() <= canvas.height as u64
  }
}

/// Layout input: an image id with its intrinsic dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDims {
  pub image_id: String,
  pub width: u32,
  pub height: u32,
}

impl ImageDims {
  pub fn new(image_id: impl Into<String>, width: u32, height: u32) -> Self {
    Self { image_id: image_id.into(), width, height }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
  pub image_id: String,
  #[serde(flatten)]
  pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutPlan {
  pub algorithm: LayoutAlgorithm,
  pub canvas: Size,
  pub spacing: u32,
  pub background_color: String,
  pub placements: Vec<Placement>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub seed: Option<u64>,
}

/// Size bounds for the freeform sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeformBounds {
  pub min_size: u32,
  pub max_size: u32,
  pub max_attempts: u32,
}

impl Default for FreeformBounds {
  fn default() -> Self {
    Self { min_size: 100, max_size: 300, max_attempts: 50 }
  }
}

/// Engine tuning shared by every task a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
  pub freeform: FreeformBounds,
  pub mosaic_tile_divisor: u32,
}

impl Default for LayoutOptions {
  fn default() -> Self {
    Self { freeform: FreeformBounds::default(), mosaic_tile_divisor: 10 }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSpec {
  pub algorithm: LayoutAlgorithm,
  /// `None` derives the canvas from the images.
  pub canvas: Option<Size>,
  pub spacing: u32,
  pub background_color: String,
  pub seed: u64,
  pub options: LayoutOptions,
}

/// Structural checks shared by task creation and execution.
pub fn validate_inputs(images: &[ImageDims], canvas: Option<Size>, spacing: u32, background_color: &str) -> Result<()> {
  if images.is_empty() {
    return Err(CollageError::validation("at least one image is required"));
  }
  if images.len() > MAX_IMAGES {
    return Err(CollageError::validation(format!(
      "too many images: {} (maximum {MAX_IMAGES})",
      images.len()
    )));
  }
  for (index, image) in images.iter().enumerate() {
    if image.image_id.trim().is_empty() {
      return Err(CollageError::validation(format!("image at index {index} has an empty id")));
    }
    if image.width == 0 || image.height == 0 {
      return Err(CollageError::validation(format!(
        "image '{}' has non-positive dimensions {}x{}",
        image.image_id, image.width, image.height
      )));
    }
  }
  if let Some(size) = canvas {
    if size.width == 0 || size.height == 0 {
      return Err(CollageError::validation("canvas dimensions must be positive"));
    }
    if size.width > MAX_CANVAS_SIDE || size.height > MAX_CANVAS_SIDE {
      return Err(CollageError::validation(format!(
        "canvas {}x{} exceeds {MAX_CANVAS_SIDE} pixels per side",
        size.width, size.height
      )));
    }
  }
  if spacing > MAX_SPACING {
    return Err(CollageError::validation(format!("spacing {spacing} exceeds {MAX_SPACING}")));
  }
  if !HEX_COLOR.is_match(background_color) {
    return Err(CollageError::validation(format!(
      "background color '{background_color}' is not of the form #RRGGBB"
    )));
  }
  Ok(())
}

/// Rejects inputs that pass the structural checks but leave the chosen
/// algorithm no room to place every image. Circular and freeform always fit.
pub fn check_feasible(
  images: &[ImageDims],
  canvas: Option<Size>,
  spacing: u32,
  algorithm: LayoutAlgorithm,
  options: &LayoutOptions,
) -> Result<()> {
  let canvas = canvas.unwrap_or_else(|| auto_canvas(images, algorithm, spacing));
  match algorithm {
    LayoutAlgorithm::Grid => grid::place(images, canvas, spacing).map(drop),
    LayoutAlgorithm::Stacked => stacked::place(images, canvas, spacing).map(drop),
    LayoutAlgorithm::Mosaic => mosaic::place(images, canvas, options.mosaic_tile_divisor).map(drop),
    LayoutAlgorithm::Circular | LayoutAlgorithm::Freeform => Ok(()),
  }
}

pub fn compute(images: &[ImageDims], spec: &LayoutSpec) -> Result<LayoutPlan> {
  validate_inputs(images, spec.canvas, spec.spacing, &spec.background_color)?;
  let canvas = spec
    .canvas
    .unwrap_or_else(|| auto_canvas(images, spec.algorithm, spec.spacing));

  let rects = match spec.algorithm {
    LayoutAlgorithm::Grid => grid::place(images, canvas, spec.spacing)?,
    LayoutAlgorithm::Stacked => stacked::place(images, canvas, spec.spacing)?,
    LayoutAlgorithm::Circular => circular::place(images, canvas),
    LayoutAlgorithm::Freeform => freeform::place(images, canvas, &spec.options.freeform, spec.seed),
    LayoutAlgorithm::Mosaic => mosaic::place(images, canvas, spec.options.mosaic_tile_divisor)?,
  };

  let placements = images
    .iter()
    .zip(rects)
    .map(|(image, rect)| Placement { image_id: image.image_id.clone(), rect })
    .collect();

  Ok(LayoutPlan {
    algorithm: spec.algorithm,
    canvas,
    spacing: spec.spacing,
    background_color: spec.background_color.clone(),
    placements,
    seed: (spec.algorithm == LayoutAlgorithm::Freeform).then_some(spec.seed),
  })
}

/// Canvas used when the request leaves the size to the engine.
pub fn auto_canvas(images: &[ImageDims], algorithm: LayoutAlgorithm, spacing: u32) -> Size {
  let n = images.len().max(1) as u64;
  let spacing = spacing as u64;
  let max_w = images.iter().map(|i| i.width as u64).max().unwrap_or(1);
  let max_h = images.iter().map(|i| i.height as u64).max().unwrap_or(1);
  let total_area: u64 = images
    .iter()
    .map(|i| (i.width as u64).saturating_mul(i.height as u64))
    .fold(0, u64::saturating_add);

  let (width, height) = match algorithm {
    LayoutAlgorithm::Grid => {
      let cols = ceil_sqrt(n);
      let rows = n.div_ceil(cols);
      (
        cols.saturating_mul(max_w).saturating_add((cols + 1) * spacing),
        rows.saturating_mul(max_h).saturating_add((rows + 1) * spacing),
      )
    }
    LayoutAlgorithm::Stacked => (
      max_w.saturating_add(2 * spacing),
      n.saturating_mul(max_h).saturating_add((n + 1) * spacing),
    ),
    LayoutAlgorithm::Circular => {
      let side = max_w.max(max_h).saturating_mul(6);
      (side, side)
    }
    LayoutAlgorithm::Freeform => {
      let side = ceil_sqrt(total_area.saturating_mul(2));
      (side, side)
    }
    LayoutAlgorithm::Mosaic => {
      let side = ceil_sqrt(total_area);
      (side, side)
    }
  };

  Size::new(clamp_side(width), clamp_side(height))
}

fn clamp_side(value: u64) -> u32 {
  value.clamp(1, MAX_CANVAS_SIDE as u64) as u32
}

pub(crate) fn ceil_sqrt(n: u64) -> u64 {
  let mut root = (n as f64).sqrt().ceil() as u64;
  while root.saturating_mul(root) < n {
    root += 1;
  }
  while root > 1 && (root - 1) * (root - 1) >= n {
    root -= 1;
  }
  root.max(1)
}

/// Largest size with the image's aspect ratio that fits `max_w` x `max_h`.
pub(crate) fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
  let (w, h) = (width.max(1) as u64, height.max(1) as u64);
  let (mw, mh) = (max_w.max(1) as u64, max_h.max(1) as u64);
  if w * mh <= h * mw {
    let fitted = (w * mh / h).clamp(1, mw);
    (fitted as u32, mh as u32)
  } else {
    let fitted = (h * mw / w).clamp(1, mh);
    (mw as u32, fitted as u32)
  }
}
