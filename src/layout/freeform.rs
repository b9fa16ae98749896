use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FreeformBounds, ImageDims, Rect, Size, fit_within};

/// Randomized scatter with overlap avoidance.
///
/// Each image gets a box side drawn from `bounds` (capped by the canvas) and
/// up to `max_attempts` candidate positions. The first overlap-free candidate
/// wins; otherwise the candidate with the least overlapping area is kept.
/// All randomness comes from `seed`.
pub fn place(images: &[ImageDims], canvas: Size, bounds: &FreeformBounds, seed: u64) -> Vec<Rect> {
  let mut rng = StdRng::seed_from_u64(seed);
  let max_side = bounds.max_size.min(canvas.width.min(canvas.height)).max(1);
  let min_side = bounds.min_size.clamp(1, max_side);
  let attempts = bounds.max_attempts.max(1);

  let mut placed: Vec<Rect> = Vec::with_capacity(images.len());
  for image in images {
    let side = rng.random_range(min_side..=max_side);
    let (width, height) = fit_within(image.width, image.height, side, side);

    let mut best = sample(&mut rng, canvas, width, height);
    let mut best_overlap = total_overlap(&placed, &best);
    let mut tries = 1;
    while best_overlap > 0 && tries < attempts {
      let candidate = sample(&mut rng, canvas, width, height);
      let overlap = total_overlap(&placed, &candidate);
      if overlap < best_overlap {
        best = candidate;
        best_overlap = overlap;
      }
      tries += 1;
    }
    placed.push(best);
  }
  placed
}

fn sample(rng: &mut StdRng, canvas: Size, width: u32, height: u32) -> Rect {
  let x = rng.random_range(0..=canvas.width - width);
  let y = rng.random_range(0..=canvas.height - height);
  Rect::new(x, y, width, height)
}

fn total_overlap(placed: &[Rect], candidate: &Rect) -> u64 {
  placed.iter().map(|rect| rect.overlap_area(candidate)).sum()
}
