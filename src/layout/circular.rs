use std::f64::consts::PI;

use super::{ImageDims, Rect, Size, fit_within};

/// Fraction of the shorter canvas side used as the ring radius.
const RING_RADIUS_FRACTION: f64 = 1.0 / 3.0;
/// Fraction of each canvas dimension given to one image's box.
const ITEM_FRACTION: f64 = 1.0 / 6.0;

/// Images evenly spaced on a ring around the canvas center, starting at angle
/// zero and advancing in input order. Boxes may overlap when `n` is large.
pub fn place(images: &[ImageDims], canvas: Size) -> Vec<Rect> {
  let n = images.len() as f64;
  let center_x = canvas.width as f64 / 2.0;
  let center_y = canvas.height as f64 / 2.0;
  let radius = canvas.width.min(canvas.height) as f64 * RING_RADIUS_FRACTION;
  let box_w = ((canvas.width as f64 * ITEM_FRACTION) as u32).max(1);
  let box_h = ((canvas.height as f64 * ITEM_FRACTION) as u32).max(1);

  images
    .iter()
    .enumerate()
    .map(|(index, image)| {
      let angle = 2.0 * PI * index as f64 / n;
      let (width, height) = fit_within(image.width, image.height, box_w, box_h);
      let x = center_x + radius * angle.cos() - width as f64 / 2.0;
      let y = center_y + radius * angle.sin() - height as f64 / 2.0;
      Rect::new(
        clamp_origin(x, width, canvas.width),
        clamp_origin(y, height, canvas.height),
        width,
        height,
      )
    })
    .collect()
}

fn clamp_origin(origin: f64, extent: u32, limit: u32) -> u32 {
  let max = limit.saturating_sub(extent) as f64;
  origin.round().clamp(0.0, max) as u32
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::layout::tests::{mixed, squares};

  fn center(rect: &Rect) -> (f64, f64) {
    (
      rect.x as f64 + rect.width as f64 / 2.0,
      rect.y as f64 + rect.height as f64 / 2.0,
    )
  }

  #[test]
  fn centers_are_equidistant_from_canvas_center() {
    for n in 1..=20 {
      let canvas = Size::new(1200, 900);
      let rects = place(&mixed(n), canvas);
      let expected = 900.0 / 3.0;
      for rect in &rects {
        assert!(rect.within(canvas));
        let (cx, cy) = center(rect);
        let distance = ((cx - 600.0).powi(2) + (cy - 450.0).powi(2)).sqrt();
        assert!((distance - expected).abs() <= 1.5, "n={n} distance={distance}");
      }
    }
  }

  #[test]
  fn first_image_sits_at_angle_zero() {
    let rects = place(&squares(4, 100), Size::new(600, 600));
    assert_eq!(rects[0], Rect::new(450, 250, 100, 100));
    assert_eq!(rects[1], Rect::new(250, 450, 100, 100));
  }

  #[test]
  fn tiny_canvas_still_places_everything() {
    let rects = place(&squares(8, 50), Size::new(3, 3));
    assert_eq!(rects.len(), 8);
    assert!(rects.iter().all(|r| r.within(Size::new(3, 3))));
  }
}
