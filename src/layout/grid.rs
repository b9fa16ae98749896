use super::{ImageDims, Rect, Size, ceil_sqrt, fit_within};
use crate::error::{CollageError, Result};

/// Row-major grid of `ceil(sqrt(n))` columns. Every image is scaled to fit its
/// cell with its aspect ratio kept and centered inside the cell.
pub fn place(images: &[ImageDims], canvas: Size, spacing: u32) -> Result<Vec<Rect>> {
  let n = images.len() as u64;
  let cols = ceil_sqrt(n);
  let rows = n.div_ceil(cols);
  let cell_w = cell_extent(canvas.width, cols, spacing, "width")?;
  let cell_h = cell_extent(canvas.height, rows, spacing, "height")?;

  let rects = images
    .iter()
    .enumerate()
    .map(|(index, image)| {
      let col = index as u32 % cols as u32;
      let row = index as u32 / cols as u32;
      let cell_x = spacing + col * (cell_w + spacing);
      let cell_y = spacing + row * (cell_h + spacing);
      let (width, height) = fit_within(image.width, image.height, cell_w, cell_h);
      Rect::new(
        cell_x + (cell_w - width) / 2,
        cell_y + (cell_h - height) / 2,
        width,
        height,
      )
    })
    .collect();
  Ok(rects)
}

fn cell_extent(total: u32, cells: u64, spacing: u32, axis: &str) -> Result<u32> {
  let gaps = (cells + 1) * spacing as u64;
  let available = (total as u64).saturating_sub(gaps);
  let extent = available / cells;
  if extent == 0 {
    return Err(CollageError::validation(format!(
      "canvas {axis} {total} leaves no room for {cells} cells with spacing {spacing}"
    )));
  }
  Ok(extent as u32)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::layout::tests::{assert_disjoint_and_inside, mixed, squares};

  #[test]
  fn four_squares_make_a_two_by_two_grid() {
    let rects = place(&squares(4, 100), Size::new(400, 400), 0).unwrap();
    assert_eq!(
      rects,
      vec![
        Rect::new(0, 0, 200, 200),
        Rect::new(200, 0, 200, 200),
        Rect::new(0, 200, 200, 200),
        Rect::new(200, 200, 200, 200),
      ]
    );
  }

  #[test]
  fn spacing_surrounds_every_cell() {
    let rects = place(&squares(4, 100), Size::new(430, 430), 10).unwrap();
    assert_eq!(rects[0], Rect::new(10, 10, 200, 200));
    assert_eq!(rects[3], Rect::new(220, 220, 200, 200));
  }

  #[test]
  fn wide_images_are_centered_vertically() {
    let images = vec![ImageDims::new("wide", 400, 100)];
    let rects = place(&images, Size::new(200, 200), 0).unwrap();
    assert_eq!(rects[0], Rect::new(0, 75, 200, 50));
  }

  #[test]
  fn five_images_use_three_columns_two_rows() {
    let rects = place(&squares(5, 50), Size::new(300, 200), 0).unwrap();
    assert_eq!(rects[2], Rect::new(200, 0, 100, 100));
    assert_eq!(rects[3], Rect::new(0, 100, 100, 100));
  }

  #[test]
  fn never_overlaps_or_escapes() {
    for n in 1..=20 {
      for &(w, h, spacing) in &[(400, 400, 0), (1024, 768, 10), (333, 901, 7), (4096, 100, 3)] {
        let canvas = Size::new(w, h);
        let rects = place(&mixed(n), canvas, spacing).unwrap();
        assert_eq!(rects.len(), n);
        assert_disjoint_and_inside(&rects, canvas);
      }
    }
  }

  #[test]
  fn rejects_spacing_that_consumes_the_canvas() {
    let err = place(&squares(4, 10), Size::new(30, 400), 10).unwrap_err();
    assert!(matches!(err, CollageError::Validation(_)));
  }
}
