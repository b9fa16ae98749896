use super::{ImageDims, Rect, Size};
use crate::error::{CollageError, Result};

/// Single column of equal-height rows spanning the canvas width.
pub fn place(images: &[ImageDims], canvas: Size, spacing: u32) -> Result<Vec<Rect>> {
  let n = images.len() as u64;
  let width = (canvas.width as u64).saturating_sub(2 * spacing as u64);
  let row_height = (canvas.height as u64).saturating_sub((n + 1) * spacing as u64) / n;
  if width == 0 || row_height == 0 {
    return Err(CollageError::validation(format!(
      "canvas {}x{} leaves no room to stack {n} images with spacing {spacing}",
      canvas.width, canvas.height
    )));
  }
  let (width, row_height) = (width as u32, row_height as u32);

  Ok(
    (0..images.len() as u32)
      .map(|index| Rect::new(spacing, spacing + index * (row_height + spacing), width, row_height))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::layout::tests::{assert_disjoint_and_inside, squares};

  #[test]
  fn three_images_fill_a_tall_canvas() {
    let rects = place(&squares(3, 64), Size::new(300, 900), 0).unwrap();
    assert_eq!(
      rects,
      vec![
        Rect::new(0, 0, 300, 300),
        Rect::new(0, 300, 300, 300),
        Rect::new(0, 600, 300, 300),
      ]
    );
  }

  #[test]
  fn spacing_insets_rows() {
    let rects = place(&squares(2, 64), Size::new(120, 230), 10).unwrap();
    assert_eq!(rects, vec![Rect::new(10, 10, 100, 100), Rect::new(10, 120, 100, 100)]);
    assert_disjoint_and_inside(&rects, Size::new(120, 230));
  }

  #[test]
  fn rejects_too_many_rows() {
    assert!(place(&squares(20, 10), Size::new(100, 19), 0).is_err());
  }
}
