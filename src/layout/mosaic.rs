use super::{ImageDims, Rect, Size};
use crate::error::{CollageError, Result};

const MAX_PASSES: usize = 16;
const SHRINK: f64 = 0.8;

/// Tile-aligned blocks shelf-packed in input order.
///
/// The canvas is cut into square tiles of `min(width, height) / divisor`
/// pixels. Each image asks for an equal share of the tiles, shaped after its
/// aspect ratio. When the shelves overflow the shares shrink and the pack is
/// retried; the last resort is one tile per image. Uncovered tiles stay
/// background.
pub fn place(images: &[ImageDims], canvas: Size, divisor: u32) -> Result<Vec<Rect>> {
  let tile = (canvas.width.min(canvas.height) / divisor.max(1)).max(1);
  let cols = canvas.width / tile;
  let rows = canvas.height / tile;
  let n = images.len();
  if (cols as u64) * (rows as u64) < n as u64 {
    return Err(CollageError::validation(format!(
      "canvas {}x{} has only {} tiles for {n} images",
      canvas.width,
      canvas.height,
      cols as u64 * rows as u64
    )));
  }

  let mut share = (cols as f64 * rows as f64) / n as f64;
  for _ in 0..MAX_PASSES {
    let blocks: Vec<(u32, u32)> = images.iter().map(|image| block_for(image, share, cols, rows)).collect();
    if let Some(cells) = shelf_pack(&blocks, cols, rows) {
      return Ok(to_pixels(&cells, tile));
    }
    share *= SHRINK;
  }

  shelf_pack(&vec![(1, 1); n], cols, rows)
    .map(|cells| to_pixels(&cells, tile))
    .ok_or_else(|| CollageError::Internal(format!("unit tiles failed to pack {n} images into {cols}x{rows}")))
}

fn block_for(image: &ImageDims, share: f64, cols: u32, rows: u32) -> (u32, u32) {
  let aspect = image.width as f64 / image.height as f64;
  let width = (share * aspect).sqrt().round().clamp(1.0, cols as f64) as u32;
  let height = (share / aspect).sqrt().round().clamp(1.0, rows as f64) as u32;
  (width, height)
}

/// Tile coordinates `(col, row, cols, rows)` per block, or `None` when the
/// shelves run past the bottom of the grid.
fn shelf_pack(blocks: &[(u32, u32)], cols: u32, rows: u32) -> Option<Vec<(u32, u32, u32, u32)>> {
  let mut cursor_x = 0;
  let mut cursor_y = 0;
  let mut shelf_height = 0;
  let mut cells = Vec::with_capacity(blocks.len());
  for &(width, height) in blocks {
    if cursor_x + width > cols {
      cursor_y += shelf_height;
      cursor_x = 0;
      shelf_height = 0;
    }
    if cursor_y + height > rows {
      return None;
    }
    cells.push((cursor_x, cursor_y, width, height));
    cursor_x += width;
    shelf_height = shelf_height.max(height);
  }
  Some(cells)
}

fn to_pixels(cells: &[(u32, u32, u32, u32)], tile: u32) -> Vec<Rect> {
  cells
    .iter()
    .map(|&(col, row, width, height)| Rect::new(col * tile, row * tile, width * tile, height * tile))
    .collect()
}
