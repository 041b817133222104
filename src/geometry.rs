//! Tile grid arithmetic.
//!
//! Tiles are addressed either by `(col, row)` or by a row-major index
//! `row * cols + col`. The same [`TileGrid`] value is used to build the task
//! list and to stitch results back together, so both sides agree on `cols`.

use image::{ImageBuffer, Pixel, Rgba, RgbaImage};

use crate::errors::{Result, TileSegError};
use crate::imageops_ai::padding::{crop, padding, to_position, Position};

/// Anchor used when padding an image up to the tile grid.
pub const PADDING_ANCHOR: Position = Position::Center;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub col: u32,
    pub row: u32,
}

/// Rounds each dimension up to the next multiple of `tile_size`.
pub fn padded_size(width: u32, height: u32, tile_size: u32) -> Result<(u32, u32)> {
    if tile_size == 0 {
        return Err(TileSegError::Configuration {
            message: "tile size must be positive".to_string(),
        });
    }
    let round_up = |value: u32| -> Result<u32> {
        match value % tile_size {
            0 => Ok(value),
            rem => value
                .checked_add(tile_size - rem)
                .ok_or_else(|| TileSegError::Validation {
                    field: "image dimensions".to_string(),
                    reason: format!("{value} cannot be padded to a multiple of {tile_size}"),
                }),
        }
    };
    Ok((round_up(width)?, round_up(height)?))
}

pub const fn tile_origin(col: u32, row: u32, tile_size: u32) -> (u32, u32) {
    (col * tile_size, row * tile_size)
}

/// Offset of the original content inside the padded canvas.
pub fn padding_offset(original: (u32, u32), padded: (u32, u32)) -> Result<(u32, u32)> {
    let (width, height) = original;
    let (pad_width, pad_height) = padded;
    to_position(width, height, pad_width, pad_height, &PADDING_ANCHOR)
        .map(|(x, y)| (x as u32, y as u32))
        .ok_or_else(|| TileSegError::Validation {
            field: "padded size".to_string(),
            reason: format!("{pad_width}x{pad_height} is smaller than {width}x{height}"),
        })
}

/// Layout of tiles over a padded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    cols: u32,
    rows: u32,
    tile_size: u32,
}

impl TileGrid {
    /// Fails when the padded dimensions are not exact multiples of the tile
    /// size, which means padding was computed wrongly upstream.
    pub fn new(padded_width: u32, padded_height: u32, tile_size: u32) -> Result<Self> {
        if tile_size == 0 {
            return Err(TileSegError::Configuration {
                message: "tile size must be positive".to_string(),
            });
        }
        if padded_width % tile_size != 0 || padded_height % tile_size != 0 {
            return Err(TileSegError::Validation {
                field: "padded size".to_string(),
                reason: format!(
                    "{padded_width}x{padded_height} is not a multiple of tile size {tile_size}"
                ),
            });
        }
        Ok(Self {
            cols: padded_width / tile_size,
            rows: padded_height / tile_size,
            tile_size,
        })
    }

    pub const fn cols(&self) -> u32 {
        self.cols
    }

    pub const fn rows(&self) -> u32 {
        self.rows
    }

    pub const fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub const fn len(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn dimensions(&self) -> (u32, u32) {
        (self.cols * self.tile_size, self.rows * self.tile_size)
    }

    pub const fn index_of(&self, coord: TileCoord) -> usize {
        coord.row as usize * self.cols as usize + coord.col as usize
    }

    pub fn coord_of(&self, index: usize) -> Option<TileCoord> {
        (index < self.len()).then(|| TileCoord {
            col: (index % self.cols as usize) as u32,
            row: (index / self.cols as usize) as u32,
        })
    }

    pub const fn origin(&self, coord: TileCoord) -> (u32, u32) {
        tile_origin(coord.col, coord.row, self.tile_size)
    }

    /// Tile coordinates in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| TileCoord { col, row }))
    }
}

/// A working image zero-padded up to the tile grid, remembering where the
/// original content sits so the padding can be removed again.
#[derive(Debug, Clone)]
pub struct PaddedImage {
    pub image: RgbaImage,
    original_size: (u32, u32),
    offset: (u32, u32),
}

impl PaddedImage {
    pub fn new(image: &RgbaImage, tile_size: u32) -> Result<Self> {
        let original_size = image.dimensions();
        let (pad_width, pad_height) = padded_size(original_size.0, original_size.1, tile_size)?;
        let offset = padding_offset(original_size, (pad_width, pad_height))?;

        let padded = if (pad_width, pad_height) == original_size {
            image.clone()
        } else {
            padding(image, pad_width, pad_height, &PADDING_ANCHOR, Rgba([0, 0, 0, 0])).ok_or_else(
                || TileSegError::Validation {
                    field: "padded size".to_string(),
                    reason: format!("cannot pad {original_size:?} to {pad_width}x{pad_height}"),
                },
            )?
        };

        Ok(Self {
            image: padded,
            original_size,
            offset,
        })
    }

    pub const fn original_size(&self) -> (u32, u32) {
        self.original_size
    }

    pub fn padded_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub const fn offset(&self) -> (u32, u32) {
        self.offset
    }

    /// Crops any image laid out like the padded canvas (the processed image,
    /// the stitched mask) back to the original dimensions.
    pub fn restore<P>(
        &self,
        canvas: &ImageBuffer<P, Vec<P::Subpixel>>,
    ) -> Result<ImageBuffer<P, Vec<P::Subpixel>>>
    where
        P: Pixel,
    {
        let (x, y) = self.offset;
        let (width, height) = self.original_size;
        crop(canvas, x, y, width, height).ok_or_else(|| TileSegError::Validation {
            field: "restore".to_string(),
            reason: format!(
                "canvas {:?} does not contain {width}x{height} at ({x}, {y})",
                canvas.dimensions()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_size_rounds_up() -> Result<()> {
        assert_eq!(padded_size(300, 100, 256)?, (512, 256));
        assert_eq!(padded_size(1, 1, 256)?, (256, 256));
        assert_eq!(padded_size(257, 511, 256)?, (512, 512));
        Ok(())
    }

    #[test]
    fn test_padded_size_identity_for_multiples() -> Result<()> {
        assert_eq!(padded_size(512, 512, 256)?, (512, 512));
        assert_eq!(padded_size(256, 768, 256)?, (256, 768));
        Ok(())
    }

    #[test]
    fn test_padded_size_rejects_zero_tile() {
        assert!(matches!(
            padded_size(10, 10, 0),
            Err(TileSegError::Configuration { .. })
        ));
    }

    #[test]
    fn test_grid_dimensions() -> Result<()> {
        let grid = TileGrid::new(512, 256, 256)?;
        assert_eq!((grid.cols(), grid.rows()), (2, 1));
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.dimensions(), (512, 256));
        Ok(())
    }

    #[test]
    fn test_grid_rejects_unpadded_dimensions() {
        assert!(matches!(
            TileGrid::new(300, 256, 256),
            Err(TileSegError::Validation { .. })
        ));
    }

    #[test]
    fn test_row_major_mapping() -> Result<()> {
        let grid = TileGrid::new(768, 512, 256)?;
        let coords: Vec<_> = grid.iter().collect();
        assert_eq!(coords.len(), 6);

        for (index, coord) in coords.iter().enumerate() {
            assert_eq!(grid.index_of(*coord), index);
            assert_eq!(grid.coord_of(index), Some(*coord));
        }
        assert_eq!(coords[4], TileCoord { col: 1, row: 1 });
        assert_eq!(grid.origin(coords[4]), (256, 256));
        assert_eq!(grid.coord_of(6), None);
        Ok(())
    }

    #[test]
    fn test_padding_offset_is_centered() -> Result<()> {
        assert_eq!(padding_offset((300, 100), (512, 256))?, (106, 78));
        assert_eq!(padding_offset((512, 512), (512, 512))?, (0, 0));
        assert!(padding_offset((600, 100), (512, 256)).is_err());
        Ok(())
    }

    fn checkerboard(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = if (x / 7 + y / 5) % 2 == 0 { 220 } else { 15 };
            Rgba([v, (x % 256) as u8, (y % 256) as u8, 255])
        })
    }

    #[test]
    fn test_pad_is_noop_for_multiples() -> Result<()> {
        let image = checkerboard(512, 256);
        let padded = PaddedImage::new(&image, 256)?;
        assert_eq!(padded.image, image);
        assert_eq!(padded.offset(), (0, 0));
        Ok(())
    }

    #[test]
    fn test_restore_inverts_pad() -> Result<()> {
        for (width, height) in [(300, 100), (1, 1), (257, 600), (256, 255)] {
            let image = checkerboard(width, height);
            let padded = PaddedImage::new(&image, 256)?;
            let (pad_width, pad_height) = padded.padded_size();
            assert_eq!(pad_width % 256, 0);
            assert_eq!(pad_height % 256, 0);
            assert_eq!(padded.restore(&padded.image)?, image);
        }
        Ok(())
    }

    #[test]
    fn test_padding_border_is_zero() -> Result<()> {
        let padded = PaddedImage::new(&checkerboard(300, 100), 256)?;
        assert_eq!(padded.image.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
        assert_eq!(padded.image.get_pixel(511, 255), &Rgba([0, 0, 0, 0]));
        Ok(())
    }
}
