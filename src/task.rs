use std::ops::Div;

use image::{buffer::ConvertBuffer, GrayImage, Pixel, Primitive, Rgb, RgbImage, RgbaImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{Result, TileSegError};
use crate::geometry::{TileCoord, TileGrid};
use crate::imageops_ai::get_max_value;
use crate::imageops_ai::mask::{BACKGROUND, FOREGROUND};
use crate::imageops_ai::padding::crop;
use crate::traits::ModelRuntime;

/// One tile of the padded image and where it belongs.
#[derive(Debug, Clone)]
pub struct TileTask {
    index: usize,
    coord: TileCoord,
    tile: RgbaImage,
}

impl TileTask {
    pub fn new(index: usize, coord: TileCoord, tile: RgbaImage) -> Self {
        Self { index, coord, tile }
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn tile(&self) -> &RgbaImage {
        &self.tile
    }

    /// Runs one inference call on the tile and thresholds the scores into a
    /// binary mask tile of the same size.
    pub fn execute<R>(&self, runtime: &R, threshold: f32) -> Result<GrayImage>
    where
        R: ModelRuntime + ?Sized,
    {
        let (width, height) = self.tile.dimensions();
        let rgb: RgbImage = self.tile.convert();
        let tensor = to_tensor(&rgb);
        let scores =
            runtime
                .infer(tensor.view())
                .map_err(|err| TileSegError::TaskExecution {
                    index: self.index,
                    message: err.to_string(),
                })?;

        let expected = [1, height as usize, width as usize];
        if scores.shape() != &expected[..] {
            return Err(TileSegError::TaskExecution {
                index: self.index,
                message: format!(
                    "model returned scores of shape {:?}, expected {:?}",
                    scores.shape(),
                    expected
                ),
            });
        }

        Ok(threshold_scores(scores.index_axis(Axis(0), 0), threshold))
    }
}

/// Cuts the padded image into row-major tile tasks.
pub fn build_tasks(padded: &RgbaImage, grid: &TileGrid) -> Result<Vec<TileTask>> {
    let tile_size = grid.tile_size();
    grid.iter()
        .map(|coord| {
            let (x, y) = grid.origin(coord);
            let tile = crop(padded, x, y, tile_size, tile_size).ok_or_else(|| {
                TileSegError::Validation {
                    field: "tile".to_string(),
                    reason: format!("tile {coord:?} lies outside {:?}", padded.dimensions()),
                }
            })?;
            Ok(TileTask::new(grid.index_of(coord), coord, tile))
        })
        .collect()
}

/// NHWC tensor with channel values scaled to `0.0..=1.0`.
pub fn to_tensor<S>(image: &image::ImageBuffer<Rgb<S>, Vec<S>>) -> Array4<f32>
where
    Rgb<S>: Pixel<Subpixel = S>,
    S: Into<f32> + Primitive + 'static,
{
    let max: f32 = get_max_value::<S>().into();
    image
        .as_ndarray3()
        .permuted_axes([1, 2, 0])
        .insert_axis(Axis(0))
        .map(|v| <S as Into<f32>>::into(*v).div(max))
}

/// `score > threshold` is foreground.
pub fn threshold_scores(scores: ArrayView2<f32>, threshold: f32) -> GrayImage {
    let (height, width) = scores.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if scores[[y as usize, x as usize]] > threshold {
            FOREGROUND
        } else {
            BACKGROUND
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockRuntime;
    use image::Rgba;

    struct ShapeMismatchRuntime;

    impl ModelRuntime for ShapeMismatchRuntime {
        fn infer(&self, _tensor: ArrayView4<f32>) -> Result<Array3<f32>> {
            Ok(Array3::zeros((1, 8, 4)))
        }
    }

    #[test]
    fn test_tensor_is_normalized_nhwc() {
        let image = RgbImage::from_fn(3, 2, |x, y| Rgb([255, (x * 50) as u8, (y * 100) as u8]));
        let tensor = to_tensor(&image);

        assert_eq!(tensor.shape(), &[1, 2, 3, 3]);
        assert_eq!(tensor[[0, 1, 2, 0]], 1.0);
        assert!((tensor[[0, 1, 2, 1]] - 100.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 2]] - 100.0 / 255.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 0, 2]], 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let scores = array![[0.5, 0.51], [0.0, 1.0]];
        let mask = threshold_scores(scores.view(), 0.5);
        assert_eq!(mask.get_pixel(0, 0), &BACKGROUND);
        assert_eq!(mask.get_pixel(1, 0), &FOREGROUND);
        assert_eq!(mask.get_pixel(0, 1), &BACKGROUND);
        assert_eq!(mask.get_pixel(1, 1), &FOREGROUND);
    }

    #[test]
    fn test_execute_with_mock_runtime() -> Result<()> {
        let tile = RgbaImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let task = TileTask::new(0, TileCoord { col: 0, row: 0 }, tile);
        let mask = task.execute(&MockRuntime::default(), 0.5)?;

        assert_eq!(mask.dimensions(), (8, 8));
        assert_eq!(mask.get_pixel(0, 5), &FOREGROUND);
        assert_eq!(mask.get_pixel(7, 5), &BACKGROUND);
        Ok(())
    }

    #[test]
    fn test_execute_rejects_malformed_output() {
        let task = TileTask::new(5, TileCoord { col: 1, row: 1 }, RgbaImage::new(8, 8));
        match task.execute(&ShapeMismatchRuntime, 0.5) {
            Err(TileSegError::TaskExecution { index, .. }) => assert_eq!(index, 5),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_build_tasks_row_major() -> Result<()> {
        let padded = RgbaImage::from_fn(512, 256, |x, _| Rgba([(x / 256) as u8, 0, 0, 255]));
        let grid = TileGrid::new(512, 256, 256)?;
        let tasks = build_tasks(&padded, &grid)?;

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].index(), 1);
        assert_eq!(tasks[1].coord(), TileCoord { col: 1, row: 0 });
        assert_eq!(tasks[1].tile().get_pixel(0, 0), &Rgba([1, 0, 0, 255]));
        Ok(())
    }
}
