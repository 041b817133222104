use image::{imageops, GenericImageView, ImageBuffer, Pixel, Primitive};
use num_traits::AsPrimitive;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

pub fn to_position(
    width: u32,
    height: u32,
    pad_width: u32,
    pad_height: u32,
    position: &Position,
) -> Option<(i64, i64)> {
    if width > pad_width || height > pad_height {
        return None;
    }

    let (x, y) = match position {
        Position::Top => ((pad_width - width) / 2, 0),
        Position::Bottom => ((pad_width - width) / 2, pad_height - height),
        Position::Left => (0, (pad_height - height) / 2),
        Position::Right => (pad_width - width, (pad_height - height) / 2),
        Position::TopLeft => (0, 0),
        Position::TopRight => (pad_width - width, 0),
        Position::BottomLeft => (0, pad_height - height),
        Position::BottomRight => (pad_width - width, pad_height - height),
        Position::Center => ((pad_width - width) / 2, (pad_height - height) / 2),
    };

    Some((x.as_(), y.as_()))
}

pub fn padding<I, P, S>(
    image: &I,
    pad_width: u32,
    pad_height: u32,
    position: &Position,
    color: P,
) -> Option<ImageBuffer<P, Vec<S>>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    let (width, height) = image.dimensions();

    to_position(width, height, pad_width, pad_height, position).map(|(x, y)| {
        let mut canvas = ImageBuffer::from_pixel(pad_width, pad_height, color);
        imageops::overlay(&mut canvas, image, x, y);
        canvas
    })
}

/// Inverse of [`padding`]: cuts the `width x height` window at `(x, y)` out of
/// the canvas. `None` when the window leaves the canvas.
pub fn crop<I, P, S>(
    image: &I,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Option<ImageBuffer<P, Vec<S>>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    let (canvas_width, canvas_height) = image.dimensions();
    let fits_x = x.checked_add(width).is_some_and(|end| end <= canvas_width);
    let fits_y = y.checked_add(height).is_some_and(|end| end <= canvas_height);
    if !fits_x || !fits_y {
        return None;
    }

    Some(ImageBuffer::from_fn(width, height, |dx, dy| {
        image.get_pixel(x + dx, y + dy)
    }))
}
