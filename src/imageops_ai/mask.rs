use anyhow::{ensure, Result};
use image::{GenericImageView, ImageBuffer, Luma, Pixel, Primitive, Rgba};
use num_traits::AsPrimitive;

use crate::imageops_ai::get_max_value;

pub const FOREGROUND: Luma<u8> = Luma([255]);
pub const BACKGROUND: Luma<u8> = Luma([0]);

/// Replaces every pixel whose mask value is not foreground with its grey
/// equivalent: the channel average, replicated, at full opacity.
/// Foreground pixels are left untouched.
pub fn apply_grayscale<SI, M>(image: &mut ImageBuffer<Rgba<SI>, Vec<SI>>, mask: &M) -> Result<()>
where
    M: GenericImageView<Pixel = Luma<u8>>,
    Rgba<SI>: Pixel<Subpixel = SI>,
    SI: Primitive + AsPrimitive<u32> + 'static,
    u32: AsPrimitive<SI>,
{
    ensure!(
        image.dimensions() == mask.dimensions(),
        "Image and mask dimensions do not match: image {:?}, mask {:?}",
        image.dimensions(),
        mask.dimensions()
    );

    let opaque: SI = get_max_value::<SI>();

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if mask.get_pixel(x, y) == FOREGROUND {
            continue;
        }
        let Rgba([red, green, blue, _]) = *pixel;
        let gray: SI = ((red.as_() + green.as_() + blue.as_()) / 3).as_();
        *pixel = Rgba([gray, gray, gray, opaque]);
    }

    Ok(())
}
