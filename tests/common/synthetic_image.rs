use image::{GrayImage, Luma};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Dark canvas covered with overlapping bright rectangles. Every rectangle
/// corner is a strong FAST corner and the layout is fixed by `seed`.
pub fn rectangles(width: u32, height: u32, count: usize, seed: u64) -> GrayImage {
    assert!(width >= 32 && height >= 32, "image too small for the rectangle layout");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(width, height, Luma([40]));
    for _ in 0..count {
        let w = rng.gen_range(6..width / 4);
        let h = rng.gen_range(6..height / 4);
        let x0 = rng.gen_range(12..width - 12 - w);
        let y0 = rng.gen_range(12..height - 12 - h);
        let value = rng.gen_range(110..=250u8);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }
    img
}

/// Uniform image without any corner
pub fn flat(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([128]))
}
