//! Debug renderings of matches.

use image::buffer::ConvertBuffer;
use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};

use crate::features::{FeatureMatch, KeyPoint};

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 64, 64]),
    Rgb([64, 220, 64]),
    Rgb([64, 128, 255]),
    Rgb([255, 200, 0]),
    Rgb([255, 64, 255]),
    Rgb([0, 220, 220]),
];

/// Darken pixels outside `mask` to a quarter of their intensity
pub fn shade_outside_mask(image: &GrayImage, mask: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for (x, y, p) in out.enumerate_pixels_mut() {
        let inside = mask.get_pixel_checked(x, y).is_some_and(|m| m[0] != 0);
        if !inside {
            *p = Luma([p[0] / 4]);
        }
    }
    out
}

/// Query and reference side by side, matched keypoints circled and joined
pub fn draw_matches(
    query_image: &GrayImage,
    query_keypoints: &[KeyPoint],
    reference_image: &GrayImage,
    reference_keypoints: &[KeyPoint],
    matches: &[FeatureMatch],
) -> RgbImage {
    let offset = query_image.width();
    let width = offset + reference_image.width();
    let height = query_image.height().max(reference_image.height());

    let query_rgb: RgbImage = query_image.convert();
    let reference_rgb: RgbImage = reference_image.convert();
    let mut canvas = RgbImage::new(width, height);
    imageops::replace(&mut canvas, &query_rgb, 0, 0);
    imageops::replace(&mut canvas, &reference_rgb, offset as i64, 0);

    for (i, m) in matches.iter().enumerate() {
        let (Some(q), Some(r)) = (
            query_keypoints.get(m.query_idx),
            reference_keypoints.get(m.train_idx),
        ) else {
            continue;
        };
        let color = PALETTE[i % PALETTE.len()];
        let from = (q.x, q.y);
        let to = (r.x + offset as f32, r.y);
        let radius = (q.size / 2.0).max(2.0).round() as i32;

        draw_hollow_circle_mut(&mut canvas, (from.0.round() as i32, from.1.round() as i32), radius, color);
        draw_hollow_circle_mut(&mut canvas, (to.0.round() as i32, to.1.round() as i32), radius, color);
        draw_line_segment_mut(&mut canvas, from, to, color);
    }
    canvas
}
