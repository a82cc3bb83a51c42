use std::borrow::Cow;

use image::{GrayImage, Luma};
use imageproc::filter::horizontal_filter;

use crate::features::KeyPoint;
use crate::geometry::{AffineMap, SampleWarp};

/// Value marking a valid pixel in a validity mask
pub const MASK_VALID: u8 = 255;

/// Mask marking every pixel of a `width` x `height` image as valid
pub fn full_mask(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([MASK_VALID]))
}

/// Bilinear interpolation with edge replication outside the image
fn bilinear_interpolate(img: &GrayImage, x: f64, y: f64) -> f64 {
    let (width, height) = img.dimensions();
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x_frac = x - x.floor();
    let y_frac = y - y.floor();

    let get_pixel = |px: i64, py: i64| -> f64 {
        let px = px.clamp(0, width as i64 - 1) as u32;
        let py = py.clamp(0, height as i64 - 1) as u32;
        img.get_pixel(px, py)[0] as f64
    };

    let top = get_pixel(x0, y0) * (1.0 - x_frac) + get_pixel(x0 + 1, y0) * x_frac;
    let bottom = get_pixel(x0, y0 + 1) * (1.0 - x_frac) + get_pixel(x0 + 1, y0 + 1) * x_frac;
    top * (1.0 - y_frac) + bottom * y_frac
}

/// Warp an image by `forward` onto a `size` canvas using inverse mapping,
/// bilinear interpolation and a replicated border.
pub fn warp_image(img: &GrayImage, forward: &AffineMap, size: (u32, u32)) -> GrayImage {
    if forward.is_identity() && img.dimensions() == size {
        return img.clone();
    }
    let inverse = forward.invert();
    let (new_width, new_height) = size;
    let mut output = GrayImage::new(new_width, new_height);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let (src_x, src_y) = inverse.apply(out_x as f64, out_y as f64);
        let value = bilinear_interpolate(img, src_x, src_y);
        *pixel = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }

    output
}

/// Nearest-neighbour inverse mapping. Pixels mapping outside the source get
/// `border`, or the closest edge pixel when `border` is `None`.
fn warp_nearest(img: &GrayImage, forward: &AffineMap, size: (u32, u32), border: Option<u8>) -> GrayImage {
    let inverse = forward.invert();
    let (src_width, src_height) = img.dimensions();
    let mut output = GrayImage::new(size.0, size.1);

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let (src_x, src_y) = inverse.apply(out_x as f64, out_y as f64);
        let (sx, sy) = (src_x.round(), src_y.round());
        let inside = sx >= 0.0 && sy >= 0.0 && sx < src_width as f64 && sy < src_height as f64;
        *pixel = match border {
            Some(value) if !inside => Luma([value]),
            _ => {
                let px = sx.clamp(0.0, (src_width - 1) as f64) as u32;
                let py = sy.clamp(0.0, (src_height - 1) as f64) as u32;
                *img.get_pixel(px, py)
            }
        };
    }

    output
}

/// Warp a binary mask by `forward` with nearest-neighbour sampling.
/// Pixels mapping outside the source are invalid.
pub fn warp_mask(mask: &GrayImage, forward: &AffineMap, size: (u32, u32)) -> GrayImage {
    if forward.is_identity() && mask.dimensions() == size {
        return mask.clone();
    }
    warp_nearest(mask, forward, size, Some(0))
}

/// Gaussian blur along x only
pub fn horizontal_blur(img: &GrayImage, sigma: f64) -> GrayImage {
    let radius = (3.0 * sigma).round().max(1.0) as i64;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f64 / (2.0 * sigma * sigma)).exp() as f32)
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    horizontal_filter(img, &kernel)
}

/// Blur sigma that keeps a 1/tilt horizontal decimation alias-free
pub fn anti_alias_sigma(tilt: f64) -> f64 {
    0.8 * (tilt * tilt - 1.0).sqrt()
}

/// Produce the simulated view of `img` for one sample.
///
/// Rotation goes through [`warp_image`]; tilt is a horizontal blur followed
/// by nearest-neighbour decimation through the same x scale as
/// `warp.forward`, so view pixel `u` holds the source at `inverse(u)`. The
/// identity sample borrows the input.
pub fn simulate_view<'a>(img: &'a GrayImage, warp: &SampleWarp) -> Cow<'a, GrayImage> {
    if warp.is_identity() {
        return Cow::Borrowed(img);
    }
    let mut view = match warp.rotation {
        Some((rotation, size)) => Cow::Owned(warp_image(img, &rotation, size)),
        None => Cow::Borrowed(img),
    };
    if warp.param.tilt != 1.0 {
        let blurred = horizontal_blur(&view, anti_alias_sigma(warp.param.tilt));
        let compress = AffineMap::identity().then_scale_x(1.0 / warp.param.tilt);
        view = Cow::Owned(warp_nearest(&blurred, &compress, warp.size, None));
    }
    view
}

/// Produce the validity mask of one sample. The identity sample borrows it.
pub fn simulate_mask<'a>(mask: &'a GrayImage, warp: &SampleWarp) -> Cow<'a, GrayImage> {
    if warp.is_identity() {
        Cow::Borrowed(mask)
    } else {
        Cow::Owned(warp_mask(mask, &warp.forward, warp.size))
    }
}

/// Move keypoint positions through `map`. Size, angle and response are left
/// untouched.
pub fn warp_keypoints(keypoints: &mut [KeyPoint], map: &AffineMap) {
    if map.is_identity() {
        return;
    }
    for kp in keypoints.iter_mut() {
        let (x, y) = map.apply(kp.x as f64, kp.y as f64);
        kp.x = x as f32;
        kp.y = y as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::build_forward;
    use crate::sampling::SampleParameter;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    #[test]
    fn test_identity_is_noop() {
        let img = gradient(40, 30);
        let mask = full_mask(40, 30);
        let warp = build_forward(SampleParameter::IDENTITY, 40, 30);

        assert!(matches!(simulate_view(&img, &warp), Cow::Borrowed(_)));
        assert_eq!(*simulate_view(&img, &warp), img);
        assert_eq!(*simulate_mask(&mask, &warp), mask);
        assert_eq!(warp_image(&img, &AffineMap::identity(), (40, 30)), img);

        let mut keypoints = vec![KeyPoint::new(3.5, 4.25, 7.0)];
        warp_keypoints(&mut keypoints, &warp.forward);
        assert_eq!(keypoints[0], KeyPoint::new(3.5, 4.25, 7.0));
    }

    #[test]
    fn test_translation_shifts_pixels() {
        let img = gradient(20, 20);
        let shift = AffineMap::identity().then_translate(2.0, 1.0);
        let out = warp_image(&img, &shift, (20, 20));
        assert_eq!(out.get_pixel(5, 5), img.get_pixel(3, 4));
    }

    #[test]
    fn test_border_is_replicated() {
        let img = gradient(20, 20);
        let shift = AffineMap::identity().then_translate(5.0, 0.0);
        let out = warp_image(&img, &shift, (20, 20));
        assert_eq!(out.get_pixel(0, 3), img.get_pixel(0, 3));
    }

    #[test]
    fn test_mask_stays_binary() {
        let mut mask = GrayImage::new(30, 30);
        for y in 5..20 {
            for x in 8..25 {
                mask.put_pixel(x, y, Luma([MASK_VALID]));
            }
        }
        let warp = build_forward(SampleParameter::new(2.0, 30.0), 30, 30);
        let warped = simulate_mask(&mask, &warp);
        assert_eq!(warped.dimensions(), warp.size);
        assert!(warped.pixels().all(|p| p[0] == 0 || p[0] == MASK_VALID));
        assert!(warped.pixels().any(|p| p[0] == MASK_VALID));
    }

    #[test]
    fn test_view_matches_warp_size() {
        let img = gradient(64, 48);
        for param in [
            SampleParameter::new(2f64.sqrt(), 0.0),
            SampleParameter::new(2.0, 36.0),
            SampleParameter::new(1.0, 45.0),
        ] {
            let warp = build_forward(param, 64, 48);
            assert_eq!(simulate_view(&img, &warp).dimensions(), warp.size);
        }
    }

    #[test]
    fn test_keypoints_round_trip() {
        let warp = build_forward(SampleParameter::new(2.0, 72.0), 64, 48);
        let original = vec![KeyPoint::new(10.0, 20.0, 5.0), KeyPoint::new(63.0, 0.0, 5.0)];
        let mut keypoints = original.clone();
        warp_keypoints(&mut keypoints, &warp.forward);
        warp_keypoints(&mut keypoints, &warp.inverse());
        for (a, b) in keypoints.iter().zip(&original) {
            assert!((a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3);
            assert_eq!(a.size, b.size);
        }
    }

    #[test]
    fn test_tilted_view_agrees_with_inverse_map() {
        // Pixel value equals the source column
        let ramp = GrayImage::from_fn(256, 8, |x, _| Luma([x as u8]));
        let policy = crate::sampling::SamplingPolicy::default();
        for param in policy.parameters().into_iter().filter(|p| p.phi == 0.0 && p.tilt > 1.0) {
            let warp = build_forward(param, 256, 8);
            let view = simulate_view(&ramp, &warp);
            let inverse = warp.inverse();
            let margin = (3.0 * anti_alias_sigma(param.tilt)).round() + 1.0;
            for u in 0..view.width() {
                let (x, _) = inverse.apply(u as f64, 4.0);
                if x < margin || x > 255.0 - margin {
                    continue;
                }
                let value = view.get_pixel(u, 4)[0] as f64;
                assert!(
                    (value - x).abs() <= 1.0,
                    "tilt {}: view({}) = {} but inverse maps to {:.2}",
                    param.tilt,
                    u,
                    value,
                    x
                );
            }
        }
    }
}
