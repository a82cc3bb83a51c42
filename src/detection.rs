//! Built-in base feature algorithms.
//!
//! A FAST-9 corner detector paired with either a normalised intensity
//! patch (float, L2) or a BRIEF-style pair-test string (binary, Hamming).

use std::borrow::Cow;

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::capability::{Detector, Extractor, Feature2D};
use crate::error::Result;
use crate::features::{DescriptorKind, DescriptorLayout, Descriptors, KeyPoint, NormType};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastParams {
    /// Intensity difference for a circle pixel to count as brighter/darker
    pub threshold: u8,
    /// Keep only this many corners per view, strongest first
    pub max_keypoints: usize,
    /// Corners closer than this to the image edge are dropped
    pub border: u32,
    /// Size reported on each keypoint
    pub keypoint_size: f32,
}

impl Default for FastParams {
    fn default() -> Self {
        Self {
            threshold: 20,
            max_keypoints: 500,
            border: 12,
            keypoint_size: 7.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchParams {
    /// Patch is (2r+1) x (2r+1)
    pub radius: u32,
    /// Pre-smoothing before sampling; 0 disables it
    pub sigma: f32,
}

impl Default for PatchParams {
    fn default() -> Self {
        Self {
            radius: 4,
            sigma: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefParams {
    /// Descriptor length in bytes
    pub bytes: usize,
    /// Test pairs are drawn inside a square of this half-size
    pub radius: u32,
    pub sigma: f32,
    pub seed: u64,
}

impl Default for BriefParams {
    fn default() -> Self {
        Self {
            bytes: 32,
            radius: 12,
            sigma: 2.0,
            seed: 0xb41e_f00d,
        }
    }
}

fn smooth(image: &GrayImage, sigma: f32) -> Cow<'_, GrayImage> {
    if sigma > 0.0 {
        Cow::Owned(gaussian_blur_f32(image, sigma))
    } else {
        Cow::Borrowed(image)
    }
}

/// Integer centre of `kp` if a square of half-size `radius` around it fits
fn patch_centre(kp: &KeyPoint, radius: u32, width: u32, height: u32) -> Option<(u32, u32)> {
    let (x, y) = (kp.x.round(), kp.y.round());
    let r = radius as f32;
    if x < r || y < r || x + r > (width as f32 - 1.0) || y + r > (height as f32 - 1.0) {
        return None;
    }
    Some((x as u32, y as u32))
}

/// FAST-9 corners inside the mask, strongest first
#[derive(Debug, Clone, Copy, Default)]
pub struct FastDetector {
    params: FastParams,
}

impl FastDetector {
    pub fn new(params: FastParams) -> Self {
        Self { params }
    }
}

impl Detector for FastDetector {
    fn detect(&self, image: &GrayImage, mask: &GrayImage) -> Result<Vec<KeyPoint>> {
        let (width, height) = image.dimensions();
        let border = self.params.border;
        let mut corners: Vec<_> = corners_fast9(image, self.params.threshold)
            .into_iter()
            .filter(|c| {
                c.x >= border
                    && c.y >= border
                    && c.x + border < width
                    && c.y + border < height
                    && mask.get_pixel(c.x, c.y)[0] != 0
            })
            .collect();

        // Ties broken by position so the output does not depend on scan order
        corners.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then((a.y, a.x).cmp(&(b.y, b.x)))
        });
        corners.truncate(self.params.max_keypoints);

        Ok(corners
            .into_iter()
            .map(|c| {
                KeyPoint::new(c.x as f32, c.y as f32, self.params.keypoint_size)
                    .with_response(c.score)
            })
            .collect())
    }
}

/// Zero-mean, unit-norm intensity patch around each keypoint
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchExtractor {
    params: PatchParams,
}

impl PatchExtractor {
    pub fn new(params: PatchParams) -> Self {
        Self { params }
    }

    fn side(&self) -> usize {
        2 * self.params.radius as usize + 1
    }
}

impl Extractor for PatchExtractor {
    fn layout(&self) -> DescriptorLayout {
        DescriptorLayout::new(DescriptorKind::Float, self.side() * self.side())
    }

    fn default_norm(&self) -> NormType {
        NormType::L2
    }

    fn compute(&self, image: &GrayImage, keypoints: Vec<KeyPoint>) -> Result<(Vec<KeyPoint>, Descriptors)> {
        let smoothed = smooth(image, self.params.sigma);
        let (width, height) = image.dimensions();
        let r = self.params.radius;
        let cols = self.side() * self.side();

        let mut kept = Vec::with_capacity(keypoints.len());
        let mut data = Vec::with_capacity(keypoints.len() * cols);
        for kp in keypoints {
            let Some((cx, cy)) = patch_centre(&kp, r, width, height) else {
                continue;
            };
            let start = data.len();
            for y in cy - r..=cy + r {
                for x in cx - r..=cx + r {
                    data.push(smoothed.get_pixel(x, y)[0] as f32);
                }
            }
            let patch = &mut data[start..];
            let mean = patch.iter().sum::<f32>() / cols as f32;
            patch.iter_mut().for_each(|v| *v -= mean);
            let norm = patch.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 1e-6 {
                patch.iter_mut().for_each(|v| *v /= norm);
            }
            kept.push(kp);
        }
        Ok((kept, Descriptors::Float { cols, data }))
    }
}

/// Binary string of intensity comparisons between fixed point pairs
#[derive(Debug, Clone)]
pub struct BriefExtractor {
    params: BriefParams,
    pairs: Vec<((i32, i32), (i32, i32))>,
}

impl BriefExtractor {
    pub fn new(params: BriefParams) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let r = params.radius as i32;
        let pairs = (0..params.bytes * 8)
            .map(|_| {
                (
                    (rng.gen_range(-r..=r), rng.gen_range(-r..=r)),
                    (rng.gen_range(-r..=r), rng.gen_range(-r..=r)),
                )
            })
            .collect();
        Self { params, pairs }
    }
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self::new(BriefParams::default())
    }
}

impl Extractor for BriefExtractor {
    fn layout(&self) -> DescriptorLayout {
        DescriptorLayout::new(DescriptorKind::Binary, self.params.bytes)
    }

    fn default_norm(&self) -> NormType {
        NormType::Hamming
    }

    fn compute(&self, image: &GrayImage, keypoints: Vec<KeyPoint>) -> Result<(Vec<KeyPoint>, Descriptors)> {
        let smoothed = smooth(image, self.params.sigma);
        let (width, height) = image.dimensions();
        let cols = self.params.bytes;
        let sample = |cx: u32, cy: u32, (dx, dy): (i32, i32)| {
            smoothed.get_pixel((cx as i32 + dx) as u32, (cy as i32 + dy) as u32)[0]
        };

        let mut kept = Vec::with_capacity(keypoints.len());
        let mut data = Vec::with_capacity(keypoints.len() * cols);
        for kp in keypoints {
            let Some((cx, cy)) = patch_centre(&kp, self.params.radius, width, height) else {
                continue;
            };
            for chunk in self.pairs.chunks(8) {
                let byte = chunk.iter().enumerate().fold(0u8, |acc, (bit, &(p, q))| {
                    if sample(cx, cy, p) < sample(cx, cy, q) {
                        acc | (1 << bit)
                    } else {
                        acc
                    }
                });
                data.push(byte);
            }
            kept.push(kp);
        }
        Ok((kept, Descriptors::Binary { cols, data }))
    }
}

/// FAST corners described by normalised patches
#[derive(Debug, Clone, Copy, Default)]
pub struct FastPatch {
    detector: FastDetector,
    extractor: PatchExtractor,
}

impl FastPatch {
    pub fn new(fast: FastParams, patch: PatchParams) -> Self {
        Self {
            detector: FastDetector::new(fast),
            extractor: PatchExtractor::new(patch),
        }
    }
}

impl Detector for FastPatch {
    fn detect(&self, image: &GrayImage, mask: &GrayImage) -> Result<Vec<KeyPoint>> {
        self.detector.detect(image, mask)
    }
}

impl Extractor for FastPatch {
    fn layout(&self) -> DescriptorLayout {
        self.extractor.layout()
    }

    fn default_norm(&self) -> NormType {
        self.extractor.default_norm()
    }

    fn compute(&self, image: &GrayImage, keypoints: Vec<KeyPoint>) -> Result<(Vec<KeyPoint>, Descriptors)> {
        self.extractor.compute(image, keypoints)
    }
}

impl Feature2D for FastPatch {}

/// FAST corners described by binary pair tests
#[derive(Debug, Clone, Default)]
pub struct FastBrief {
    detector: FastDetector,
    extractor: BriefExtractor,
}

impl FastBrief {
    pub fn new(fast: FastParams, brief: BriefParams) -> Self {
        Self {
            detector: FastDetector::new(fast),
            extractor: BriefExtractor::new(brief),
        }
    }
}

impl Detector for FastBrief {
    fn detect(&self, image: &GrayImage, mask: &GrayImage) -> Result<Vec<KeyPoint>> {
        self.detector.detect(image, mask)
    }
}

impl Extractor for FastBrief {
    fn layout(&self) -> DescriptorLayout {
        self.extractor.layout()
    }

    fn default_norm(&self) -> NormType {
        self.extractor.default_norm()
    }

    fn compute(&self, image: &GrayImage, keypoints: Vec<KeyPoint>) -> Result<(Vec<KeyPoint>, Descriptors)> {
        self.extractor.compute(image, keypoints)
    }
}

impl Feature2D for FastBrief {}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Dark background with bright squares; every square corner is a FAST corner
    fn squares() -> GrayImage {
        let mut img = GrayImage::from_pixel(96, 96, Luma([30]));
        for (x0, y0) in [(20u32, 20u32), (55, 25), (30, 60)] {
            for y in y0..y0 + 14 {
                for x in x0..x0 + 14 {
                    img.put_pixel(x, y, Luma([220]));
                }
            }
        }
        img
    }

    fn full(img: &GrayImage) -> GrayImage {
        GrayImage::from_pixel(img.width(), img.height(), Luma([255]))
    }

    #[test]
    fn test_fast_finds_square_corners() {
        let img = squares();
        let kps = FastDetector::default().detect(&img, &full(&img)).unwrap();
        assert!(!kps.is_empty());
        assert!(kps.windows(2).all(|w| w[0].response >= w[1].response));
        // Every corner sits near one of the square outlines
        for kp in &kps {
            let near = [(20.0, 20.0), (55.0, 25.0), (30.0, 60.0)].iter().any(|&(x0, y0)| {
                kp.x >= x0 - 3.0 && kp.x <= x0 + 16.0 && kp.y >= y0 - 3.0 && kp.y <= y0 + 16.0
            });
            assert!(near, "stray corner at ({}, {})", kp.x, kp.y);
        }
    }

    #[test]
    fn test_fast_honours_mask() {
        let img = squares();
        let mut mask = full(&img);
        for y in 0..96 {
            for x in 0..48 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        let kps = FastDetector::default().detect(&img, &mask).unwrap();
        assert!(!kps.is_empty());
        assert!(kps.iter().all(|kp| kp.x >= 48.0));
    }

    #[test]
    fn test_patch_descriptor_is_normalised() {
        let img = squares();
        let kps = vec![KeyPoint::new(20.0, 20.0, 7.0), KeyPoint::new(1.0, 1.0, 7.0)];
        let (kept, desc) = PatchExtractor::default().compute(&img, kps).unwrap();

        // The second keypoint's patch leaves the image
        assert_eq!(kept.len(), 1);
        assert_eq!(desc.rows(), 1);
        let Descriptors::Float { data, .. } = &desc else {
            panic!("expected float descriptors");
        };
        let norm: f32 = data.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_brief_is_deterministic_and_discriminative() {
        let img = squares();
        let kps = vec![KeyPoint::new(20.0, 20.0, 7.0), KeyPoint::new(68.0, 38.0, 7.0)];
        let a = BriefExtractor::default().compute(&img, kps.clone()).unwrap();
        let b = BriefExtractor::default().compute(&img, kps).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.1.layout(), DescriptorLayout::new(DescriptorKind::Binary, 32));
        let Descriptors::Binary { data, .. } = &a.1 else {
            panic!("expected binary descriptors");
        };
        // Top-left and bottom-right corners look different
        assert_ne!(&data[..32], &data[32..]);
    }
}
