use image::GrayImage;
use log::debug;

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::features::{Descriptors, FeatureSet, KeyPoint};
use crate::geometry::{build_forward, SampleWarp};
use crate::sampling::SampleParameter;
use crate::transform::{simulate_mask, simulate_view, warp_keypoints};

/// Work for one simulated view: warp the inputs forward, run the base
/// algorithm, bring keypoints back to source coordinates.
#[derive(Debug, Clone, Copy)]
pub struct SampleTask<'a> {
    image: &'a GrayImage,
    mask: &'a GrayImage,
    warp: SampleWarp,
}

impl<'a> SampleTask<'a> {
    /// `mask` must have the size of `image`
    pub fn new(image: &'a GrayImage, mask: &'a GrayImage, param: SampleParameter) -> Self {
        let (width, height) = image.dimensions();
        Self {
            image,
            mask,
            warp: build_forward(param, width, height),
        }
    }

    pub fn warp(&self) -> &SampleWarp {
        &self.warp
    }

    pub fn detect(&self, capability: &Capability) -> Result<Vec<KeyPoint>> {
        let view = simulate_view(self.image, &self.warp);
        let mask = simulate_mask(self.mask, &self.warp);

        let mut keypoints = capability.detect(&view, &mask)?;
        warp_keypoints(&mut keypoints, &self.warp.inverse());

        self.log_result(keypoints.len());
        Ok(keypoints)
    }

    /// Describe externally supplied keypoints (source coordinates) in this view
    pub fn compute(&self, capability: &Capability, keypoints: &[KeyPoint]) -> Result<FeatureSet> {
        let view = simulate_view(self.image, &self.warp);

        let mut warped = keypoints.to_vec();
        warp_keypoints(&mut warped, &self.warp.forward);

        let (keypoints, descriptors) = capability.compute(&view, warped)?;
        self.finish(capability, keypoints, descriptors)
    }

    pub fn detect_and_compute(&self, capability: &Capability) -> Result<FeatureSet> {
        let view = simulate_view(self.image, &self.warp);
        let mask = simulate_mask(self.mask, &self.warp);

        let (keypoints, descriptors) = capability.detect_and_compute(&view, &mask)?;
        self.finish(capability, keypoints, descriptors)
    }

    fn finish(
        &self,
        capability: &Capability,
        mut keypoints: Vec<KeyPoint>,
        descriptors: Descriptors,
    ) -> Result<FeatureSet> {
        let (layout, norm) = capability.descriptor_info()?;
        if !descriptors.is_empty() && descriptors.layout() != layout {
            return Err(Error::DescriptorLayout {
                expected: format!("{:?}", layout),
                got: format!("{:?}", descriptors.layout()),
            });
        }
        warp_keypoints(&mut keypoints, &self.warp.inverse());
        self.log_result(keypoints.len());
        FeatureSet::new(keypoints, descriptors, norm)
    }

    fn log_result(&self, count: usize) {
        debug!(
            "sample tilt={:.3} phi={:.2} size={:?}: {} keypoints",
            self.warp.param.tilt, self.warp.param.phi, self.warp.size, count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Detector, Extractor, Feature2D};
    use crate::features::{DescriptorKind, DescriptorLayout, NormType};
    use crate::transform::full_mask;
    use image::Luma;
    use std::sync::Arc;

    /// Reports the brightest valid pixel
    struct Brightest;

    impl Detector for Brightest {
        fn detect(&self, image: &GrayImage, mask: &GrayImage) -> Result<Vec<KeyPoint>> {
            let best = image
                .enumerate_pixels()
                .filter(|(x, y, _)| mask.get_pixel(*x, *y)[0] != 0)
                .max_by_key(|(_, _, p)| p[0]);
            Ok(best
                .map(|(x, y, _)| vec![KeyPoint::new(x as f32, y as f32, 3.0)])
                .unwrap_or_default())
        }
    }

    /// One float per keypoint: the pixel value under it
    struct Intensity;

    impl Extractor for Intensity {
        fn layout(&self) -> DescriptorLayout {
            DescriptorLayout::new(DescriptorKind::Float, 1)
        }

        fn default_norm(&self) -> NormType {
            NormType::L2
        }

        fn compute(
            &self,
            image: &GrayImage,
            keypoints: Vec<KeyPoint>,
        ) -> Result<(Vec<KeyPoint>, Descriptors)> {
            let (w, h) = image.dimensions();
            let data = keypoints
                .iter()
                .map(|kp| {
                    let x = (kp.x.round().max(0.0) as u32).min(w - 1);
                    let y = (kp.y.round().max(0.0) as u32).min(h - 1);
                    image.get_pixel(x, y)[0] as f32
                })
                .collect();
            Ok((keypoints, Descriptors::Float { cols: 1, data }))
        }
    }

    impl Feature2D for Intensity {}

    impl Detector for Intensity {
        fn detect(&self, image: &GrayImage, mask: &GrayImage) -> Result<Vec<KeyPoint>> {
            Brightest.detect(image, mask)
        }
    }

    /// Single-peaked blob centred on (20, 30)
    fn spot_image() -> GrayImage {
        GrayImage::from_fn(80, 60, |x, y| {
            let d2 = (x as f64 - 20.0).powi(2) + (y as f64 - 30.0).powi(2);
            Luma([(255.0 * (-d2 / 18.0).exp()).round() as u8])
        })
    }

    #[test]
    fn test_detected_keypoints_map_back_to_source() {
        let img = spot_image();
        let mask = full_mask(80, 60);
        let capability = Capability::Detector(Arc::new(Brightest));

        for param in crate::sampling::SamplingPolicy::default().parameters() {
            let keypoints = SampleTask::new(&img, &mask, param).detect(&capability).unwrap();
            assert_eq!(keypoints.len(), 1, "{:?}", param);
            let kp = keypoints[0];
            assert!(
                (15.0..25.0).contains(&kp.x) && (25.0..35.0).contains(&kp.y),
                "{:?} mapped back to ({}, {})",
                param,
                kp.x,
                kp.y
            );
        }
    }

    #[test]
    fn test_compute_keeps_rows_aligned() {
        let img = spot_image();
        let mask = full_mask(80, 60);
        let capability = Capability::Extractor(Arc::new(Intensity));
        let provided = vec![KeyPoint::new(20.0, 30.0, 3.0), KeyPoint::new(70.0, 5.0, 3.0)];

        let task = SampleTask::new(&img, &mask, SampleParameter::new(2.0, 36.0));
        let set = task.compute(&capability, &provided).unwrap();

        assert_eq!(set.keypoints.len(), 2);
        assert_eq!(set.descriptors.rows(), 2);
        assert!((set.keypoints[0].x - 20.0).abs() < 1e-3);
        assert!((set.keypoints[0].y - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_separate_and_combined_agree() {
        let img = spot_image();
        let mask = full_mask(80, 60);
        let combined = Capability::combined(Intensity);
        let separate = Capability::Separate {
            detector: Arc::new(Brightest),
            extractor: Arc::new(Intensity),
        };
        let task = SampleTask::new(&img, &mask, SampleParameter::new(2f64.sqrt(), 0.0));

        let a = task.detect_and_compute(&combined).unwrap();
        let b = task.detect_and_compute(&separate).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.descriptors.rows(), a.keypoints.len());
    }

    #[test]
    fn test_detect_and_compute_requires_extractor() {
        let img = spot_image();
        let mask = full_mask(80, 60);
        let capability = Capability::Detector(Arc::new(Brightest));
        let task = SampleTask::new(&img, &mask, SampleParameter::IDENTITY);
        assert!(matches!(
            task.detect_and_compute(&capability),
            Err(Error::MissingCapability(_))
        ));
    }
}
