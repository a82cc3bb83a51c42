//! Affine-invariant wrapper around a base feature algorithm.
//!
//! Every call simulates the full set of views produced by the sampling
//! policy, runs the base algorithm on each view in parallel and merges the
//! per-view results in sample order.

use image::GrayImage;
use log::info;

use crate::capability::Capability;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::features::{FeatureSet, KeyPoint};
use crate::parallel::{TaskOutcome, TaskRunner};
use crate::sampling::SamplingPolicy;
use crate::target::TargetData;
use crate::task::SampleTask;
use crate::transform::full_mask;

#[derive(Debug, Clone)]
pub struct AffineInvariantFeature {
    capability: Capability,
    policy: SamplingPolicy,
    runner: TaskRunner,
}

impl AffineInvariantFeature {
    /// Wrap `capability` with the reference sampling policy
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            policy: SamplingPolicy::default(),
            runner: TaskRunner::default(),
        }
    }

    pub fn with_config(capability: Capability, config: &PipelineConfig) -> Result<Self> {
        config.sampling.validate()?;
        Ok(Self {
            capability,
            policy: config.sampling,
            runner: TaskRunner::new(&config.parallel)?,
        })
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// Keypoints of every simulated view, indexed like the sample parameters.
    /// A view whose detector failed has no keypoints.
    pub fn detect_samples(&self, target: &TargetData) -> Result<Vec<Vec<KeyPoint>>> {
        if !self.capability.can_detect() {
            return Err(Error::MissingCapability("detector"));
        }
        target.check_mask()?;
        let mask = target.validity_mask();
        let params = self.policy.parameters();

        let outcomes = self.runner.run("detect", params.len(), |i| {
            SampleTask::new(&target.image, &mask, params[i]).detect(&self.capability)
        });
        Ok(outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_default())
            .collect())
    }

    pub fn detect(&self, target: &TargetData) -> Result<Vec<KeyPoint>> {
        let keypoints: Vec<KeyPoint> = self.detect_samples(target)?.concat();
        info!("detect: {} keypoints", keypoints.len());
        Ok(keypoints)
    }

    /// Descriptors of `keypoints` (source coordinates) in every simulated view
    pub fn compute_samples(&self, image: &GrayImage, keypoints: &[KeyPoint]) -> Result<Vec<FeatureSet>> {
        let (layout, norm) = self.capability.descriptor_info()?;
        let mask = full_mask(image.width(), image.height());
        let params = self.policy.parameters();

        let outcomes = self.runner.run("compute", params.len(), |i| {
            SampleTask::new(image, &mask, params[i]).compute(&self.capability, keypoints)
        });
        Ok(fold_failures(outcomes, || FeatureSet::empty(layout, norm)))
    }

    pub fn compute(&self, image: &GrayImage, keypoints: &[KeyPoint]) -> Result<FeatureSet> {
        let samples = self.compute_samples(image, keypoints)?;
        self.merge(&samples)
    }

    /// Detected and described features of every simulated view
    pub fn detect_and_compute_samples(&self, target: &TargetData) -> Result<Vec<FeatureSet>> {
        if !self.capability.can_detect() {
            return Err(Error::MissingCapability("detector"));
        }
        let (layout, norm) = self.capability.descriptor_info()?;
        target.check_mask()?;
        let mask = target.validity_mask();
        let params = self.policy.parameters();

        let outcomes = self.runner.run("detect_and_compute", params.len(), |i| {
            SampleTask::new(&target.image, &mask, params[i]).detect_and_compute(&self.capability)
        });
        Ok(fold_failures(outcomes, || FeatureSet::empty(layout, norm)))
    }

    pub fn detect_and_compute(&self, target: &TargetData) -> Result<FeatureSet> {
        let samples = self.detect_and_compute_samples(target)?;
        self.merge(&samples)
    }

    fn merge(&self, samples: &[FeatureSet]) -> Result<FeatureSet> {
        let (layout, norm) = self.capability.descriptor_info()?;
        let merged = FeatureSet::concat(layout, norm, samples)?;
        info!(
            "merged {} samples into {} features",
            samples.len(),
            merged.len()
        );
        Ok(merged)
    }
}

fn fold_failures<T>(outcomes: Vec<TaskOutcome<T>>, empty: impl Fn() -> T) -> Vec<T> {
    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|_| empty()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Detector;
    use image::Luma;
    use std::sync::Arc;

    /// Reports the centre of every view
    struct Centre;

    impl Detector for Centre {
        fn detect(&self, image: &GrayImage, _mask: &GrayImage) -> Result<Vec<KeyPoint>> {
            let (w, h) = image.dimensions();
            Ok(vec![KeyPoint::new(w as f32 / 2.0, h as f32 / 2.0, 1.0)])
        }
    }

    #[test]
    fn test_detect_covers_every_sample() {
        let target = TargetData::new(GrayImage::from_pixel(40, 30, Luma([128])));
        let feature = AffineInvariantFeature::new(Capability::Detector(Arc::new(Centre)));

        let samples = feature.detect_samples(&target).unwrap();
        assert_eq!(samples.len(), feature.policy().sample_count());
        assert!(samples.iter().all(|s| s.len() == 1));
        assert_eq!(feature.detect(&target).unwrap().len(), samples.len());
    }

    #[test]
    fn test_missing_detector_is_fatal() {
        let target = TargetData::new(GrayImage::new(10, 10));
        let feature = AffineInvariantFeature::new(Capability::Detector(Arc::new(Centre)));
        assert!(matches!(
            feature.detect_and_compute(&target),
            Err(Error::MissingCapability("extractor"))
        ));
    }

    #[test]
    fn test_mask_size_mismatch_is_fatal() {
        let target = TargetData::new(GrayImage::new(10, 10)).with_mask(GrayImage::new(5, 5));
        let feature = AffineInvariantFeature::new(Capability::Detector(Arc::new(Centre)));
        assert!(matches!(
            feature.detect(&target),
            Err(Error::MaskSize { .. })
        ));
    }

    #[test]
    fn test_unbounded_sampling_is_rejected_up_front() {
        let mut config = PipelineConfig::default();
        config.sampling.base_phi_step = 0.0;
        let capability = Capability::Detector(Arc::new(Centre));
        assert!(matches!(
            AffineInvariantFeature::with_config(capability, &config),
            Err(Error::InvalidSampling(_))
        ));
    }
}
