//! Contracts towards the base feature algorithm.
//!
//! The orchestrator never knows which algorithm sits behind a
//! [`Capability`]; it only asks it to detect, compute, or do both.

use std::fmt;
use std::sync::Arc;

use image::GrayImage;

use crate::error::{Error, Result};
use crate::features::{DescriptorLayout, Descriptors, KeyPoint, NormType};

/// Finds keypoints inside the valid (non-zero) region of `mask`
pub trait Detector: Send + Sync {
    fn detect(&self, image: &GrayImage, mask: &GrayImage) -> Result<Vec<KeyPoint>>;
}

/// Describes keypoints.
///
/// Returns the keypoints actually described (an extractor may refine or
/// drop some) together with one descriptor row per returned keypoint, in
/// the same order.
pub trait Extractor: Send + Sync {
    fn layout(&self) -> DescriptorLayout;

    fn default_norm(&self) -> NormType;

    fn compute(
        &self,
        image: &GrayImage,
        keypoints: Vec<KeyPoint>,
    ) -> Result<(Vec<KeyPoint>, Descriptors)>;
}

/// One algorithm doing both jobs, possibly sharing work between them
pub trait Feature2D: Detector + Extractor {
    fn detect_and_compute(
        &self,
        image: &GrayImage,
        mask: &GrayImage,
    ) -> Result<(Vec<KeyPoint>, Descriptors)> {
        let keypoints = self.detect(image, mask)?;
        self.compute(image, keypoints)
    }
}

/// What the configured base algorithm can do.
///
/// `Combined` runs one detect-and-compute pass per sample; `Separate` runs
/// its detector and extractor one after the other.
#[derive(Clone)]
pub enum Capability {
    Detector(Arc<dyn Detector>),
    Extractor(Arc<dyn Extractor>),
    Combined(Arc<dyn Feature2D>),
    Separate {
        detector: Arc<dyn Detector>,
        extractor: Arc<dyn Extractor>,
    },
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Detector(_) => "Detector",
            Capability::Extractor(_) => "Extractor",
            Capability::Combined(_) => "Combined",
            Capability::Separate { .. } => "Separate",
        };
        f.write_str(name)
    }
}

impl Capability {
    pub fn combined<F: Feature2D + 'static>(feature: F) -> Self {
        Capability::Combined(Arc::new(feature))
    }

    pub fn can_detect(&self) -> bool {
        !matches!(self, Capability::Extractor(_))
    }

    pub fn can_compute(&self) -> bool {
        !matches!(self, Capability::Detector(_))
    }

    pub fn detect(&self, image: &GrayImage, mask: &GrayImage) -> Result<Vec<KeyPoint>> {
        match self {
            Capability::Detector(d) => d.detect(image, mask),
            Capability::Combined(f) => f.detect(image, mask),
            Capability::Separate { detector, .. } => detector.detect(image, mask),
            Capability::Extractor(_) => Err(Error::MissingCapability("detector")),
        }
    }

    pub fn compute(
        &self,
        image: &GrayImage,
        keypoints: Vec<KeyPoint>,
    ) -> Result<(Vec<KeyPoint>, Descriptors)> {
        match self {
            Capability::Extractor(e) => e.compute(image, keypoints),
            Capability::Combined(f) => f.compute(image, keypoints),
            Capability::Separate { extractor, .. } => extractor.compute(image, keypoints),
            Capability::Detector(_) => Err(Error::MissingCapability("extractor")),
        }
    }

    pub fn detect_and_compute(
        &self,
        image: &GrayImage,
        mask: &GrayImage,
    ) -> Result<(Vec<KeyPoint>, Descriptors)> {
        match self {
            Capability::Combined(f) => f.detect_and_compute(image, mask),
            Capability::Separate {
                detector,
                extractor,
            } => {
                let keypoints = detector.detect(image, mask)?;
                extractor.compute(image, keypoints)
            }
            Capability::Detector(_) => Err(Error::MissingCapability("extractor")),
            Capability::Extractor(_) => Err(Error::MissingCapability("detector")),
        }
    }

    /// Descriptor layout and norm of the extractor side
    pub fn descriptor_info(&self) -> Result<(DescriptorLayout, NormType)> {
        match self {
            Capability::Extractor(e) => Ok((e.layout(), e.default_norm())),
            Capability::Combined(f) => Ok((f.layout(), f.default_norm())),
            Capability::Separate { extractor, .. } => {
                Ok((extractor.layout(), extractor.default_norm()))
            }
            Capability::Detector(_) => Err(Error::MissingCapability("extractor")),
        }
    }
}
