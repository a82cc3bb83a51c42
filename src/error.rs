//! Error types for the affine feature pipeline

use thiserror::Error;

use crate::features::NormType;

/// Library error type.
///
/// Everything here is either a configuration-level misuse (the call is
/// aborted before any work is scheduled) or a failure inside a single
/// sample/reference task, which the orchestrators catch and fold into an
/// empty slot.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing capability: {0}")]
    MissingCapability(&'static str),

    #[error("Unsupported norm {0:?} for descriptor index")]
    UnsupportedNorm(NormType),

    #[error("Norm {norm:?} cannot be used with {kind} descriptors")]
    NormMismatch { norm: NormType, kind: &'static str },

    #[error("Descriptor layout mismatch: expected {expected}, got {got}")]
    DescriptorLayout { expected: String, got: String },

    #[error("Descriptor rows ({rows}) do not match keypoint count ({keypoints})")]
    RowCount { rows: usize, keypoints: usize },

    #[error("Descriptor data of length {len} is not a whole number of {cols}-wide rows")]
    RaggedDescriptors { len: usize, cols: usize },

    #[error("Mask size {mask:?} does not match image size {image:?}")]
    MaskSize { mask: (u32, u32), image: (u32, u32) },

    #[error("Invalid sampling policy: {0}")]
    InvalidSampling(String),

    #[error("Expected {expected} match ratios, got {got}")]
    RatioCount { expected: usize, got: usize },

    #[error("Feature backend error: {0}")]
    Backend(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
