pub mod capability;
pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod feature;
pub mod features;
pub mod geometry;
pub mod homography;
pub mod index;
pub mod matcher;
pub mod parallel;
pub mod params;
pub mod sampling;
pub mod storage;
pub mod target;
pub mod task;
pub mod transform;
pub mod visualize;

pub use capability::{Capability, Detector, Extractor, Feature2D};
pub use config::{load_config, PipelineConfig};
pub use error::{Error, Result};
pub use feature::AffineInvariantFeature;
pub use features::{DescriptorKind, DescriptorLayout, Descriptors, FeatureMatch, FeatureSet, KeyPoint, NormType};
pub use geometry::{build_forward, AffineMap, SampleWarp};
pub use matcher::{parallel_match, MatchResult, MatchStats, MatcherParams, ResultMatcher};
pub use parallel::{ParallelConfig, TaskRunner};
pub use params::FeatureParameters;
pub use sampling::{SampleParameter, SamplingPolicy};
pub use storage::{Record, RecordFile};
pub use target::{TargetData, TargetDescription};
pub use visualize::{draw_matches, shade_outside_mask};
