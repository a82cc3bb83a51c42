use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::IndexParams;
use crate::matcher::MatcherParams;
use crate::parallel::ParallelConfig;
use crate::sampling::SamplingPolicy;

/// Tunables of the whole pipeline. Every field has a default, so a config
/// file only needs the values it changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling: SamplingPolicy,
    pub matcher: MatcherParams,
    pub index: IndexParams,
    pub parallel: ParallelConfig,
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let text = fs::read_to_string(path)?;
    let config: PipelineConfig = serde_json::from_str(&text)?;
    config.sampling.validate()?;
    Ok(config)
}
