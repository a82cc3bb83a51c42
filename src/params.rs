use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::detection::{BriefParams, FastBrief, FastParams, FastPatch, PatchParams};

/// Configuration of a base feature algorithm, stored alongside its results
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureParameters {
    FastPatch {
        #[serde(default)]
        fast: FastParams,
        #[serde(default)]
        patch: PatchParams,
    },
    FastBrief {
        #[serde(default)]
        fast: FastParams,
        #[serde(default)]
        brief: BriefParams,
    },
}

impl FeatureParameters {
    /// Tags accepted by [`FeatureParameters::from_kind`]
    pub fn kinds() -> &'static [&'static str] {
        &["fast_patch", "fast_brief"]
    }

    /// Default parameters for a kind tag
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "fast_patch" => Some(FeatureParameters::FastPatch {
                fast: FastParams::default(),
                patch: PatchParams::default(),
            }),
            "fast_brief" => Some(FeatureParameters::FastBrief {
                fast: FastParams::default(),
                brief: BriefParams::default(),
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeatureParameters::FastPatch { .. } => "fast_patch",
            FeatureParameters::FastBrief { .. } => "fast_brief",
        }
    }

    pub fn create_feature(&self) -> Capability {
        match *self {
            FeatureParameters::FastPatch { fast, patch } => {
                Capability::combined(FastPatch::new(fast, patch))
            }
            FeatureParameters::FastBrief { fast, brief } => {
                Capability::combined(FastBrief::new(fast, brief))
            }
        }
    }
}
