//! Matching a query feature set against a reference one.
//!
//! The match is a funnel: k-NN candidates, ratio test, minimum count gate,
//! robust homography, inlier count gate. A stage that comes up short ends
//! the funnel with an empty [`MatchResult`].

use std::sync::Arc;

use log::debug;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::{FeatureMatch, FeatureSet};
use crate::homography::{find_homography, RansacParams, MIN_POINTS};
use crate::index::{DescriptorIndex, IndexParams};
use crate::parallel::TaskRunner;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherParams {
    /// Lowe ratio: keep the best neighbour only if d1 <= ratio * d2
    pub ratio: f32,
    pub ransac: RansacParams,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            ratio: 0.75,
            ransac: RansacParams::default(),
        }
    }
}

/// Candidate counts at each stage of the funnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub raw_candidates: usize,
    pub ratio_survivors: usize,
    pub inliers: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Query plane to reference plane
    pub transform: Matrix3<f64>,
    /// Empty means no reliable registration
    pub inlier_matches: Vec<FeatureMatch>,
    pub stats: MatchStats,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self {
            transform: Matrix3::identity(),
            inlier_matches: Vec::new(),
            stats: MatchStats::default(),
        }
    }

    fn rejected(stats: MatchStats) -> Self {
        Self {
            stats,
            ..Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inlier_matches.is_empty()
    }
}

/// Reference feature set with its search index, built once and shared
/// read-only between concurrent queries
#[derive(Debug, Clone)]
pub struct ResultMatcher {
    reference: Arc<FeatureSet>,
    index: DescriptorIndex,
    params: MatcherParams,
}

impl ResultMatcher {
    pub fn new(
        reference: Arc<FeatureSet>,
        params: MatcherParams,
        index_params: &IndexParams,
    ) -> Result<Self> {
        reference.check_shape()?;
        let index = DescriptorIndex::build(&reference.descriptors, reference.norm_type, index_params)?;
        debug!(
            "indexed {} reference descriptors ({:?})",
            index.len(),
            reference.norm_type
        );
        Ok(Self {
            reference,
            index,
            params,
        })
    }

    pub fn reference(&self) -> &FeatureSet {
        &self.reference
    }

    pub fn params(&self) -> &MatcherParams {
        &self.params
    }

    /// `max(4, ceil(min_match_ratio * |reference|))`
    pub fn required_matches(&self, min_match_ratio: f64) -> usize {
        let scaled = (min_match_ratio.max(0.0) * self.reference.len() as f64).ceil() as usize;
        scaled.max(MIN_POINTS)
    }

    /// Register `query` onto the reference.
    ///
    /// Errors only when the query is malformed or its descriptors cannot be
    /// compared with the reference ones; every no-match outcome is an empty
    /// `Ok` result.
    pub fn match_features(&self, query: &FeatureSet, min_match_ratio: f64) -> Result<MatchResult> {
        query.check_shape()?;
        let required = self.required_matches(min_match_ratio);
        let mut stats = MatchStats::default();

        if self.reference.len() < MIN_POINTS || query.is_empty() {
            debug!(
                "skipping match: {} reference, {} query keypoints",
                self.reference.len(),
                query.len()
            );
            return Ok(MatchResult::rejected(stats));
        }

        let mut candidates = Vec::new();
        for query_idx in 0..query.descriptors.rows() {
            let neighbors = self.index.knn(query.descriptors.row(query_idx), 2)?;
            let Some(best) = neighbors.first() else {
                continue;
            };
            stats.raw_candidates += 1;
            let Some(second) = neighbors.get(1) else {
                continue;
            };
            if best.distance <= self.params.ratio * second.distance {
                candidates.push(FeatureMatch {
                    query_idx,
                    train_idx: best.index,
                    distance: best.distance,
                });
            }
        }
        stats.ratio_survivors = candidates.len();
        if candidates.len() < required {
            debug!(
                "ratio test left {} of {} candidates, need {}",
                candidates.len(),
                stats.raw_candidates,
                required
            );
            return Ok(MatchResult::rejected(stats));
        }

        let (src, dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = candidates
            .iter()
            .map(|m| {
                let q = &query.keypoints[m.query_idx];
                let r = &self.reference.keypoints[m.train_idx];
                ([q.x as f64, q.y as f64], [r.x as f64, r.y as f64])
            })
            .unzip();
        let Some(estimate) = find_homography(&src, &dst, &self.params.ransac) else {
            debug!("homography fit failed on {} candidates", candidates.len());
            return Ok(MatchResult::rejected(stats));
        };

        let inlier_matches: Vec<FeatureMatch> = candidates
            .into_iter()
            .zip(&estimate.inliers)
            .filter_map(|(m, &keep)| keep.then_some(m))
            .collect();
        stats.inliers = inlier_matches.len();
        debug!(
            "funnel: {} raw, {} after ratio test, {} inliers (need {}, {} iterations)",
            stats.raw_candidates,
            stats.ratio_survivors,
            stats.inliers,
            required,
            estimate.iterations
        );
        if inlier_matches.len() < required {
            return Ok(MatchResult::rejected(stats));
        }

        Ok(MatchResult {
            transform: estimate.matrix,
            inlier_matches,
            stats,
        })
    }
}

/// Match `query` against every reference concurrently.
///
/// `min_match_ratios` is either empty (0 for every reference) or has one
/// entry per matcher. A `None` matcher, or one whose match fails, yields an
/// empty result in its slot.
pub fn parallel_match(
    matchers: &[Option<Arc<ResultMatcher>>],
    query: &FeatureSet,
    min_match_ratios: &[f64],
    runner: &TaskRunner,
) -> Result<Vec<MatchResult>> {
    if !min_match_ratios.is_empty() && min_match_ratios.len() != matchers.len() {
        return Err(Error::RatioCount {
            expected: matchers.len(),
            got: min_match_ratios.len(),
        });
    }

    let outcomes = runner.run("match", matchers.len(), |i| match &matchers[i] {
        Some(matcher) => {
            let ratio = min_match_ratios.get(i).copied().unwrap_or(0.0);
            matcher.match_features(query, ratio)
        }
        None => Ok(MatchResult::empty()),
    });
    Ok(outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|_| MatchResult::empty()))
        .collect())
}
