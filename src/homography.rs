//! Robust planar homography estimation.
//!
//! Normalised DLT for the model fit, seeded RANSAC around it so the same
//! correspondences always give the same answer.

use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-12;

/// Minimal sample size for a homography
pub const MIN_POINTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum reprojection error of an inlier, in pixels
    pub threshold: f64,
    pub max_iterations: usize,
    /// Stop once a model this likely to be outlier-free has been sampled
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomographyEstimate {
    /// Maps source points onto destination points, normalised so h33 = 1
    pub matrix: Matrix3<f64>,
    /// One flag per correspondence
    pub inliers: Vec<bool>,
    pub iterations: usize,
}

impl HomographyEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }
}

/// Apply `h` to a point; `None` if it lands at infinity
pub fn project(h: &Matrix3<f64>, p: [f64; 2]) -> Option<[f64; 2]> {
    let v = h * Vector3::new(p[0], p[1], 1.0);
    let w = v[2];
    if !w.is_finite() || w.abs() <= EPS {
        return None;
    }
    Some([v[0] / w, v[1] / w])
}

fn reprojection_error(h: &Matrix3<f64>, src: [f64; 2], dst: [f64; 2]) -> f64 {
    match project(h, src) {
        Some(p) => ((p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2)).sqrt(),
        None => f64::INFINITY,
    }
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2)
fn normalization(points: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean <= EPS {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Least-squares homography through all correspondences (at least four)
pub fn fit_homography(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    if src.len() != dst.len() || src.len() < MIN_POINTS {
        return None;
    }
    let t_src = normalization(src)?;
    let t_dst = normalization(dst)?;

    // Pad to 9 rows so the SVD always exposes the full right null space
    let mut a = DMatrix::<f64>::zeros((2 * src.len()).max(9), 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let p = t_src * Vector3::new(s[0], s[1], 1.0);
        let q = t_dst * Vector3::new(d[0], d[1], 1.0);
        let (x, y, u, v) = (p[0], p[1], q[0], q[1]);
        let r = 2 * i;
        a.row_mut(r)
            .copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        a.row_mut(r + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = v_t.row(smallest);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let h = t_dst.try_inverse()? * hn * t_src;
    let scale = h[(2, 2)];
    if !scale.is_finite() || scale.abs() <= EPS {
        return None;
    }
    let h = h / scale;
    h.iter().all(|v| v.is_finite()).then_some(h)
}

fn collinear(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> bool {
    let (ux, uy) = (b[0] - a[0], b[1] - a[1]);
    let (vx, vy) = (c[0] - a[0], c[1] - a[1]);
    let cross = (ux * vy - uy * vx).abs();
    let norms = (ux.hypot(uy) * vx.hypot(vy)).max(EPS);
    cross <= 1e-6 * norms
}

fn degenerate(points: &[[f64; 2]]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                if collinear(points[i], points[j], points[k]) {
                    return true;
                }
            }
        }
    }
    false
}

fn score(h: &Matrix3<f64>, src: &[[f64; 2]], dst: &[[f64; 2]], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| reprojection_error(h, s, d) <= threshold)
        .collect()
}

fn required_iterations(inlier_ratio: f64, confidence: f64, cap: usize) -> usize {
    let good = inlier_ratio.powi(MIN_POINTS as i32);
    if good >= 1.0 - EPS {
        return 1;
    }
    if good <= EPS {
        return cap;
    }
    let needed = (1.0 - confidence).ln() / (1.0 - good).ln();
    if needed.is_finite() {
        (needed.ceil() as usize).clamp(1, cap)
    } else {
        cap
    }
}

/// Homography from `src` to `dst` with the largest consensus set.
///
/// Returns `None` with fewer than four correspondences, when every sample is
/// degenerate, or when no model gathers four inliers.
pub fn find_homography(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    params: &RansacParams,
) -> Option<HomographyEstimate> {
    let n = src.len();
    if n != dst.len() || n < MIN_POINTS {
        return None;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut budget = params.max_iterations.max(1);
    let mut iterations = 0;

    while iterations < budget {
        iterations += 1;
        let picked = sample(&mut rng, n, MIN_POINTS).into_vec();
        let s: Vec<[f64; 2]> = picked.iter().map(|&i| src[i]).collect();
        let d: Vec<[f64; 2]> = picked.iter().map(|&i| dst[i]).collect();
        if degenerate(&s) || degenerate(&d) {
            continue;
        }
        let Some(h) = fit_homography(&s, &d) else {
            continue;
        };

        let inliers = score(&h, src, dst, params.threshold);
        let count = inliers.iter().filter(|&&b| b).count();
        if best.as_ref().map_or(true, |(_, _, c)| count > *c) {
            budget = required_iterations(
                count as f64 / n as f64,
                params.confidence,
                params.max_iterations.max(1),
            )
            .max(iterations);
            best = Some((h, inliers, count));
        }
    }

    let (mut matrix, mut inliers, count) = best?;
    if count < MIN_POINTS {
        return None;
    }

    // Refit on the consensus set; keep it only if it holds on to the inliers
    let (s, d): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&inliers)
        .filter(|(_, &keep)| keep)
        .map(|((&s, &d), _)| (s, d))
        .unzip();
    if let Some(refined) = fit_homography(&s, &d) {
        let refined_inliers = score(&refined, src, dst, params.threshold);
        if refined_inliers.iter().filter(|&&b| b).count() >= count {
            matrix = refined;
            inliers = refined_inliers;
        }
    }

    Some(HomographyEstimate {
        matrix,
        inliers,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn grid() -> Vec<[f64; 2]> {
        let mut pts = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                pts.push([10.0 + 23.0 * i as f64 + j as f64, 15.0 + 19.0 * j as f64]);
            }
        }
        pts
    }

    fn assert_close(a: &Matrix3<f64>, b: &Matrix3<f64>, tol: f64) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{} vs {}\n{}\n{}", x, y, a, b);
        }
    }

    #[test]
    fn test_fit_exact_projective() {
        let truth = Matrix3::new(1.1, 0.05, 12.0, -0.03, 0.95, -7.0, 1e-4, -2e-4, 1.0);
        let src = grid();
        let dst: Vec<_> = src.iter().map(|&p| project(&truth, p).unwrap()).collect();
        let h = fit_homography(&src, &dst).unwrap();
        assert_close(&h, &truth, 1e-6);
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let truth = Matrix3::new(1.0, 0.0, 10.0, 0.0, 1.0, -5.0, 0.0, 0.0, 1.0);
        let src = grid();
        let mut dst: Vec<_> = src.iter().map(|&p| project(&truth, p).unwrap()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let outliers = [1usize, 7, 12, 20, 28];
        for &i in &outliers {
            dst[i] = [rng.gen_range(0.0..300.0), rng.gen_range(0.0..300.0)];
            // Make sure the corruption really is an outlier
            if reprojection_error(&truth, src[i], dst[i]) < 20.0 {
                dst[i][0] += 50.0;
            }
        }

        let est = find_homography(&src, &dst, &RansacParams::default()).unwrap();
        assert_close(&est.matrix, &truth, 1e-6);
        for (i, &flag) in est.inliers.iter().enumerate() {
            assert_eq!(flag, !outliers.contains(&i), "point {}", i);
        }
        assert_eq!(est.inlier_count(), src.len() - outliers.len());
    }

    #[test]
    fn test_same_seed_same_answer() {
        let src = grid();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let dst: Vec<_> = src
            .iter()
            .map(|p| [p[0] + rng.gen_range(-1.0..1.0), p[1] + rng.gen_range(-1.0..1.0)])
            .collect();
        let params = RansacParams::default();
        assert_eq!(
            find_homography(&src, &dst, &params),
            find_homography(&src, &dst, &params)
        );
    }

    #[test]
    fn test_too_few_points() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        assert!(find_homography(&pts, &pts, &RansacParams::default()).is_none());
    }

    #[test]
    fn test_collinear_points_are_degenerate() {
        let pts: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 2.0 * i as f64]).collect();
        assert!(find_homography(&pts, &pts, &RansacParams { max_iterations: 50, ..RansacParams::default() }).is_none());
    }
}
