//! Discretisation of the affine view space.
//!
//! Every simulated view is a rotation by `phi` followed by a horizontal
//! compression by `tilt`. Higher tilts compress more orientations into the
//! same appearance, so the angular step shrinks as `base_step / tilt`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest accepted `tilt_steps`; tilt 2^5 = 32 already flattens a view to a
/// few columns
pub const MAX_TILT_STEPS: u32 = 10;

/// One point of the simulated view space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleParameter {
    /// Compression factor along x, >= 1
    pub tilt: f64,
    /// In-plane rotation in degrees, in [0, 180)
    pub phi: f64,
}

impl SampleParameter {
    pub const IDENTITY: SampleParameter = SampleParameter { tilt: 1.0, phi: 0.0 };

    pub fn new(tilt: f64, phi: f64) -> Self {
        Self { tilt, phi }
    }

    pub fn is_identity(&self) -> bool {
        self.tilt == 1.0 && self.phi == 0.0
    }
}

/// Policy generating the ordered list of sample parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingPolicy {
    /// Number of tilts after the identity; tilt i is 2^(i/2)
    pub tilt_steps: u32,
    /// Angular step in degrees at tilt 1
    pub base_phi_step: f64,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            tilt_steps: 5,
            base_phi_step: 72.0,
        }
    }
}

impl SamplingPolicy {
    /// Fails on a policy whose sample list would be unbounded
    pub fn validate(&self) -> Result<()> {
        if !(self.base_phi_step.is_finite() && self.base_phi_step > 0.0) {
            return Err(Error::InvalidSampling(format!(
                "base_phi_step must be positive and finite, got {}",
                self.base_phi_step
            )));
        }
        if self.tilt_steps > MAX_TILT_STEPS {
            return Err(Error::InvalidSampling(format!(
                "tilt_steps must be at most {}, got {}",
                MAX_TILT_STEPS, self.tilt_steps
            )));
        }
        Ok(())
    }

    /// Identity first, then every (tilt, phi) pair in ascending tilt and phi.
    /// The policy must pass [`SamplingPolicy::validate`].
    pub fn parameters(&self) -> Vec<SampleParameter> {
        let mut params = vec![SampleParameter::IDENTITY];
        for i in 1..=self.tilt_steps {
            let tilt = 2f64.powf(0.5 * i as f64);
            let step = self.base_phi_step / tilt;
            params.extend(
                (0u32..)
                    .map(|k| k as f64 * step)
                    .take_while(|&phi| phi < 180.0)
                    .map(|phi| SampleParameter::new(tilt, phi)),
            );
        }
        params
    }

    /// Closed-form length of [`SamplingPolicy::parameters`]
    pub fn sample_count(&self) -> usize {
        1 + (1..=self.tilt_steps)
            .map(|i| {
                let tilt = 2f64.powf(0.5 * i as f64);
                (180.0 * tilt / self.base_phi_step).ceil() as usize
            })
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_policy_count() {
        let policy = SamplingPolicy::default();
        let params = policy.parameters();
        assert_eq!(params.len(), 43);
        assert_eq!(params.len(), policy.sample_count());
    }

    #[test]
    fn test_identity_first_and_deterministic() {
        let policy = SamplingPolicy::default();
        let first = policy.parameters();
        assert!(first[0].is_identity());
        assert_eq!(first, policy.parameters());
    }

    #[test]
    fn test_parameters_in_range() {
        for p in SamplingPolicy::default().parameters() {
            assert!(p.tilt >= 1.0);
            assert!((0.0..180.0).contains(&p.phi));
        }
    }

    #[test]
    fn test_per_tilt_counts() {
        let params = SamplingPolicy::default().parameters();
        let count = |tilt: f64| {
            params
                .iter()
                .filter(|p| (p.tilt - tilt).abs() < 1e-9)
                .count()
        };
        assert_eq!(count(2f64.sqrt()), 4);
        assert_eq!(count(2.0), 5);
        assert_eq!(count(4.0), 10);
        assert_eq!(count(4.0 * 2f64.sqrt()), 15);
    }

    #[test]
    fn test_zero_tilt_steps_is_identity_only() {
        let policy = SamplingPolicy {
            tilt_steps: 0,
            ..Default::default()
        };
        assert_eq!(policy.parameters(), vec![SampleParameter::IDENTITY]);
        assert_eq!(policy.sample_count(), 1);
    }

    #[test]
    fn test_unbounded_policies_are_rejected() {
        for step in [0.0, -72.0, f64::NAN, f64::INFINITY] {
            let policy = SamplingPolicy {
                base_phi_step: step,
                ..Default::default()
            };
            assert!(matches!(policy.validate(), Err(Error::InvalidSampling(_))), "{}", step);
        }
        let policy = SamplingPolicy {
            tilt_steps: MAX_TILT_STEPS + 1,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(SamplingPolicy::default().validate().is_ok());
    }
}
