//! The Sequential Probability Ratio Test evaluator.
//!
//! Streams a candidate homography's transfer error across correspondences,
//! multiplying a running likelihood ratio by `lambdaAccept`/`lambdaReject`
//! per tested point, and aborts as soon as the ratio exceeds the decision
//! threshold `A`. Generalizes the classic `asprt` formulation (Algorithm 1
//! of Matas & Chum, "Randomized RANSAC with Sequential Probability Ratio
//! Test") into explicit, adaptively-recomputed state.

use crate::homography::Homography;
use crate::types::Point2f;

/// Relative change in `delta` past which the decision threshold `A` is
/// recomputed.
const DELTA_RECOMPUTE_REL_TOL: f64 = 0.05;

pub struct Sprt {
    /// Average time to compute one model hypothesis, relative to the time
    /// to test one correspondence; used in Wald's `A` formula.
    pub t_m: f64,
    /// Average number of correspondences tested per model before a
    /// decision (accept or reject) is reached.
    pub m_s: f64,
    /// Current estimate of the inlier ratio under a "good" model.
    pub epsilon: f64,
    /// Current estimate of the inlier ratio under a "bad" (random) model.
    pub delta: f64,
    /// Decision threshold: reject once the running likelihood ratio
    /// exceeds this value.
    pub a: f64,
    /// Correspondences actually tested for the *current* model.
    pub n_tested: u32,
    /// Correspondences tested across the lifetime of the estimate call.
    pub n_tested_total: u32,
    lambda_accept: f64,
    lambda_reject: f64,
    last_delta_for_a: f64,
}

/// Outcome of streaming one candidate model through SPRT.
pub struct SprtOutcome {
    /// `true` if the model survived the full pass ("good").
    pub accepted: bool,
    /// Number of correspondences actually tested (== N if accepted, less
    /// if rejected early).
    pub tested: usize,
    /// Inlier count over the tested prefix.
    pub inliers: usize,
    /// Sum of squared transfer errors over the inliers found, used for the
    /// deterministic best-model tie-break.
    pub inlier_sum_sq: f64,
}

impl Sprt {
    pub fn new(initial_epsilon: f64, initial_delta: f64) -> Self {
        let mut sprt = Self {
            t_m: 1.0,
            m_s: 1.0,
            epsilon: initial_epsilon,
            delta: initial_delta,
            a: 1.0,
            n_tested: 0,
            n_tested_total: 0,
            lambda_accept: 1.0,
            lambda_reject: 1.0,
            last_delta_for_a: initial_delta,
        };
        sprt.recompute_lambdas();
        sprt.recompute_a();
        sprt
    }

    fn recompute_lambdas(&mut self) {
        // Per-tested-point likelihood-ratio multipliers:
        // lambdaAccept = delta/epsilon (applied on inlier observation),
        // lambdaReject = (1-delta)/(1-epsilon) (applied on outlier).
        self.lambda_accept = self.delta / self.epsilon;
        self.lambda_reject = (1.0 - self.delta) / (1.0 - self.epsilon);
    }

    /// Wald's SPRT decision threshold `A`, recomputed from `t_M`, `m_S`,
    /// `epsilon`, and `delta`. `c` is the expected per-test log-likelihood
    /// divergence between the "good" and "bad" hypotheses; scaling it by
    /// `t_M`/`m_S` approximates the closed-form bound the SPRT-RANSAC
    /// derivation (Matas & Chum, 2005) converges to.
    fn recompute_a(&mut self) {
        let c = self.delta * (self.delta / self.epsilon).ln()
            + (1.0 - self.delta) * ((1.0 - self.delta) / (1.0 - self.epsilon)).ln();
        let a = if c.is_finite() && c.abs() > 1e-12 {
            1.0 + self.t_m * c.abs() * self.m_s
        } else {
            1.0 + self.t_m / self.m_s
        };
        self.a = a.max(1.0);
        self.last_delta_for_a = self.delta;
    }

    fn maybe_recompute_a(&mut self, new_best: bool) {
        let rel_change = if self.last_delta_for_a.abs() > 1e-15 {
            (self.delta - self.last_delta_for_a).abs() / self.last_delta_for_a.abs()
        } else {
            f64::INFINITY
        };
        if new_best || rel_change > DELTA_RECOMPUTE_REL_TOL {
            self.recompute_lambdas();
            self.recompute_a();
        }
    }

    /// Streams `h` against every correspondence, aborting as soon as the
    /// likelihood ratio crosses `A`. Updates `delta` from the observed
    /// prefix and recomputes `A` when it has drifted. Does not know
    /// whether `h` will become the new best - call
    /// [`Sprt::register_new_best`] afterward if it does.
    pub fn evaluate(
        &mut self,
        h: &Homography,
        src: &[Point2f],
        dst: &[Point2f],
        max_d_sq: f32,
    ) -> SprtOutcome {
        let mut ratio = 1.0f64;
        let mut inliers = 0usize;
        let mut inlier_sum_sq = 0.0f64;
        let mut tested = 0usize;
        let mut accepted = true;

        for i in 0..src.len() {
            let err = h.transfer_error_sq(src[i], dst[i]);
            tested += 1;
            if err <= max_d_sq {
                inliers += 1;
                inlier_sum_sq += f64::from(err);
                ratio *= self.lambda_accept;
            } else {
                ratio *= self.lambda_reject;
            }
            if ratio > self.a || !ratio.is_finite() {
                accepted = false;
                break;
            }
        }

        self.n_tested = tested as u32;
        self.n_tested_total += tested as u32;

        // Update delta from the tested prefix: the observed inlier rate on
        // a rejected/marginal model is evidence about the "bad model"
        // inlier ratio.
        if tested > 0 {
            let observed = inliers as f64 / tested as f64;
            // Exponential smoothing keeps delta responsive without letting
            // one noisy hypothesis dominate the running estimate.
            self.delta = 0.9 * self.delta + 0.1 * observed;
            self.delta = self.delta.clamp(1e-6, 1.0 - 1e-6);
        }
        self.maybe_recompute_a(false);

        SprtOutcome {
            accepted,
            tested,
            inliers,
            inlier_sum_sq,
        }
    }

    /// Called by the driver when a model just evaluated by [`Sprt::evaluate`]
    /// becomes the new best-so-far: raises `epsilon` toward the observed
    /// inlier ratio and forces an `A` recomputation.
    pub fn register_new_best(&mut self, outcome: &SprtOutcome) {
        let observed_epsilon = outcome.inliers as f64 / outcome.tested.max(1) as f64;
        if observed_epsilon > self.epsilon {
            self.epsilon = observed_epsilon.min(1.0 - 1e-6);
        }
        self.maybe_recompute_a(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_model_is_rejected_before_full_pass() {
        let mut sprt = Sprt::new(0.5, 0.05);
        let h = Homography::IDENTITY;
        let src: Vec<Point2f> = (0..200).map(|i| Point2f::new(i as f32, 0.0)).collect();
        // Destination points are all far away: every correspondence is an
        // outlier under the identity, so SPRT should reject well before
        // testing all 200.
        let dst: Vec<Point2f> = (0..200).map(|i| Point2f::new(i as f32 + 100.0, 100.0)).collect();
        let outcome = sprt.evaluate(&h, &src, &dst, 1.0);
        assert!(!outcome.accepted);
        assert!(outcome.tested < 200);
    }

    #[test]
    fn good_model_is_accepted_after_full_pass() {
        let mut sprt = Sprt::new(0.5, 0.05);
        let h = Homography::IDENTITY;
        let pts: Vec<Point2f> = (0..50).map(|i| Point2f::new(i as f32, 0.0)).collect();
        let outcome = sprt.evaluate(&h, &pts, &pts, 1e-3);
        sprt.register_new_best(&outcome);
        assert!(outcome.accepted);
        assert_eq!(outcome.tested, 50);
        assert_eq!(outcome.inliers, 50);
    }

    #[test]
    fn ntested_reflects_actual_samples_examined() {
        let mut sprt = Sprt::new(0.5, 0.01);
        let h = Homography::IDENTITY;
        let src: Vec<Point2f> = (0..500).map(|i| Point2f::new(i as f32, 0.0)).collect();
        let dst: Vec<Point2f> = (0..500).map(|i| Point2f::new(i as f32 + 1000.0, 1000.0)).collect();
        let outcome = sprt.evaluate(&h, &src, &dst, 1.0);
        assert_eq!(sprt.n_tested as usize, outcome.tested);
        assert!(sprt.n_tested_total as usize >= outcome.tested);
    }
}
