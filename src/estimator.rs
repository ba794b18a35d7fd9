//! The estimator driver: orchestrates sampling, scoring, refinement, and
//! termination into the single `estimate` entry point.

use log::{debug, trace};
use rand_core::RngCore;

use crate::error::EstimatorError;
use crate::flags::EstimatorFlags;
use crate::geometry::solve_minimal;
use crate::homography::{score_all, Homography};
use crate::lm::LmWorkspace;
use crate::prosac::Prosac;
use crate::sprt::Sprt;
use crate::types::Point2f;
use crate::workspace::Workspace;

/// Starting point for the SPRT "good"/"bad" model inlier-ratio estimates,
/// carried over from `arrsac`'s own defaults for the same algorithm family.
const INITIAL_EPSILON: f64 = 0.05;
const INITIAL_DELTA: f64 = 0.01;

/// Reads 4 interleaved (x, y) pairs back out of a packed scratch slice
/// (see [`Workspace::pack_points`]).
fn packed_to_points(packed: &[f32]) -> [Point2f; 4] {
    debug_assert_eq!(packed.len(), 8);
    [
        Point2f::new(packed[0], packed[1]),
        Point2f::new(packed[2], packed[3]),
        Point2f::new(packed[4], packed[5]),
        Point2f::new(packed[6], packed[7]),
    ]
}

/// Parameters for a single [`HomographyEstimator::estimate`] call.
#[derive(Debug, Clone, Copy)]
pub struct EstimateParams {
    max_d: f32,
    max_i: u32,
    r_convg: u32,
    cfd: f64,
    min_inl: usize,
    beta: f64,
    flags: EstimatorFlags,
}

impl EstimateParams {
    /// `max_d` is the only parameter without a universal sane default -
    /// 3.0 pixels works for many cases, but the right value is always
    /// dataset-specific.
    pub fn new(max_d: f32) -> Self {
        Self {
            max_d,
            max_i: 2000,
            r_convg: 2000,
            cfd: 0.995,
            min_inl: 4,
            beta: 0.35,
            flags: EstimatorFlags::NONE,
        }
    }

    pub fn max_i(self, max_i: u32) -> Self {
        Self { max_i, ..self }
    }

    pub fn r_convg(self, r_convg: u32) -> Self {
        Self { r_convg, ..self }
    }

    pub fn cfd(self, cfd: f64) -> Self {
        Self { cfd, ..self }
    }

    pub fn min_inl(self, min_inl: usize) -> Self {
        Self { min_inl, ..self }
    }

    pub fn beta(self, beta: f64) -> Self {
        Self { beta, ..self }
    }

    pub fn flags(self, flags: EstimatorFlags) -> Self {
        Self { flags, ..self }
    }
}

/// Result of a completed `estimate` call: the inlier count on success, zero
/// otherwise, with `homography` the zero matrix exactly when `inliers == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateOutcome {
    pub homography: Homography,
    pub inliers: usize,
    /// Number of hypotheses sampled before the loop terminated. Exposed so
    /// callers (and tests) can observe that `ENABLE_NR` shortens runs on
    /// data with strong non-random support.
    pub iterations: u32,
}

struct BestModel {
    h: Homography,
    mask: Vec<u8>,
    inliers: usize,
    sum_sq: f64,
}

impl BestModel {
    fn none(n: usize) -> Self {
        Self {
            h: Homography::ZERO,
            mask: vec![0u8; n],
            inliers: 0,
            sum_sq: f64::INFINITY,
        }
    }

    /// Strict-greater-inliers-wins, else strictly-smaller-sum-of-squared-
    /// error-wins tie-break.
    fn is_improved_by(&self, inliers: usize, sum_sq: f64) -> bool {
        inliers > self.inliers || (inliers == self.inliers && sum_sq < self.sum_sq)
    }

    fn update(&mut self, h: Homography, mask: &[u8], inliers: usize, sum_sq: f64) {
        self.h = h;
        self.mask.copy_from_slice(mask);
        self.inliers = inliers;
        self.sum_sq = sum_sq;
    }
}

/// The homography estimation context.
///
/// Generic over any `R: RngCore`; use [`crate::rng::seeded`] to build the
/// crate's default deterministic generator from a `u64` seed.
pub struct HomographyEstimator<R> {
    workspace: Workspace,
    lm: LmWorkspace,
    rng: R,
    mask_scratch: Vec<u8>,
    refine_scratch: Vec<u8>,
    sample_idx_usize: Vec<usize>,
}

impl<R: RngCore> HomographyEstimator<R> {
    pub fn new(rng: R) -> Self {
        let mut workspace = Workspace::new();
        workspace.init();
        Self {
            workspace,
            lm: LmWorkspace::new(),
            rng,
            sample_idx_usize: Vec::with_capacity(4),
            mask_scratch: Vec::new(),
            refine_scratch: Vec::new(),
        }
    }

    /// Ensures the non-randomness table can cover `n` correspondences at
    /// the given `beta`. Must be called (directly, or implicitly via
    /// `estimate`) before `ENABLE_NR` estimates on inputs larger than any
    /// previously seen `n`.
    pub fn ensure_nr_capacity(&mut self, n: usize, beta: f64, min_inl: usize) -> Result<(), EstimatorError> {
        if n > 0 && !(0.0..1.0).contains(&beta) {
            return Err(EstimatorError::InvalidBeta(beta));
        }
        self.workspace.ensure_nr_capacity(n, beta, min_inl.max(4));
        Ok(())
    }

    /// Runs one PROSAC/SPRT/LM homography estimation.
    pub fn estimate(
        &mut self,
        src: &[Point2f],
        dst: &[Point2f],
        mut mask: Option<&mut [u8]>,
        params: &EstimateParams,
        guess: Option<&Homography>,
    ) -> Result<EstimateOutcome, EstimatorError> {
        let n = src.len();
        if dst.len() != n {
            return Err(EstimatorError::MismatchedLengths(n, dst.len()));
        }
        if n < 4 {
            return Err(EstimatorError::TooFewCorrespondences(n));
        }
        if let Some(m) = mask.as_deref() {
            if m.len() != n {
                return Err(EstimatorError::MismatchedMaskLength(m.len(), n));
            }
        }
        if !(0.0..=1.0).contains(&params.cfd) {
            return Err(EstimatorError::InvalidConfidence(params.cfd));
        }
        if params.max_d < 0.0 {
            return Err(EstimatorError::NegativeMaxDistance(params.max_d));
        }
        if params.flags.enable_nr && !(0.0..1.0).contains(&params.beta) {
            return Err(EstimatorError::InvalidBeta(params.beta));
        }

        // minInl is clamped, never rejected.
        let min_inl = params.min_inl.max(4);
        let max_d_sq = params.max_d * params.max_d;

        if params.flags.enable_nr {
            self.workspace.ensure_nr_capacity(n, params.beta, min_inl);
        }

        self.mask_scratch.resize(n, 0);
        self.refine_scratch.resize(n, 0);

        let mut best = BestModel::none(n);

        // Seed best-so-far from the guess, if any and non-degenerate; a
        // zero guess is ignored.
        if let Some(g) = guess {
            if !g.is_zero() {
                let (inliers, sum_sq) = score_all(g, src, dst, max_d_sq, &mut self.mask_scratch);
                if inliers > 0 {
                    best.update(*g, &self.mask_scratch, inliers, sum_sq);
                }
            }
        }

        let mut prosac = Prosac::new(n, params.r_convg, params.cfd);
        let mut sprt = Sprt::new(INITIAL_EPSILON, INITIAL_DELTA);
        let mut sample_idx: Vec<u32> = Vec::with_capacity(4);

        while prosac.i < params.max_i {
            if best.inliers >= min_inl {
                let cap = prosac.dynamic_iteration_cap(best.inliers).min(params.max_i);
                if prosac.i >= cap {
                    debug!("terminating: dynamic iteration cap {cap} reached at i={}", prosac.i);
                    break;
                }
                if params.flags.enable_nr && prosac.ph_num_inl != u32::MAX {
                    let prefix_len = prosac.ph_max.min(n);
                    let prefix_inliers = best.mask[..prefix_len].iter().filter(|&&b| b != 0).count();
                    if prefix_inliers as u32 > prosac.ph_num_inl {
                        debug!(
                            "terminating: non-randomness threshold met ({prefix_inliers} > {} within prefix {prefix_len})",
                            prosac.ph_num_inl
                        );
                        break;
                    }
                }
            }

            prosac.sample(&mut self.rng, &mut sample_idx);
            prosac.advance();

            self.sample_idx_usize.clear();
            self.sample_idx_usize
                .extend(sample_idx.iter().map(|&i| i as usize));

            // Pack the sampled points through the aligned scratch buffer
            // rather than indexing src/dst directly, so the minimal solve
            // always reads from contiguous, vectorizable storage regardless
            // of how scattered the PROSAC-chosen indices are across the
            // input.
            let s4 = packed_to_points(self.workspace.pack_points(src, &self.sample_idx_usize)?);
            let d4 = packed_to_points(self.workspace.pack_points(dst, &self.sample_idx_usize)?);
            let Some(h) = solve_minimal(&s4, &d4) else {
                trace!("degenerate minimal sample at i={}, retrying", prosac.i);
                continue;
            };

            let outcome = sprt.evaluate(&h, src, dst, max_d_sq);
            if !outcome.accepted {
                continue;
            }

            if best.is_improved_by(outcome.inliers, outcome.inlier_sum_sq) {
                let (full_inliers, full_sum_sq) =
                    score_all(&h, src, dst, max_d_sq, &mut self.mask_scratch);
                sprt.register_new_best(&outcome);

                let mut candidate_h = h;
                let mut candidate_inliers = full_inliers;
                let mut candidate_sum_sq = full_sum_sq;

                if params.flags.enable_refinement {
                    let refined = self.lm.refine(&h, src, dst, max_d_sq);
                    let (refined_inliers, refined_sum_sq) =
                        score_all(&refined, src, dst, max_d_sq, &mut self.refine_scratch);
                    if refined_inliers >= candidate_inliers {
                        candidate_h = refined;
                        candidate_inliers = refined_inliers;
                        candidate_sum_sq = refined_sum_sq;
                        self.mask_scratch.copy_from_slice(&self.refine_scratch);
                    }
                }

                debug!(
                    "new best at i={}: {candidate_inliers} inliers ({:.3e} sum-sq)",
                    prosac.i, candidate_sum_sq
                );
                best.update(candidate_h, &self.mask_scratch, candidate_inliers, candidate_sum_sq);
                if params.flags.enable_nr {
                    prosac.note_new_best(&self.workspace.nr);
                }
            }
        }

        if params.flags.enable_final_refinement && best.inliers >= min_inl {
            let refined = self.lm.refine(&best.h, src, dst, max_d_sq);
            let (refined_inliers, refined_sum_sq) =
                score_all(&refined, src, dst, max_d_sq, &mut self.refine_scratch);
            if refined_inliers >= best.inliers {
                best.update(refined, &self.refine_scratch, refined_inliers, refined_sum_sq);
            }
        }

        let outcome = if best.inliers >= min_inl {
            if let Some(m) = mask.as_deref_mut() {
                m.copy_from_slice(&best.mask);
            }
            EstimateOutcome {
                homography: best.h,
                inliers: best.inliers,
                iterations: prosac.i,
            }
        } else {
            if let Some(m) = mask.as_deref_mut() {
                m.fill(0);
            }
            EstimateOutcome {
                homography: Homography::ZERO,
                inliers: 0,
                iterations: prosac.i,
            }
        };
        Ok(outcome)
    }
}

impl<R> Drop for HomographyEstimator<R> {
    fn drop(&mut self) {
        self.workspace.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    fn square() -> (Vec<Point2f>, Vec<Point2f>) {
        let src = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(0.0, 1.0),
            Point2f::new(1.0, 1.0),
        ];
        (src.clone(), src)
    }

    #[test]
    fn identity_recovery_n4() {
        let mut est = HomographyEstimator::new(seeded(0));
        let (src, dst) = square();
        let params = EstimateParams::new(1e-3).min_inl(4);
        let mut mask = vec![0u8; 4];
        let outcome = est
            .estimate(&src, &dst, Some(&mut mask), &params, None)
            .unwrap();
        assert_eq!(outcome.inliers, 4);
        assert_eq!(mask, vec![1, 1, 1, 1]);
        for (got, want) in outcome
            .homography
            .as_row_major()
            .iter()
            .zip(Homography::IDENTITY.as_row_major())
        {
            assert!((got - want).abs() < 1e-4);
        }
    }

    #[test]
    fn collinear_n4_fails() {
        let mut est = HomographyEstimator::new(seeded(0));
        let src = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(2.0, 0.0),
            Point2f::new(3.0, 0.0),
        ];
        let dst = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(2.0, 2.0),
            Point2f::new(3.0, 3.0),
        ];
        let params = EstimateParams::new(1e-3).min_inl(4).max_i(50);
        let outcome = est.estimate(&src, &dst, None, &params, None).unwrap();
        assert_eq!(outcome.inliers, 0);
        assert!(outcome.homography.is_zero());
    }

    #[test]
    fn min_inl_greater_than_n_fails() {
        let mut est = HomographyEstimator::new(seeded(0));
        let (src, dst) = square();
        let params = EstimateParams::new(1e-3).min_inl(10);
        let outcome = est.estimate(&src, &dst, None, &params, None).unwrap();
        assert_eq!(outcome.inliers, 0);
    }

    #[test]
    fn too_few_correspondences_is_an_argument_error() {
        let mut est = HomographyEstimator::new(seeded(0));
        let src = vec![Point2f::new(0.0, 0.0); 3];
        let dst = vec![Point2f::new(0.0, 0.0); 3];
        let params = EstimateParams::new(1.0);
        let err = est.estimate(&src, &dst, None, &params, None).unwrap_err();
        assert_eq!(err, EstimatorError::TooFewCorrespondences(3));
    }

    #[test]
    fn degenerate_guess_is_ignored_without_failing() {
        let mut est = HomographyEstimator::new(seeded(1));
        let (src, dst) = square();
        let params = EstimateParams::new(1e-3).max_i(200);
        let outcome = est
            .estimate(&src, &dst, None, &params, Some(&Homography::ZERO))
            .unwrap();
        assert_eq!(outcome.inliers, 4);
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let (src, dst) = square();
        let params = EstimateParams::new(1e-3);
        let mut e1 = HomographyEstimator::new(seeded(123));
        let mut e2 = HomographyEstimator::new(seeded(123));
        let o1 = e1.estimate(&src, &dst, None, &params, None).unwrap();
        let o2 = e2.estimate(&src, &dst, None, &params, None).unwrap();
        assert_eq!(o1, o2);
    }

    #[test]
    fn translation_recovery_with_outliers() {
        let mut src = Vec::new();
        let mut dst = Vec::new();
        for gy in 0..5 {
            for gx in 0..5 {
                let p = Point2f::new(gx as f32, gy as f32);
                src.push(p);
                dst.push(Point2f::new(p.x + 10.0, p.y + 5.0));
            }
        }
        // Append 10 outlier correspondences with no consistent homography.
        for k in 0..10 {
            src.push(Point2f::new(k as f32 * 3.0, -k as f32));
            dst.push(Point2f::new(-k as f32 * 7.0, k as f32 * 11.0));
        }

        let mut est = HomographyEstimator::new(seeded(5));
        let params = EstimateParams::new(0.5).min_inl(15).max_i(1000);
        let mut mask = vec![0u8; src.len()];
        let outcome = est
            .estimate(&src, &dst, Some(&mut mask), &params, None)
            .unwrap();
        assert!(outcome.inliers >= 25);
        for i in 0..25 {
            assert_eq!(mask[i], 1, "expected grid point {i} to be an inlier");
        }
    }
}
