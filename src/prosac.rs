//! The PROSAC sampling controller: phase schedule, non-uniform sampling
//! from the top-ranked correspondence prefix, and the dynamic iteration
//! budget (Chum & Matas, "Matching with PROSAC").

use crate::nr::NrTable;
use crate::rng::sample_distinct;
use rand_core::RngCore;

pub struct Prosac {
    /// Current iteration count.
    pub i: u32,
    /// Current phase: sampling draws 3 of 4 indices from `[0, ph_num - 2]`.
    pub ph_num: usize,
    ph_end_i: u32,
    ph_end_fp_i: f64,
    /// Terminating phase number, set from the NR table once a new best is
    /// seen.
    pub ph_max: usize,
    /// Inliers-in-prefix threshold associated with `ph_max`.
    pub ph_num_inl: u32,
    /// Total hypotheses evaluated (feeds SPRT's per-model learning rate).
    pub num_models: u32,
    n: usize,
    r_convg: u32,
    cfd: f64,
}

impl Prosac {
    pub fn new(n: usize, r_convg: u32, cfd: f64) -> Self {
        Self {
            i: 0,
            ph_num: 4.min(n),
            ph_end_i: 1,
            ph_end_fp_i: 1.0,
            ph_max: n,
            ph_num_inl: u32::MAX,
            num_models: 0,
            n,
            r_convg,
            cfd,
        }
    }

    /// `true` while the controller is still growing the PROSAC prefix;
    /// `false` once it has degenerated to uniform RANSAC sampling - triggered
    /// by `phNum == N` *or* `i >= rConvg` (an OR of the two conditions).
    pub fn in_prosac_phase(&self) -> bool {
        self.ph_num < self.n && self.i < self.r_convg
    }

    /// Draws one 4-index sample into `out`, either biased toward the
    /// top-ranked prefix (PROSAC phase) or uniformly over all N (RANSAC
    /// phase).
    pub fn sample<R: RngCore>(&self, rng: &mut R, out: &mut Vec<u32>) {
        if self.in_prosac_phase() {
            // Three distinct "old" indices from [0, ph_num - 2], plus the
            // fixed "newest" index ph_num - 1.
            sample_distinct(rng, self.ph_num - 1, 3, out);
            out.push((self.ph_num - 1) as u32);
        } else {
            sample_distinct(rng, self.n, 4, out);
        }
    }

    /// Advances the iteration counter and, if due, the phase number (the
    /// `phEndFpI`/`phEndI` growth schedule).
    pub fn advance(&mut self) {
        self.i += 1;
        self.num_models += 1;
        if self.in_prosac_phase() && self.i >= self.ph_end_i && self.ph_num < self.n {
            self.ph_num += 1;
            self.ph_end_fp_i *= self.ph_num as f64 / (self.ph_num - 3) as f64;
            self.ph_end_i = self.ph_end_fp_i.ceil() as u32;
        }
    }

    /// Records that a new best model was found, capturing the NR-table
    /// threshold for the current prefix size.
    pub fn note_new_best(&mut self, nr: &NrTable) {
        if nr.is_empty() {
            return;
        }
        self.ph_max = self.ph_num;
        self.ph_num_inl = nr.k_star_for(self.ph_num);
    }

    /// Standard PROSAC/RANSAC dynamic termination bound: the number of
    /// iterations after which, assuming an inlier ratio of `best_inliers/N`,
    /// the probability of having missed an all-inlier 4-point sample falls
    /// below `1 - cfd`.
    pub fn dynamic_iteration_cap(&self, best_inliers: usize) -> u32 {
        if self.n == 0 {
            return 0;
        }
        let w = best_inliers as f64 / self.n as f64;
        let p_all_inliers = w.powi(4);
        if p_all_inliers >= 1.0 {
            return 0;
        }
        if self.cfd <= 0.0 {
            return 0;
        }
        let denom = (1.0 - p_all_inliers).ln();
        if denom >= 0.0 {
            // p_all_inliers <= 0: no information, never converges on its own.
            return u32::MAX;
        }
        let k = ((1.0 - self.cfd).ln() / denom).ceil();
        if k.is_finite() && k >= 0.0 {
            k as u32
        } else {
            0
        }
    }
}
