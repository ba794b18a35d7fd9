//! Levenberg-Marquardt refinement of a homography against its current
//! inlier set.

use crate::homography::{score_all, Homography};
use crate::types::Point2f;

/// Iteration cap.
const MAX_ITERS: u32 = 10;
/// Marquardt damping bounds.
const LAMBDA_MIN: f64 = 1e-10;
const LAMBDA_MAX: f64 = 1e10;
/// Stopping tolerance on relative error decrease and parameter update norm.
const STOP_TOL: f64 = 1e-15;

pub struct LmWorkspace {
    jtj: [[f64; 8]; 8],
    tmp1: [[f64; 8]; 8],
    tmp2: [[f64; 8]; 8],
    jte: [f64; 8],
    mask_scratch: Vec<u8>,
}

impl LmWorkspace {
    pub fn new() -> Self {
        Self {
            jtj: [[0.0; 8]; 8],
            tmp1: [[0.0; 8]; 8],
            tmp2: [[0.0; 8]; 8],
            jte: [0.0; 8],
            mask_scratch: Vec::new(),
        }
    }

    /// Refines `h` against the correspondences, using only those currently
    /// within `max_d_sq` of `h` at the start of each iteration (the inlier
    /// set is re-scored every iteration).
    ///
    /// Refinement never reduces the recorded best inlier count: if the
    /// refined homography ends up with fewer inliers than `h` started with,
    /// the original `h` is returned unchanged.
    pub fn refine(
        &mut self,
        h: &Homography,
        src: &[Point2f],
        dst: &[Point2f],
        max_d_sq: f32,
    ) -> Homography {
        self.mask_scratch.resize(src.len(), 0);
        let (start_inliers, _) = score_all(h, src, dst, max_d_sq, &mut self.mask_scratch);

        let mut params = h.as_row_major();
        let mut lambda = 1e-3f64;
        let mut prev_error = self.sum_sq_error(&params, src, dst, max_d_sq);

        for _ in 0..MAX_ITERS {
            self.accumulate_normal_equations(&params, src, dst, max_d_sq);
            let delta = match self.solve_damped(lambda) {
                Some(d) => d,
                None => break,
            };

            let delta_norm_sq: f64 = delta.iter().map(|d| d * d).sum();
            let mut candidate = params;
            for i in 0..8 {
                candidate[i] -= delta[i] as f32;
            }
            candidate[8] = 1.0;

            let new_error = self.sum_sq_error(&candidate, src, dst, max_d_sq);
            if new_error < prev_error {
                let rel_decrease = (prev_error - new_error) / prev_error.max(1e-30);
                params = candidate;
                let converged = rel_decrease < STOP_TOL || delta_norm_sq < STOP_TOL;
                prev_error = new_error;
                lambda = (lambda / 10.0).max(LAMBDA_MIN);
                if converged {
                    break;
                }
            } else {
                lambda = (lambda * 10.0).min(LAMBDA_MAX);
                if lambda >= LAMBDA_MAX {
                    break;
                }
            }
        }

        let refined = match Homography::from_row_major(params) {
            Some(h) => h,
            None => return *h,
        };
        let (refined_inliers, _) = score_all(&refined, src, dst, max_d_sq, &mut self.mask_scratch);
        if refined_inliers < start_inliers {
            *h
        } else {
            refined
        }
    }

    fn sum_sq_error(&mut self, params: &[f32; 9], src: &[Point2f], dst: &[Point2f], max_d_sq: f32) -> f64 {
        let h = Homography::from_normalized_row_major(*params);
        let (_, sum_sq) = score_all(&h, src, dst, max_d_sq, &mut self.mask_scratch);
        sum_sq
    }

    /// Accumulates `JtJ` (8x8) and `Jte` (8) over the correspondences
    /// currently within `max_d_sq`, using the analytic Jacobian of the
    /// transfer-error residual with respect to the 8 free homography
    /// parameters.
    fn accumulate_normal_equations(
        &mut self,
        params: &[f32; 9],
        src: &[Point2f],
        dst: &[Point2f],
        max_d_sq: f32,
    ) {
        for row in self.jtj.iter_mut() {
            row.fill(0.0);
        }
        self.jte.fill(0.0);

        let h = Homography::from_normalized_row_major(*params);
        for i in 0..src.len() {
            let p = src[i];
            let w = f64::from(params[6]) * f64::from(p.x) + f64::from(params[7]) * f64::from(p.y) + 1.0;
            if w.abs() < 1e-12 {
                continue;
            }
            let err = h.transfer_error_sq(p, dst[i]);
            if err > max_d_sq {
                continue;
            }
            let Some(proj) = h.project(p) else { continue };

            let x = f64::from(p.x);
            let y = f64::from(p.y);
            let px = f64::from(proj.x);
            let py = f64::from(proj.y);
            let rx = px - f64::from(dst[i].x);
            let ry = py - f64::from(dst[i].y);

            // d(px)/d(h_k), d(py)/d(h_k) for k = 0..7, from the projective
            // quotient px = (h0 x + h1 y + h2)/w, py = (h3 x + h4 y + h5)/w,
            // w = h6 x + h7 y + 1.
            let jx: [f64; 8] = [
                x / w,
                y / w,
                1.0 / w,
                0.0,
                0.0,
                0.0,
                -px * x / w,
                -px * y / w,
            ];
            let jy: [f64; 8] = [
                0.0,
                0.0,
                0.0,
                x / w,
                y / w,
                1.0 / w,
                -py * x / w,
                -py * y / w,
            ];

            for a in 0..8 {
                self.jte[a] += jx[a] * rx + jy[a] * ry;
                for b in 0..8 {
                    self.jtj[a][b] += jx[a] * jx[b] + jy[a] * jy[b];
                }
            }
        }
    }

    /// Solves `(JtJ + lambda*I) delta = Jte` by symmetric Gaussian
    /// elimination with partial pivoting.
    ///
    /// `tmp2` holds a clean (undamped) copy of `JtJ`; `tmp1` is the scratch
    /// buffer elimination destroys in place. Keeping them distinct mirrors
    /// the original workspace layout and lets a caller inspect the
    /// undamped normal matrix after a solve without re-deriving it.
    fn solve_damped(&mut self, lambda: f64) -> Option<[f64; 8]> {
        for i in 0..8 {
            self.tmp2[i] = self.jtj[i];
        }
        for i in 0..8 {
            self.tmp1[i] = self.tmp2[i];
            self.tmp1[i][i] += lambda * self.tmp2[i][i].max(1e-12);
        }
        let mut rhs = self.jte;

        for col in 0..8 {
            let mut pivot_row = col;
            let mut pivot_mag = self.tmp1[col][col].abs();
            for row in (col + 1)..8 {
                let mag = self.tmp1[row][col].abs();
                if mag > pivot_mag {
                    pivot_mag = mag;
                    pivot_row = row;
                }
            }
            if pivot_mag < 1e-15 {
                return None;
            }
            if pivot_row != col {
                self.tmp1.swap(pivot_row, col);
                rhs.swap(pivot_row, col);
            }
            let pivot = self.tmp1[col][col];
            for row in (col + 1)..8 {
                let factor = self.tmp1[row][col] / pivot;
                if factor == 0.0 {
                    continue;
                }
                for k in col..8 {
                    self.tmp1[row][k] -= factor * self.tmp1[col][k];
                }
                rhs[row] -= factor * rhs[col];
            }
        }

        let mut delta = [0.0f64; 8];
        for row in (0..8).rev() {
            let mut sum = rhs[row];
            for col in (row + 1)..8 {
                sum -= self.tmp1[row][col] * delta[col];
            }
            delta[row] = sum / self.tmp1[row][row];
        }
        Some(delta)
    }
}

impl Default for LmWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
