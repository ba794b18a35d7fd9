//! The 4-point minimal homography solve and its numerical safeguards.
//!
//! Given four source/destination point pairs, builds the homogeneous DLT
//! system `A h = 0` (specialized to a non-homogeneous 8x8 system by fixing
//! `h22 = 1`, since a 4-point minimal sample over-determines nothing and
//! under-determines only the overall scale) and solves it by Gaussian
//! elimination with partial pivoting.

use crate::homography::Homography;
use crate::types::Point2f;

/// Absolute pivot magnitude below which a row is considered singular.
const PIVOT_EPS: f32 = 1e-12;

/// Minimum acceptable `|det|` of the homography's upper-left 2x2 block;
/// below this the sample is treated as degenerate.
const DET_EPS: f32 = 1e-12;

/// Solves the minimal 4-point homography problem.
///
/// Returns `None` on a degenerate sample: a singular pivot during
/// elimination (near-collinear points) or a produced homography whose
/// upper-left 2x2 determinant is too close to zero. Degenerate samples are
/// not a numerical error in the error-handling sense: the driver silently
/// rejects and resamples without charging the attempt against SPRT
/// statistics.
pub fn solve_minimal(src: &[Point2f; 4], dst: &[Point2f; 4]) -> Option<Homography> {
    // Build the 8x9 augmented system for unknowns h0..h7 (h8 fixed to 1).
    // Row 2i:   -x -y -1  0  0  0  x*xp  y*xp | -xp
    // Row 2i+1:  0  0  0 -x -y -1  x*yp  y*yp | -yp
    let mut a = [[0.0f32; 9]; 8];
    for i in 0..4 {
        let Point2f { x, y } = src[i];
        let Point2f { x: xp, y: yp } = dst[i];
        a[2 * i] = [-x, -y, -1.0, 0.0, 0.0, 0.0, x * xp, y * xp, -xp];
        a[2 * i + 1] = [0.0, 0.0, 0.0, -x, -y, -1.0, x * yp, y * yp, -yp];
    }

    let h = solve_8x8_partial_pivot(&mut a)?;
    let homography = Homography::from_row_major([
        h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0,
    ])?;

    if homography.upper_2x2_det().abs() < DET_EPS {
        return None;
    }
    Some(homography)
}

/// Gaussian elimination with partial pivoting on an 8x9 augmented matrix
/// (8 unknowns, last column is the RHS). Returns the 8 solved unknowns, or
/// `None` if any pivot falls below [`PIVOT_EPS`].
fn solve_8x8_partial_pivot(a: &mut [[f32; 9]; 8]) -> Option<[f32; 8]> {
    const N: usize = 8;
    for col in 0..N {
        // Partial pivot: find the largest-magnitude entry in this column
        // at or below the current row.
        let mut pivot_row = col;
        let mut pivot_mag = a[col][col].abs();
        for row in (col + 1)..N {
            let mag = a[row][col].abs();
            if mag > pivot_mag {
                pivot_mag = mag;
                pivot_row = row;
            }
        }
        if pivot_mag < PIVOT_EPS {
            return None;
        }
        if pivot_row != col {
            a.swap(pivot_row, col);
        }

        let pivot = a[col][col];
        for row in (col + 1)..N {
            let factor = a[row][col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    // Back-substitution.
    let mut x = [0.0f32; N];
    for row in (0..N).rev() {
        let mut sum = a[row][8];
        for col in (row + 1)..N {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}
