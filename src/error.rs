//! Typed errors for the estimator's argument-validation and resource
//! failures.
//!
//! Degenerate minimal samples (collinear points) and "no homography found"
//! are deliberately *not* represented here: both are recovered or surfaced
//! through normal control flow (silent retry, and a zero-inlier
//! [`crate::EstimateOutcome`] respectively) rather than an `Err`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EstimatorError {
    #[error("need at least 4 correspondences, got {0}")]
    TooFewCorrespondences(usize),

    #[error("mismatched correspondence array lengths: src={0} dst={1}")]
    MismatchedLengths(usize, usize),

    #[error("output mask length {0} does not match correspondence count {1}")]
    MismatchedMaskLength(usize, usize),

    #[error("confidence must lie in [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("beta must lie in (0, 1) when non-randomness is enabled, got {0}")]
    InvalidBeta(f64),

    #[error("negative maximum distance: {0}")]
    NegativeMaxDistance(f32),

    #[error("allocation failure while growing workspace buffers")]
    Allocation,
}
