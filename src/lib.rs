//! Robust planar homography estimation via PROSAC sampling, SPRT early-abort
//! model evaluation, a non-randomness termination test, and optional
//! Levenberg-Marquardt refinement.
//!
//! The crate is organized the same way the estimator's own components are
//! described: a geometry kernel ([`geometry`]) that solves minimal 4-point
//! samples, a scoring primitive ([`homography`]) shared by every subsystem
//! that needs to evaluate a candidate, an [`sprt`] evaluator, a [`prosac`]
//! sampling controller, an [`lm`] refiner, and an [`estimator`] driver that
//! ties them together behind [`HomographyEstimator`].
//!
//! ```no_run
//! use rho_hest::{EstimateParams, HomographyEstimator, Point2f, rng};
//!
//! let src = vec![Point2f::new(0.0, 0.0), Point2f::new(1.0, 0.0),
//!                Point2f::new(0.0, 1.0), Point2f::new(1.0, 1.0)];
//! let dst = src.clone();
//!
//! let mut estimator = HomographyEstimator::new(rng::seeded(0));
//! let params = EstimateParams::new(3.0);
//! let outcome = estimator.estimate(&src, &dst, None, &params, None).unwrap();
//! assert_eq!(outcome.inliers, 4);
//! ```

mod error;
mod estimator;
mod flags;
mod geometry;
mod homography;
mod lm;
mod nr;
mod prosac;
pub mod rng;
mod sprt;
mod types;
mod workspace;

pub use error::EstimatorError;
pub use estimator::{EstimateOutcome, EstimateParams, HomographyEstimator};
pub use flags::EstimatorFlags;
pub use homography::Homography;
pub use types::Point2f;
