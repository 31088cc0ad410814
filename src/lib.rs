//! Numerical atomic orbital generation by spillage minimization.
//!
//! The crate builds compact radial basis sets from plane-wave or LCAO
//! reference calculations: truncated spherical-Bessel radial machinery,
//! overlap-dataset loaders, the generalized spillage function with its
//! analytic gradient, and a bounded quasi-Newton optimization driver.

pub mod basis;
pub mod dataset;
pub mod error;
pub mod guess;
pub mod index;
pub mod input;
pub mod linalg;
pub mod nesting;
pub mod optimization;
pub mod orbio;
pub mod spillage;
