//! Error taxonomy of the orbital generation core.
//!
//! Every kind carries a short context string. All errors surface to the
//! caller of the method that triggered them; the only non-fatal kind is
//! `OptDiverged`, which the optimizer logs while still returning its best
//! iterate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrbgenError {
    /// A dataset file misses a token/section or has mismatched sizes.
    #[error("malformed dataset: {0}")]
    MalformedDataset(String),

    /// A paired overlap/operator dataset disagrees on its common part.
    #[error("inconsistent dataset pair: {0}")]
    Inconsistent(String),

    /// Ragged containers with incompatible shapes.
    #[error("incompatible shape: {0}")]
    Shape(String),

    /// Requested zeta count or ecut-derived basis size exceeds the data.
    #[error("requested basis size exceeds available: {0}")]
    NzetaExceeds(String),

    /// The overlap metric is not positive-definite.
    #[error("overlap matrix not positive-definite: {0}")]
    SingularOverlap(String),

    /// The optimizer hit its iteration cap before reaching tolerance.
    #[error("optimization did not converge: {0}")]
    OptDiverged(String),

    /// Spherical Bessel zero requested outside the supported (l, n) window.
    #[error("spherical Bessel zero out of range: {0}")]
    BesselOutOfRange(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrbgenError>;
