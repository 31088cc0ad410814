//! Dense-algebra helpers shared by the spillage engine.
//!
//! Overlap metrics are real symmetric positive-definite while the
//! reference-state overlaps are complex, so the helpers here cover the
//! mixed real/complex products the engine needs:
//! - right division against an SPD metric (Cholesky)
//! - real Frobenius inner products, full and row-wise
//! - real -> complex lifting

use nalgebra::{Cholesky, DMatrix, DVector};
use num_complex::Complex;

use crate::error::{OrbgenError, Result};

pub type CMatrix = DMatrix<Complex<f64>>;

/// Lift a real matrix into the complex field.
pub fn cplx(a: &DMatrix<f64>) -> CMatrix {
    a.map(|x| Complex::new(x, 0.0))
}

/// Right division `X S^{-1}` for a real SPD metric `S`.
///
/// `S` symmetric gives `(X S^{-1})^T = S^{-1} X^T`, so one Cholesky
/// factorization serves both the real and imaginary parts of `X`.
pub fn mrdiv(x: &CMatrix, s: &DMatrix<f64>, what: &str) -> Result<CMatrix> {
    let chol = Cholesky::new(s.clone())
        .ok_or_else(|| OrbgenError::SingularOverlap(what.to_string()))?;

    let yt_re = chol.solve(&x.map(|z| z.re).transpose());
    let yt_im = chol.solve(&x.map(|z| z.im).transpose());

    Ok(CMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
        Complex::new(yt_re[(j, i)], yt_im[(j, i)])
    }))
}

/// Real Frobenius inner product `Re tr(A B^H) = Re sum_ij A_ij conj(B_ij)`.
pub fn rfrob(a: &CMatrix, b: &CMatrix) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x * y.conj()).re).sum()
}

/// `rfrob` with a real left factor.
pub fn rfrob_rc(a: &DMatrix<f64>, b: &CMatrix) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y.re).sum()
}

/// Row-wise real Frobenius inner product: entry `i` is
/// `Re sum_j A_ij conj(B_ij)`.
pub fn rfrob_rows(a: &CMatrix, b: &CMatrix) -> DVector<f64> {
    DVector::from_fn(a.nrows(), |i, _| {
        (0..a.ncols()).map(|j| (a[(i, j)] * b[(i, j)].conj()).re).sum()
    })
}
