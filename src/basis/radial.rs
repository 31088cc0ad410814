//! Truncated spherical-Bessel radial basis: counting, normalization and
//! the end-smoothed ("reduced") variant.
//!
//! The raw q-th radial function of angular momentum l is
//!
//!     f_q(r) = j_l(z_{l,q+1} r / rcut),   r in [0, rcut]
//!
//! Raw functions of a common l are mutually orthogonal in the
//! `int_0^rcut r^2 dr` inner product, with the closed-form norm
//! `rcut^{3/2}/sqrt(2) * |j_{l+1}(z)|`. The reduced basis is the
//! orthonormal complement of the end-derivative functional: every reduced
//! function and its first radial derivative vanish at rcut.

use nalgebra::{DMatrix, DVector};

use crate::basis::zeros::{jl_zero, spherical_jl, spherical_jl_deriv};
use crate::error::Result;

/// Number of raw radial functions admitted by the kinetic-energy cutoff:
/// the count of zeros with `(z / rcut)^2 <= ecut`.
pub fn nbes(l: usize, rcut: f64, ecut: f64) -> Result<usize> {
    let zmax = ecut.sqrt() * rcut;
    let mut n = 0;
    while jl_zero(l, n + 1)? <= zmax {
        n += 1;
    }
    Ok(n)
}

/// Norm of the q-th raw truncated radial function (q is 0-based).
pub fn jl_raw_norm(l: usize, q: usize, rcut: f64) -> Result<f64> {
    let z = jl_zero(l, q + 1)?;
    Ok(rcut.powf(1.5) / std::f64::consts::SQRT_2 * spherical_jl(l + 1, z).abs())
}

/// Raw -> reduced transformation for the first `n` radial functions of
/// angular momentum `l`.
///
/// Returns the `n x (n-1)` matrix whose columns are raw-basis coefficient
/// vectors of the reduced functions. Constructed in the normalized basis,
/// where the end-derivative functional is a single vector `d`; the columns
/// are the Householder complement of `d`, which keeps the reduced
/// functions orthonormal. `n = 1` has no admissible combination and yields
/// the empty `1 x 0` matrix.
pub fn jl_reduce(l: usize, n: usize, rcut: f64) -> Result<DMatrix<f64>> {
    if n == 1 {
        return Ok(DMatrix::zeros(1, 0));
    }

    // end derivative of each normalized radial function
    let mut d = DVector::zeros(n);
    let mut inv_norm = DVector::zeros(n);
    for q in 0..n {
        let z = jl_zero(l, q + 1)?;
        inv_norm[q] = 1.0 / jl_raw_norm(l, q, rcut)?;
        d[q] = z / rcut * spherical_jl_deriv(l, z) * inv_norm[q];
    }

    // Householder reflector sending d to a multiple of e0; its trailing
    // columns are an orthonormal basis of the complement of d
    let mut v = d.normalize();
    v[0] += v[0].signum();
    let beta = 2.0 / v.norm_squared();
    let mut t = DMatrix::zeros(n, n - 1);
    for j in 0..n - 1 {
        for q in 0..n {
            let h = if q == j + 1 { 1.0 } else { 0.0 };
            let h = h - beta * v[q] * v[j + 1];
            t[(q, j)] = inv_norm[q] * h;
        }
    }
    Ok(t)
}

/// Coefficient stacks expressing the working basis (reduced or
/// normalized) in terms of the first `nbes` raw radial functions, one
/// channel per l up to `lmax[itype]`.
///
/// Fed through `jy2ao`, this is the raw -> working-basis transformation
/// applied to freshly loaded overlap data.
pub fn raw_transform_coef(
    lmax: &[usize],
    nbes: usize,
    rcut: f64,
    reduced: bool,
) -> Result<Vec<Vec<DMatrix<f64>>>> {
    lmax.iter()
        .map(|&lm| {
            (0..=lm)
                .map(|l| {
                    if reduced {
                        Ok(jl_reduce(l, nbes, rcut)?.transpose())
                    } else {
                        let mut m = DMatrix::zeros(nbes, nbes);
                        for q in 0..nbes {
                            m[(q, q)] = 1.0 / jl_raw_norm(l, q, rcut)?;
                        }
                        Ok(m)
                    }
                })
                .collect()
        })
        .collect()
}

/// Convert reduced-basis coefficient rows (`nzeta x nbes`) into raw-basis
/// rows (`nzeta x (nbes + 1)`).
pub fn coeff_reduced2raw(coef: &[DMatrix<f64>], rcut: f64) -> Result<Vec<DMatrix<f64>>> {
    coef.iter()
        .enumerate()
        .map(|(l, c)| {
            if c.nrows() == 0 {
                return Ok(DMatrix::zeros(0, 0));
            }
            Ok(c * jl_reduce(l, c.ncols() + 1, rcut)?.transpose())
        })
        .collect()
}

/// Convert normalized-basis coefficient rows into raw-basis rows.
pub fn coeff_normalized2raw(coef: &[DMatrix<f64>], rcut: f64) -> Result<Vec<DMatrix<f64>>> {
    coef.iter()
        .enumerate()
        .map(|(l, c)| {
            let mut raw = c.clone();
            for q in 0..c.ncols() {
                let norm = jl_raw_norm(l, q, rcut)?;
                for z in 0..c.nrows() {
                    raw[(z, q)] /= norm;
                }
            }
            Ok(raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::build::simpson;

    #[test]
    fn nbes_counts_admitted_zeros() {
        // (z/7)^2 <= 40 admits zeros up to z = 44.27...
        assert_eq!(nbes(0, 7.0, 40.0).unwrap(), 14);
        assert_eq!(nbes(1, 7.0, 40.0).unwrap(), 13);
        assert_eq!(nbes(2, 7.0, 40.0).unwrap(), 13);
        // tighter cutoff
        assert_eq!(nbes(0, 6.0, 10.0).unwrap(), 6);
    }

    #[test]
    fn raw_norm_matches_quadrature() {
        let rcut = 6.0;
        let ngrid = 4001;
        let dr = rcut / (ngrid - 1) as f64;
        for l in 0..4 {
            for q in 0..5 {
                let z = jl_zero(l, q + 1).unwrap();
                let f: Vec<f64> = (0..ngrid)
                    .map(|i| {
                        let r = i as f64 * dr;
                        let j = spherical_jl(l, z * r / rcut);
                        j * j * r * r
                    })
                    .collect();
                let num = simpson(&f, dr).sqrt();
                let ana = jl_raw_norm(l, q, rcut).unwrap();
                assert!((num - ana).abs() / ana < 1e-6, "l = {l}, q = {q}");
            }
        }
    }

    #[test]
    fn reduce_vanishes_at_rcut() {
        let rcut = 7.0;
        let n = 9;
        for l in 0..4 {
            let t = jl_reduce(l, n, rcut).unwrap();
            assert_eq!(t.shape(), (n, n - 1));
            for j in 0..n - 1 {
                let mut val = 0.0;
                let mut der = 0.0;
                for q in 0..n {
                    let z = jl_zero(l, q + 1).unwrap();
                    val += t[(q, j)] * spherical_jl(l, z);
                    der += t[(q, j)] * z / rcut * spherical_jl_deriv(l, z);
                }
                assert!(val.abs() < 1e-10, "value at rcut, l = {l}, col {j}");
                assert!(der.abs() < 1e-10, "derivative at rcut, l = {l}, col {j}");
            }
        }
    }

    #[test]
    fn reduce_preserves_orthonormality() {
        // raw Gram matrix is diag(norm^2), so T^t G T must be identity
        let rcut = 5.0;
        let n = 7;
        for l in 0..3 {
            let t = jl_reduce(l, n, rcut).unwrap();
            let g = DMatrix::from_fn(n, n, |i, j| {
                if i == j {
                    jl_raw_norm(l, i, rcut).unwrap().powi(2)
                } else {
                    0.0
                }
            });
            let gram = t.transpose() * g * &t;
            for i in 0..n - 1 {
                for j in 0..n - 1 {
                    let expect = if i == j { 1.0 } else { 0.0 };
                    assert!((gram[(i, j)] - expect).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn reduce_of_single_function_is_empty() {
        let t = jl_reduce(2, 1, 7.0).unwrap();
        assert_eq!(t.shape(), (1, 0));
    }

    #[test]
    fn reduced2raw_adds_one_component() {
        let rcut = 6.0;
        let coef = vec![DMatrix::from_row_slice(2, 4, &[
            0.3, -0.1, 0.7, 0.2, //
            0.0, 0.5, -0.4, 0.1,
        ])];
        let raw = coeff_reduced2raw(&coef, rcut).unwrap();
        assert_eq!(raw[0].shape(), (2, 5));
    }
}
