//! Radial-grid evaluation of orbitals for plotting and export.

use nalgebra::DMatrix;

use crate::basis::radial::coeff_reduced2raw;
use crate::basis::zeros::{jl_zero, spherical_jl};
use crate::error::Result;

/// Composite Simpson quadrature on a uniform grid (trapezoid closes an
/// even interval count).
pub fn simpson(f: &[f64], dx: f64) -> f64 {
    let n = f.len();
    if n < 2 {
        return 0.0;
    }
    let m = if n % 2 == 1 { n } else { n - 1 };
    let mut s = f[0] + f[m - 1];
    for (i, v) in f.iter().enumerate().take(m - 1).skip(1) {
        s += if i % 2 == 1 { 4.0 * v } else { 2.0 * v };
    }
    let mut total = s * dx / 3.0;
    if n % 2 == 0 {
        total += 0.5 * (f[n - 2] + f[n - 1]) * dx;
    }
    total
}

/// Evaluate raw-basis orbitals chi_{l,zeta}(r) on a grid.
///
/// `coef[l]` holds raw coefficient rows (`nzeta x nbes`). Values beyond
/// `rcut` are zero. With `normalize` each orbital is rescaled to unit
/// norm in the `int r^2 dr` inner product on the given grid.
pub fn build_raw(
    coef: &[DMatrix<f64>],
    rcut: f64,
    r: &[f64],
    normalize: bool,
) -> Result<Vec<Vec<Vec<f64>>>> {
    let mut chi = Vec::with_capacity(coef.len());
    for (l, coef_l) in coef.iter().enumerate() {
        let mut chi_l = Vec::with_capacity(coef_l.nrows());
        for zeta in 0..coef_l.nrows() {
            let mut chi_z = vec![0.0; r.len()];
            for q in 0..coef_l.ncols() {
                let c = coef_l[(zeta, q)];
                if c == 0.0 {
                    continue;
                }
                let z = jl_zero(l, q + 1)?;
                for (ir, &ri) in r.iter().enumerate() {
                    if ri <= rcut {
                        chi_z[ir] += c * spherical_jl(l, z * ri / rcut);
                    }
                }
            }
            if normalize && r.len() > 1 {
                let dr = r[1] - r[0];
                let f: Vec<f64> = chi_z
                    .iter()
                    .zip(r.iter())
                    .map(|(c, ri)| c * c * ri * ri)
                    .collect();
                let norm = simpson(&f, dr).sqrt();
                if norm > 0.0 {
                    for v in &mut chi_z {
                        *v /= norm;
                    }
                }
            }
            chi_l.push(chi_z);
        }
        chi.push(chi_l);
    }
    Ok(chi)
}

/// Evaluate reduced-basis orbitals by converting to raw coefficients
/// first.
pub fn build_reduced(
    coef: &[DMatrix<f64>],
    rcut: f64,
    r: &[f64],
    normalize: bool,
) -> Result<Vec<Vec<Vec<f64>>>> {
    build_raw(&coeff_reduced2raw(coef, rcut)?, rcut, r, normalize)
}
