//! Eigenvector-based initial guess for the expansion coefficients.
//!
//! From a single-atom reference the matrix `<jy|mo><mo|jy>` is
//! accumulated per angular momentum; its leading eigenvectors give the
//! radial combinations that best span the occupied manifold and seed the
//! optimizer.

use log::debug;
use nalgebra::{DMatrix, QR};

use crate::basis::radial::{nbes, raw_transform_coef};
use crate::basis::transform::{jy2ao, NbesSpec};
use crate::error::{OrbgenError, Result};
use crate::linalg::{cplx, CMatrix};

/// Generate starting coefficients from single-atom overlap data.
///
/// `mo_jy` is the raw-basis `<mo|jy>` of the reference atom, one
/// `(nbands, (lmax+1)^2 * nbes_raw)` matrix per k point. The result has
/// one `nzeta[l] x nbes(l, rcut, ecut)` matrix per l, rows orthonormal,
/// ordered by descending eigenvalue.
pub fn initgen(
    nzeta: &[usize],
    ecut: f64,
    lmax: usize,
    rcut: f64,
    nbes_raw: usize,
    mo_jy: &[CMatrix],
    wk: &[f64],
    reduced: bool,
) -> Result<Vec<DMatrix<f64>>> {
    let lmax_gen = nzeta.len().saturating_sub(1);
    if lmax_gen > lmax {
        return Err(OrbgenError::NzetaExceeds(format!(
            "nzeta covers l up to {lmax_gen}, reference data stops at {lmax}"
        )));
    }
    let nbes_now = if reduced { nbes_raw - 1 } else { nbes_raw };

    // per-l sizes admitted by the target cutoff
    let mut nbes_gen = Vec::with_capacity(lmax_gen + 1);
    for l in 0..=lmax_gen {
        let n = nbes(l, rcut, ecut)?;
        if n == 0 || n > nbes_now {
            return Err(OrbgenError::NzetaExceeds(format!(
                "ecut = {ecut} admits {n} radial components for l = {l}, \
                 reference data carries {nbes_now}"
            )));
        }
        nbes_gen.push(n);
    }

    // transform <mo|jy(raw)> into the working basis
    let coef = raw_transform_coef(&[lmax], nbes_raw, rcut, reduced)?;
    let c = cplx(&jy2ao(&coef, &[1], &[lmax], &NbesSpec::Uniform(nbes_raw))?);
    let y: Vec<CMatrix> = mo_jy.iter().map(|m| m * &c).collect();

    let mut out = Vec::with_capacity(lmax_gen + 1);
    for (l, (&nz, &nb)) in nzeta.iter().zip(nbes_gen.iter()).enumerate() {
        if nz > nb {
            return Err(OrbgenError::NzetaExceeds(format!(
                "nzeta[{l}] = {nz} exceeds the {nb} available radial components"
            )));
        }
        if nz == 0 {
            out.push(DMatrix::zeros(0, nb));
            continue;
        }

        // A = sum_k wk sum_m Yl(k, m)^H Yl(k, m), real by Hermiticity
        let mut a: DMatrix<f64> = DMatrix::zeros(nb, nb);
        for (yk, &w) in y.iter().zip(wk.iter()) {
            for m in l * l..(l + 1) * (l + 1) {
                let block = yk.view((0, m * nbes_now), (yk.nrows(), nb));
                let aa = block.adjoint() * block;
                for i in 0..nb {
                    for j in 0..nb {
                        a[(i, j)] += w * aa[(i, j)].re;
                    }
                }
            }
        }

        let eig = nalgebra::SymmetricEigen::new(a);
        let mut order: Vec<usize> = (0..nb).collect();
        order.sort_by(|&i, &j| eig.eigenvalues[j].total_cmp(&eig.eigenvalues[i]));
        debug!(
            "initgen: l = {l}, leading <jy|mo><mo|jy> eigenvalues {:?}",
            order.iter().take(nz).map(|&i| eig.eigenvalues[i]).collect::<Vec<_>>()
        );

        let mut top = DMatrix::zeros(nb, nz);
        for (col, &i) in order.iter().take(nz).enumerate() {
            top.set_column(col, &eig.eigenvectors.column(i));
        }
        // orthonormalize the column block; rows of the result are zetas
        let q = QR::new(top).q();
        out.push(q.transpose());
    }
    Ok(out)
}
