//! Basis transformation from the spherical-wave basis to the
//! pseudo-atomic-orbital basis.
//!
//! Assuming spherical waves in lexicographic `(itype, iatom, l, m, q)`
//! order and orbitals in `(itype, iatom, l, m, zeta)` order, the
//! transformation is block-diagonal with one `nbes x nzeta` block per
//! `(itype, iatom, l, m)`. Every downstream overlap is then a dense
//! product `X * M` or `M^T * Y * M`.

use nalgebra::DMatrix;

use crate::error::{OrbgenError, Result};
use crate::index::index_map;
use crate::nesting::Coef;

/// Spherical-wave radial counts, broadcast over (itype, l).
#[derive(Clone, Debug)]
pub enum NbesSpec {
    /// One count for every (itype, l).
    Uniform(usize),
    /// Per-l counts, shared by all types.
    PerL(Vec<usize>),
    /// Per-(itype, l) counts.
    PerTypeL(Vec<Vec<usize>>),
}

impl NbesSpec {
    /// Broadcast to the full per-(itype, l) table.
    pub fn resolve(&self, lmax: &[usize]) -> Result<Vec<Vec<usize>>> {
        match self {
            Self::Uniform(n) => Ok(lmax.iter().map(|&lm| vec![*n; lm + 1]).collect()),
            Self::PerL(per_l) => lmax
                .iter()
                .map(|&lm| {
                    if per_l.len() < lm + 1 {
                        return Err(OrbgenError::Shape(format!(
                            "nbes per-l table has {} entries, lmax = {lm}",
                            per_l.len()
                        )));
                    }
                    Ok(per_l[..=lm].to_vec())
                })
                .collect(),
            Self::PerTypeL(per_tl) => {
                if per_tl.len() != lmax.len() {
                    return Err(OrbgenError::Shape(format!(
                        "nbes table covers {} types, expected {}",
                        per_tl.len(),
                        lmax.len()
                    )));
                }
                lmax.iter()
                    .zip(per_tl.iter())
                    .map(|(&lm, row)| {
                        if row.len() < lm + 1 {
                            return Err(OrbgenError::Shape(format!(
                                "nbes row has {} entries, lmax = {lm}",
                                row.len()
                            )));
                        }
                        Ok(row[..=lm].to_vec())
                    })
                    .collect()
            }
        }
    }
}

/// Block-diagonal spherical-wave -> orbital transformation matrix.
///
/// The block of `(itype, iatom, l, m)` is `coef[itype][l]` transposed and
/// zero-padded to `nbes[itype][l]` rows; absent or empty coefficient
/// channels contribute an empty column block.
pub fn jy2ao(coef: &Coef, natom: &[usize], lmax: &[usize], nbes: &NbesSpec) -> Result<DMatrix<f64>> {
    if coef.len() != natom.len() || natom.len() != lmax.len() {
        return Err(OrbgenError::Shape(format!(
            "jy2ao: {} coefficient types, {} natom entries, {} lmax entries",
            coef.len(),
            natom.len(),
            lmax.len()
        )));
    }
    let nbes = nbes.resolve(lmax)?;

    let (_, lin2comp) = index_map(natom, lmax);

    let nzeta_of = |itype: usize, l: usize| -> usize {
        coef[itype].get(l).map_or(0, DMatrix::nrows)
    };

    let nrows: usize = lin2comp
        .iter()
        .map(|&(t, _, l, _)| nbes[t][l])
        .sum();
    let ncols: usize = lin2comp
        .iter()
        .map(|&(t, _, l, _)| nzeta_of(t, l))
        .sum();

    let mut m = DMatrix::zeros(nrows, ncols);
    let mut row0 = 0;
    let mut col0 = 0;
    for &(t, _, l, _) in &lin2comp {
        let nb = nbes[t][l];
        let nz = nzeta_of(t, l);
        if nz > 0 {
            let block = &coef[t][l];
            if block.ncols() > nb {
                return Err(OrbgenError::Shape(format!(
                    "jy2ao: coefficient rows of (itype {t}, l {l}) have {} components, \
                     basis has {nb}",
                    block.ncols()
                )));
            }
            for z in 0..nz {
                for q in 0..block.ncols() {
                    m[(row0 + q, col0 + z)] = block[(z, q)];
                }
            }
        }
        row0 += nb;
        col0 += nz;
    }
    Ok(m)
}
