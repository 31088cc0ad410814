//! Ragged coefficient tensors and their flat representation.
//!
//! A coefficient tensor is indexed `coef[itype][l][zeta][q]`; the two
//! inner axes are a dense `nzeta x nbes` matrix whose rows are zetas.
//! The optimizer works on the flat leaf sequence and a retained shape
//! pattern, so value and shape travel separately.

use nalgebra::DMatrix;

use crate::error::{OrbgenError, Result};

/// `coef[itype][l]` is a `nzeta x nbes` matrix of expansion coefficients.
pub type Coef = Vec<Vec<DMatrix<f64>>>;

/// Ragged-shape pattern of a coefficient tensor, sufficient to reverse
/// [`flatten`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NestPat {
    shape: Vec<Vec<(usize, usize)>>,
}

impl NestPat {
    /// Number of scalar leaves the pattern demands.
    pub fn len(&self) -> usize {
        self.shape
            .iter()
            .flat_map(|t| t.iter().map(|&(nz, nb)| nz * nb))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Zeta counts per (itype, l).
pub fn nzeta(coef: &Coef) -> Vec<Vec<usize>> {
    coef.iter()
        .map(|t| t.iter().map(DMatrix::nrows).collect())
        .collect()
}

/// Depth-first enumeration of leaves, zetas before radial components.
pub fn flatten(coef: &Coef) -> Vec<f64> {
    let mut out = Vec::new();
    for coef_t in coef {
        for coef_tl in coef_t {
            for z in 0..coef_tl.nrows() {
                for q in 0..coef_tl.ncols() {
                    out.push(coef_tl[(z, q)]);
                }
            }
        }
    }
    out
}

/// The ragged shape of `coef`.
pub fn nestpat(coef: &Coef) -> NestPat {
    NestPat {
        shape: coef
            .iter()
            .map(|t| t.iter().map(|m| (m.nrows(), m.ncols())).collect())
            .collect(),
    }
}

/// Rebuild a tensor from a flat leaf sequence and a pattern.
pub fn nest(xs: &[f64], pat: &NestPat) -> Result<Coef> {
    if xs.len() != pat.len() {
        return Err(OrbgenError::Shape(format!(
            "nest: {} leaves supplied, pattern demands {}",
            xs.len(),
            pat.len()
        )));
    }
    let mut it = xs.iter();
    let coef = pat
        .shape
        .iter()
        .map(|t| {
            t.iter()
                .map(|&(nz, nb)| {
                    // from_fn visits column-major; fill row-major by hand
                    let mut m = DMatrix::zeros(nz, nb);
                    for z in 0..nz {
                        for q in 0..nb {
                            m[(z, q)] = *it.next().expect("length checked above");
                        }
                    }
                    m
                })
                .collect()
        })
        .collect();
    Ok(coef)
}

/// Concatenate two coefficient tensors along nesting level `depth`
/// (0 = itype, 1 = l, 2 = zeta). Gluing zeta tiers of unequal radial
/// length zero-pads the shorter rows.
pub fn merge(a: &Coef, b: &Coef, depth: usize) -> Result<Coef> {
    match depth {
        0 => Ok(a.iter().chain(b.iter()).cloned().collect()),
        1 => {
            if a.len() != b.len() {
                return Err(OrbgenError::Shape(format!(
                    "merge at depth 1: {} vs {} types",
                    a.len(),
                    b.len()
                )));
            }
            Ok(a.iter()
                .zip(b.iter())
                .map(|(ta, tb)| ta.iter().chain(tb.iter()).cloned().collect())
                .collect())
        }
        2 => {
            if a.len() != b.len() {
                return Err(OrbgenError::Shape(format!(
                    "merge at depth 2: {} vs {} types",
                    a.len(),
                    b.len()
                )));
            }
            a.iter()
                .zip(b.iter())
                .map(|(ta, tb)| {
                    let nl = ta.len().max(tb.len());
                    (0..nl)
                        .map(|l| {
                            let ma = ta.get(l);
                            let mb = tb.get(l);
                            Ok(match (ma, mb) {
                                (Some(x), None) => x.clone(),
                                (None, Some(y)) => y.clone(),
                                (Some(x), Some(y)) => vstack_padded(x, y),
                                (None, None) => unreachable!(),
                            })
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .collect()
        }
        _ => Err(OrbgenError::Shape(format!(
            "merge: unsupported depth {depth}"
        ))),
    }
}

fn vstack_padded(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    if a.nrows() == 0 {
        return b.clone();
    }
    if b.nrows() == 0 {
        return a.clone();
    }
    let nb = a.ncols().max(b.ncols());
    let mut m = DMatrix::zeros(a.nrows() + b.nrows(), nb);
    for z in 0..a.nrows() {
        for q in 0..a.ncols() {
            m[(z, q)] = a[(z, q)];
        }
    }
    for z in 0..b.nrows() {
        for q in 0..b.ncols() {
            m[(a.nrows() + z, q)] = b[(z, q)];
        }
    }
    m
}
