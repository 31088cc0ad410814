//! Index algebra between composite quantum-number tuples and flat offsets.
//!
//! Composite tuples are `(itype, iatom, l, m_enc)` on the orbital side and
//! `(itype, iatom, l, m_enc, q)` on the spherical-wave side, enumerated in
//! lexicographic order. The magnetic index is encoded as
//! `m_enc = 2|m| - [m > 0]`, i.e. m = 0, -1, +1, -2, +2, ... map to
//! 0, 1, 2, 3, 4, ...

use std::collections::HashMap;

/// Orbital-side composite tuple `(itype, iatom, l, m_enc)`.
pub type Comp = (usize, usize, usize, usize);
/// Spherical-wave-side composite tuple `(itype, iatom, l, m_enc, q)`.
pub type CompQ = (usize, usize, usize, usize, usize);

/// Total number of (l, m) orbital slots: `sum_t natom[t] * (lmax[t]+1)^2`.
pub fn nao(natom: &[usize], lmax: &[usize]) -> usize {
    natom
        .iter()
        .zip(lmax.iter())
        .map(|(&na, &lm)| na * (lm + 1) * (lm + 1))
        .sum()
}

/// Bijection between `(itype, iatom, l, m_enc)` tuples and flat offsets.
pub fn index_map(natom: &[usize], lmax: &[usize]) -> (HashMap<Comp, usize>, Vec<Comp>) {
    let mut lin2comp = Vec::with_capacity(nao(natom, lmax));
    for (itype, (&na, &lm)) in natom.iter().zip(lmax.iter()).enumerate() {
        for iatom in 0..na {
            for l in 0..=lm {
                for m in 0..2 * l + 1 {
                    lin2comp.push((itype, iatom, l, m));
                }
            }
        }
    }
    let comp2lin = lin2comp.iter().enumerate().map(|(i, &c)| (c, i)).collect();
    (comp2lin, lin2comp)
}

/// Bijection between `(itype, iatom, l, m_enc, q)` tuples and flat
/// offsets; the radial index `q` is the innermost axis and runs over
/// `nbes[itype][l]`.
pub fn index_map_q(
    natom: &[usize],
    lmax: &[usize],
    nbes: &[Vec<usize>],
) -> (HashMap<CompQ, usize>, Vec<CompQ>) {
    let mut lin2comp = Vec::new();
    for (itype, (&na, &lm)) in natom.iter().zip(lmax.iter()).enumerate() {
        for iatom in 0..na {
            for l in 0..=lm {
                for m in 0..2 * l + 1 {
                    for q in 0..nbes[itype][l] {
                        lin2comp.push((itype, iatom, l, m, q));
                    }
                }
            }
        }
    }
    let comp2lin = lin2comp.iter().enumerate().map(|(i, &c)| (c, i)).collect();
    (comp2lin, lin2comp)
}

/// Permutation relating the upstream `(.., l, q, m_enc)` storage order to
/// the engine's `(.., l, m_enc, q)` order.
///
/// `lin2comp` is the engine-ordered tuple list (from [`index_map_q`]);
/// entry `i` of the result is the flat offset, in the upstream order, of
/// the engine's `i`-th basis function: `engine[i] = upstream[p[i]]`.
pub fn perm_zeta_m(lin2comp: &[CompQ]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lin2comp.len()).collect();
    order.sort_by_key(|&i| {
        let (t, a, l, m, q) = lin2comp[i];
        (t, a, l, q, m)
    });
    let mut p = vec![0; lin2comp.len()];
    for (rank, &i) in order.iter().enumerate() {
        p[i] = rank;
    }
    p
}
