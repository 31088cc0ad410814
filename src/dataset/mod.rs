//! Reference-geometry datasets consumed by the spillage engine.
//!
//! A configuration record stacks two slices along its leading axis:
//! `c = 0` holds plain overlaps and `c = 1` the operator-weighted
//! combination `wov * overlap + wop * operator`. Loaders transform the
//! raw spherical-wave data into the working basis (reduced or
//! normalized) once, so the engine never sees raw data.

pub mod lcao;
pub mod orb_matrix;

use log::debug;
use nalgebra::DMatrix;
use serde::Deserialize;

use crate::basis::radial::raw_transform_coef;
use crate::basis::transform::{jy2ao, NbesSpec};
use crate::error::{OrbgenError, Result};
use crate::linalg::{cplx, CMatrix};

pub use orb_matrix::{parse_orb_mat, read_orb_mat, OrbMat};

/// Weights of the stacked `c = 1` slice: `wov * overlap + wop * operator`.
/// The operator is conventionally the kinetic-energy matrix; the core
/// does not interpret it.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Weights {
    pub wov: f64,
    pub wop: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { wov: 0.0, wop: 1.0 }
    }
}

/// Overlap data of one reference geometry, in the working basis.
#[derive(Clone, Debug)]
pub struct ConfigRecord {
    pub ntype: usize,
    pub natom: Vec<usize>,
    pub lmax: Vec<usize>,
    pub rcut: f64,
    /// Radial counts in the working basis (one fewer than raw when
    /// reduced).
    pub nbes: NbesSpec,
    pub nk: usize,
    pub wk: Vec<f64>,
    pub kpt: Vec<[f64; 3]>,
    pub nbands: usize,
    /// `(nk, nbands)` per slice.
    pub mo_mo: [DMatrix<f64>; 2],
    /// Per slice, per k: `(nbands, njy)`.
    pub mo_jy: [Vec<CMatrix>; 2],
    /// Per slice, per k: `(njy, njy)`.
    pub jy_jy: [Vec<DMatrix<f64>>; 2],
}

impl ConfigRecord {
    /// Total spherical-wave count in the working basis.
    pub fn njy(&self) -> Result<usize> {
        let nbes = self.nbes.resolve(&self.lmax)?;
        Ok(self
            .natom
            .iter()
            .zip(nbes.iter())
            .map(|(&na, row)| {
                na * row
                    .iter()
                    .enumerate()
                    .map(|(l, &nb)| (2 * l + 1) * nb)
                    .sum::<usize>()
            })
            .sum())
    }
}

/// The overlap and operator files of one geometry must describe the same
/// system: identical basis enumeration, cutoff and k sampling.
pub fn assert_consistency(ov: &OrbMat, op: &OrbMat) -> Result<()> {
    if ov.lin2comp != op.lin2comp {
        return Err(OrbgenError::Inconsistent(
            "paired files enumerate different bases".into(),
        ));
    }
    if ov.rcut != op.rcut {
        return Err(OrbgenError::Inconsistent(format!(
            "rcut {} vs {}",
            ov.rcut, op.rcut
        )));
    }
    if ov.wk != op.wk {
        return Err(OrbgenError::Inconsistent("k-point weights differ".into()));
    }
    if ov.kpt != op.kpt {
        return Err(OrbgenError::Inconsistent("k-points differ".into()));
    }
    if ov.nbes != op.nbes || ov.nbands != op.nbands {
        return Err(OrbgenError::Inconsistent(format!(
            "basis/band counts differ: nbes {} vs {}, nbands {} vs {}",
            ov.nbes, op.nbes, ov.nbands, op.nbands
        )));
    }
    Ok(())
}

/// Assemble a configuration record from a parsed overlap/operator pair,
/// transforming the raw spherical-wave axes into the working basis.
pub fn load_config(ov: &OrbMat, op: &OrbMat, weight: Weights, reduced: bool) -> Result<ConfigRecord> {
    assert_consistency(ov, op)?;
    let Weights { wov, wop } = weight;

    // raw -> working-basis transformation, block-diagonal over (atom, l, m)
    let coef = raw_transform_coef(&ov.lmax, ov.nbes, ov.rcut, reduced)?;
    let c = jy2ao(&coef, &ov.natom, &ov.lmax, &NbesSpec::Uniform(ov.nbes))?;
    let cc = cplx(&c);

    let weighted = |a: &DMatrix<f64>, b: &DMatrix<f64>| a * wov + b * wop;
    let weighted_c = |a: &CMatrix, b: &CMatrix| a * cplx_scalar(wov) + b * cplx_scalar(wop);

    let mo_jy = [
        ov.mo_jy.iter().map(|m| m * &cc).collect::<Vec<_>>(),
        ov.mo_jy
            .iter()
            .zip(op.mo_jy.iter())
            .map(|(a, b)| weighted_c(a, b) * &cc)
            .collect(),
    ];
    let jy_jy = [
        ov.jy_jy
            .iter()
            .map(|m| c.transpose() * m * &c)
            .collect::<Vec<_>>(),
        ov.jy_jy
            .iter()
            .zip(op.jy_jy.iter())
            .map(|(a, b)| c.transpose() * weighted(a, b) * &c)
            .collect(),
    ];
    let mo_mo = [ov.mo_mo.clone(), weighted(&ov.mo_mo, &op.mo_mo)];

    let record = ConfigRecord {
        ntype: ov.ntype,
        natom: ov.natom.clone(),
        lmax: ov.lmax.clone(),
        rcut: ov.rcut,
        nbes: NbesSpec::Uniform(if reduced { ov.nbes - 1 } else { ov.nbes }),
        nk: ov.nk,
        wk: ov.wk.clone(),
        kpt: ov.kpt.clone(),
        nbands: ov.nbands,
        mo_mo,
        mo_jy,
        jy_jy,
    };
    debug!(
        "loaded configuration: natom = {:?}, lmax = {:?}, njy = {}, nbands = {}, nk = {}",
        record.natom,
        record.lmax,
        record.njy()?,
        record.nbands,
        record.nk
    );
    Ok(record)
}

fn cplx_scalar(x: f64) -> nalgebra::Complex<f64> {
    nalgebra::Complex::new(x, 0.0)
}
