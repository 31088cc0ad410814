//! LCAO reference data: sparse S/T matrices and plaintext wavefunction
//! coefficient files.
//!
//! The sparse files store one CSR block per R vector; summing the blocks
//! yields the Gamma-point matrix. Both S/T and the wavefunction columns
//! arrive in `(.., l, q, m)` order and are permuted into the engine's
//! `(.., l, m, q)` order here.

use nalgebra::{Complex, DMatrix};

use crate::dataset::{ConfigRecord, Weights};
use crate::basis::transform::NbesSpec;
use crate::error::{OrbgenError, Result};
use crate::index::{index_map_q, perm_zeta_m};
use crate::linalg::{cplx, CMatrix};

/// Geometry of an LCAO dataset, supplied by the caller (structure and
/// orbital files are parsed by external collaborators).
#[derive(Clone, Debug)]
pub struct LcaoGeometry {
    pub natom: Vec<usize>,
    pub lmax: Vec<usize>,
    /// Radial counts per l, shared across types.
    pub nbes: Vec<usize>,
    pub rcut: f64,
}

/// Sum the R-blocks of an ABACUS sparse-matrix file into the Gamma-point
/// dense matrix.
pub fn parse_csr(text: &str) -> Result<DMatrix<f64>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let dim_line = lines
        .by_ref()
        .find(|l| l.contains("Matrix Dimension"))
        .ok_or_else(|| OrbgenError::MalformedDataset("missing 'Matrix Dimension' line".into()))?;
    let dim: usize = last_token(dim_line)?;
    let nblock_line = lines
        .next()
        .filter(|l| l.contains("Matrix number"))
        .ok_or_else(|| OrbgenError::MalformedDataset("missing 'Matrix number' line".into()))?;
    let nblock: usize = last_token(nblock_line)?;

    let mut mat = DMatrix::zeros(dim, dim);
    for _ in 0..nblock {
        let header = lines
            .next()
            .ok_or_else(|| OrbgenError::MalformedDataset("truncated R-block header".into()))?;
        let head: Vec<&str> = header.split_whitespace().collect();
        if head.len() != 4 {
            return Err(OrbgenError::MalformedDataset(format!(
                "R-block header '{header}'"
            )));
        }
        let nnz: usize = head[3]
            .parse()
            .map_err(|_| OrbgenError::MalformedDataset(format!("R-block header '{header}'")))?;
        if nnz == 0 {
            continue;
        }

        let values: Vec<f64> = numbers(next_line(&mut lines, "CSR values")?)?;
        let cols: Vec<usize> = numbers(next_line(&mut lines, "CSR column indices")?)?;
        let ptr: Vec<usize> = numbers(next_line(&mut lines, "CSR row pointers")?)?;
        if values.len() != nnz || cols.len() != nnz || ptr.len() != dim + 1 {
            return Err(OrbgenError::MalformedDataset(format!(
                "CSR block sizes: {} values, {} columns, {} pointers for dim {dim}, nnz {nnz}",
                values.len(),
                cols.len(),
                ptr.len()
            )));
        }
        for row in 0..dim {
            for i in ptr[row]..ptr[row + 1] {
                let col = cols[i];
                if col >= dim {
                    return Err(OrbgenError::MalformedDataset(format!(
                        "CSR column index {col} outside dimension {dim}"
                    )));
                }
                mat[(row, col)] += values[i];
            }
        }
    }
    Ok(mat)
}

pub fn read_csr(path: &std::path::Path) -> Result<DMatrix<f64>> {
    parse_csr(&std::fs::read_to_string(path)?)
}

/// One k point of a plaintext LCAO wavefunction file.
#[derive(Clone, Debug)]
pub struct WfcLcao {
    /// `(nbands, nao)` coefficient rows.
    pub coef: CMatrix,
    pub energy: Vec<f64>,
    pub occupation: Vec<f64>,
}

/// Parse a plaintext LCAO wavefunction file.
///
/// Gamma-only files carry real coefficients; k-resolved files (those with
/// a k-vector line after the index) carry interleaved (re, im) pairs.
pub fn parse_wfc_lcao(text: &str) -> Result<WfcLcao> {
    // annotations like "(band)" are stripped; only numbers remain
    let nums: Vec<f64> = text
        .split_whitespace()
        .filter(|t| !t.starts_with('('))
        .map(|t| {
            t.parse()
                .map_err(|_| OrbgenError::MalformedDataset(format!("unparsable value '{t}'")))
        })
        .collect::<Result<_>>()?;

    // header is either [ik, nbands, nao] or [ik, kx, ky, kz, nbands, nao];
    // the total length decides, complex data goes with an explicit k
    for (skip, complex) in [(3, false), (6, true)] {
        if nums.len() < skip {
            continue;
        }
        let nbands = nums[skip - 2] as usize;
        let nao = nums[skip - 1] as usize;
        let per_band = 3 + if complex { 2 * nao } else { nao };
        if nums.len() == skip + nbands * per_band {
            return Ok(assemble_wfc(&nums[skip..], nbands, nao, complex));
        }
    }
    Err(OrbgenError::MalformedDataset(
        "wavefunction file does not match its own band/basis counts".into(),
    ))
}

fn assemble_wfc(body: &[f64], nbands: usize, nao: usize, complex: bool) -> WfcLcao {
    let mut coef = CMatrix::zeros(nbands, nao);
    let mut energy = Vec::with_capacity(nbands);
    let mut occupation = Vec::with_capacity(nbands);
    let per_band = 3 + if complex { 2 * nao } else { nao };
    for b in 0..nbands {
        let rec = &body[b * per_band..(b + 1) * per_band];
        energy.push(rec[1]);
        occupation.push(rec[2]);
        for j in 0..nao {
            coef[(b, j)] = if complex {
                Complex::new(rec[3 + 2 * j], rec[4 + 2 * j])
            } else {
                Complex::new(rec[3 + j], 0.0)
            };
        }
    }
    WfcLcao {
        coef,
        energy,
        occupation,
    }
}

pub fn read_wfc_lcao(path: &std::path::Path) -> Result<WfcLcao> {
    parse_wfc_lcao(&std::fs::read_to_string(path)?)
}

/// Assemble a configuration record from Gamma-point LCAO data.
///
/// `wfcs` carries one entry per spin channel (nk = 1 or 2); S and T are
/// shared. The overlap slice of `mo_mo` is taken as exactly one.
pub fn load_config_lcao(
    geom: &LcaoGeometry,
    s: &DMatrix<f64>,
    t: &DMatrix<f64>,
    wfcs: &[WfcLcao],
    weight: Weights,
) -> Result<ConfigRecord> {
    let Weights { wov, wop } = weight;
    let nbes_spec = NbesSpec::PerL(geom.nbes.clone());
    let nbes = nbes_spec.resolve(&geom.lmax)?;
    let (_, lin2comp) = index_map_q(&geom.natom, &geom.lmax, &nbes);
    let njy = lin2comp.len();

    if s.shape() != (njy, njy) || t.shape() != (njy, njy) {
        return Err(OrbgenError::MalformedDataset(format!(
            "S/T dimension {:?}/{:?} does not match the geometry's {njy} basis functions",
            s.shape(),
            t.shape()
        )));
    }
    let nk = wfcs.len();
    if nk == 0 || nk > 2 {
        return Err(OrbgenError::MalformedDataset(format!(
            "{nk} spin channels; expected 1 or 2"
        )));
    }
    let nbands = wfcs[0].coef.nrows();
    for w in wfcs {
        if w.coef.shape() != (nbands, njy) {
            return Err(OrbgenError::MalformedDataset(format!(
                "wavefunction shape {:?} does not match ({nbands}, {njy})",
                w.coef.shape()
            )));
        }
    }

    // upstream order is (.., l, q, m); permute into engine order
    let p = perm_zeta_m(&lin2comp);
    let s_e = DMatrix::from_fn(njy, njy, |i, j| s[(p[i], p[j])]);
    let t_e = DMatrix::from_fn(njy, njy, |i, j| t[(p[i], p[j])]);
    let wfc_e: Vec<CMatrix> = wfcs
        .iter()
        .map(|w| CMatrix::from_fn(nbands, njy, |b, j| w.coef[(b, p[j])]))
        .collect();

    let s_c = cplx(&s_e);
    let t_c = cplx(&t_e);

    let mo_jy_ov: Vec<CMatrix> = wfc_e.iter().map(|w| w.conjugate() * &s_c).collect();
    let mo_jy_op: Vec<CMatrix> = wfc_e.iter().map(|w| w.conjugate() * &t_c).collect();

    // the reference states are orthonormal; their kinetic expectation
    // comes from the wavefunctions themselves
    let mo_mo_ov = DMatrix::from_element(nk, nbands, 1.0);
    let mo_mo_op = DMatrix::from_fn(nk, nbands, |k, b| {
        (wfc_e[k].row(b).conjugate() * &t_c * wfc_e[k].row(b).transpose())[(0, 0)].re
    });

    let wk = vec![1.0 / nk as f64; nk];
    Ok(ConfigRecord {
        ntype: geom.natom.len(),
        natom: geom.natom.clone(),
        lmax: geom.lmax.clone(),
        rcut: geom.rcut,
        nbes: nbes_spec,
        nk,
        wk,
        kpt: vec![[0.0, 0.0, 0.0]; nk],
        nbands,
        mo_mo: [mo_mo_ov.clone(), &mo_mo_ov * wov + &mo_mo_op * wop],
        mo_jy: [
            mo_jy_ov.clone(),
            mo_jy_ov
                .iter()
                .zip(mo_jy_op.iter())
                .map(|(a, b)| a * Complex::new(wov, 0.0) + b * Complex::new(wop, 0.0))
                .collect(),
        ],
        jy_jy: [
            vec![s_e.clone(); nk],
            vec![&s_e * wov + &t_e * wop; nk],
        ],
    })
}

fn last_token<T: std::str::FromStr>(line: &str) -> Result<T> {
    line.split_whitespace()
        .last()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| OrbgenError::MalformedDataset(format!("unparsable line '{line}'")))
}

fn next_line<'a, I: Iterator<Item = &'a str>>(lines: &mut I, what: &str) -> Result<&'a str> {
    lines
        .next()
        .ok_or_else(|| OrbgenError::MalformedDataset(format!("truncated {what}")))
}

fn numbers<T: std::str::FromStr>(line: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|t| {
            t.parse()
                .map_err(|_| OrbgenError::MalformedDataset(format!("unparsable value '{t}'")))
        })
        .collect()
}
