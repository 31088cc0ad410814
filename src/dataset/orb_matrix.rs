//! Parser for "orb_matrix" reference-data files.
//!
//! The format is whitespace-token driven: scalar values immediately
//! precede their label (`1 ntype`, `7 rcut_Jlq`, ...) and bulk data sits
//! in `<TAG> ... </TAG>` sections. Complex arrays are stored as
//! interleaved (re, im) pairs.

use itertools::Itertools;
use nalgebra::{Complex, DMatrix};

use crate::error::{OrbgenError, Result};
use crate::index::{index_map, nao, Comp};
use crate::linalg::CMatrix;

/// Imaginary residual allowed on the spherical-wave overlap, which must
/// be real.
const JY_JY_IMAG_TOL: f64 = 1e-12;

/// Parsed content of one orb_matrix file.
#[derive(Clone, Debug)]
pub struct OrbMat {
    pub ntype: usize,
    pub natom: Vec<usize>,
    pub ecutwfc: f64,
    pub ecutjlq: f64,
    pub rcut: f64,
    pub lmax: Vec<usize>,
    pub nbands: usize,
    pub nbes: usize,
    pub nk: usize,
    pub kpt: Vec<[f64; 3]>,
    pub wk: Vec<f64>,
    /// `<mo|jy>` per k point, `(nbands, nao*nbes)`; the file stores
    /// `<jy|mo>`, which is conjugated on load.
    pub mo_jy: Vec<CMatrix>,
    /// `<jy|jy>` per k point, `(nao*nbes, nao*nbes)`, reshaped so the
    /// radial index is innermost within each magnetic index.
    pub jy_jy: Vec<DMatrix<f64>>,
    /// `<mo|mo>` as a `(nk, nbands)` table.
    pub mo_mo: DMatrix<f64>,
    pub lin2comp: Vec<Comp>,
}

/// Parse an orb_matrix file from its text content.
pub fn parse_orb_mat(text: &str) -> Result<OrbMat> {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let ntype: usize = value_before(&tokens, "ntype")?;
    let ecut_pos = tokens
        .iter()
        .position(|&t| t == "ecutwfc")
        .ok_or_else(|| missing("ecutwfc"))?;
    let natom: Vec<usize> = tokens[..ecut_pos]
        .iter()
        .enumerate()
        .filter(|&(_, &t)| t == "na")
        .map(|(i, _)| parse_at(&tokens, i.checked_sub(1), "na"))
        .collect::<Result<_>>()?;
    if natom.len() != ntype {
        return Err(OrbgenError::MalformedDataset(format!(
            "{} 'na' entries for ntype = {ntype}",
            natom.len()
        )));
    }

    let ecutwfc: f64 = value_before(&tokens, "ecutwfc")?;
    let ecutjlq: f64 = value_before(&tokens, "ecutwfc_jlq")?;
    let rcut: f64 = value_before(&tokens, "rcut_Jlq")?;
    let lmax_common: usize = value_before(&tokens, "lmax")?;
    let nk: usize = value_before(&tokens, "nks")?;
    let nbands: usize = value_before(&tokens, "nbands")?;
    let nbes: usize = value_before(&tokens, "ne")?;

    // plane-wave runs share one lmax across species
    let lmax = vec![lmax_common; ntype];

    let kinfo = floats(section(&tokens, "WEIGHT_OF_KPOINTS")?)?;
    if kinfo.len() != 4 * nk {
        return Err(OrbgenError::MalformedDataset(format!(
            "k-point table has {} values, expected {}",
            kinfo.len(),
            4 * nk
        )));
    }
    let kpt: Vec<[f64; 3]> = kinfo
        .chunks_exact(4)
        .map(|row| [row[0], row[1], row[2]])
        .collect();
    let wk: Vec<f64> = kinfo.chunks_exact(4).map(|row| row[3]).collect();

    let (_, lin2comp) = index_map(&natom, &lmax);
    let nao = nao(&natom, &lmax);
    let njy = nao * nbes;

    // <jy|mo>, conjugated to <mo|jy>
    let q = complexes(section(&tokens, "OVERLAP_Q")?)?;
    if q.len() != nk * nbands * njy {
        return Err(OrbgenError::MalformedDataset(format!(
            "OVERLAP_Q has {} entries, expected {}",
            q.len(),
            nk * nbands * njy
        )));
    }
    let mo_jy: Vec<CMatrix> = (0..nk)
        .map(|k| {
            CMatrix::from_fn(nbands, njy, |b, mu| q[(k * nbands + b) * njy + mu].conj())
        })
        .collect();

    // <jy|jy>: stored (nk, nao, nao, nbes, nbes); permuted so that the
    // radial index becomes innermost within each magnetic index
    let sq = complexes(section(&tokens, "OVERLAP_Sq")?)?;
    if sq.len() != nk * njy * njy {
        return Err(OrbgenError::MalformedDataset(format!(
            "OVERLAP_Sq has {} entries, expected {}",
            sq.len(),
            nk * njy * njy
        )));
    }
    let imag_max = sq.iter().map(|z| z.im.abs()).fold(0.0, f64::max);
    if imag_max > JY_JY_IMAG_TOL {
        return Err(OrbgenError::MalformedDataset(format!(
            "OVERLAP_Sq imaginary residual {imag_max:.3e} exceeds {JY_JY_IMAG_TOL:.0e}"
        )));
    }
    let jy_jy: Vec<DMatrix<f64>> = (0..nk)
        .map(|k| {
            DMatrix::from_fn(njy, njy, |row, col| {
                let (mu1, q1) = (row / nbes, row % nbes);
                let (mu2, q2) = (col / nbes, col % nbes);
                sq[(((k * nao + mu1) * nao + mu2) * nbes + q1) * nbes + q2].re
            })
        })
        .collect();

    let v = floats(section(&tokens, "OVERLAP_V")?)?;
    if v.len() != nk * nbands {
        return Err(OrbgenError::MalformedDataset(format!(
            "OVERLAP_V has {} entries, expected {}",
            v.len(),
            nk * nbands
        )));
    }
    let mo_mo = DMatrix::from_fn(nk, nbands, |k, b| v[k * nbands + b]);

    Ok(OrbMat {
        ntype,
        natom,
        ecutwfc,
        ecutjlq,
        rcut,
        lmax,
        nbands,
        nbes,
        nk,
        kpt,
        wk,
        mo_jy,
        jy_jy,
        mo_mo,
        lin2comp,
    })
}

/// Parse an orb_matrix file from disk.
pub fn read_orb_mat(path: &std::path::Path) -> Result<OrbMat> {
    parse_orb_mat(&std::fs::read_to_string(path)?)
}

fn missing(what: &str) -> OrbgenError {
    OrbgenError::MalformedDataset(format!("missing token/section '{what}'"))
}

fn parse_at<T: std::str::FromStr>(tokens: &[&str], i: Option<usize>, label: &str) -> Result<T> {
    let i = i.ok_or_else(|| missing(label))?;
    tokens[i].parse().map_err(|_| {
        OrbgenError::MalformedDataset(format!("unparsable value '{}' before '{label}'", tokens[i]))
    })
}

/// The scalar convention of the format: the value precedes its label.
fn value_before<T: std::str::FromStr>(tokens: &[&str], label: &str) -> Result<T> {
    let i = tokens
        .iter()
        .position(|&t| t == label)
        .ok_or_else(|| missing(label))?;
    parse_at(tokens, i.checked_sub(1), label)
}

fn section<'a>(tokens: &'a [&str], tag: &str) -> Result<&'a [&'a str]> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = tokens
        .iter()
        .position(|&t| t == open)
        .ok_or_else(|| missing(tag))?;
    let end = tokens
        .iter()
        .position(|&t| t == close)
        .ok_or_else(|| missing(tag))?;
    Ok(&tokens[start + 1..end])
}

fn floats(tokens: &[&str]) -> Result<Vec<f64>> {
    tokens
        .iter()
        .map(|t| {
            t.parse().map_err(|_| {
                OrbgenError::MalformedDataset(format!("unparsable number '{t}'"))
            })
        })
        .collect()
}

fn complexes(tokens: &[&str]) -> Result<Vec<Complex<f64>>> {
    if tokens.len() % 2 != 0 {
        return Err(OrbgenError::MalformedDataset(
            "odd number of values in a complex section".into(),
        ));
    }
    floats(tokens).map(|v| v.into_iter().tuples().map(|(re, im)| Complex::new(re, im)).collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fmt::Write;

    /// A miniature file with the real grammar: 1 atom, lmax 1, 2 radial
    /// components, 1 k point, 2 bands. Values are index-coded so the
    /// axis permutations are visible.
    pub(crate) fn miniature(imag_jy_jy: f64) -> String {
        let (nbands, nao, nbes) = (2usize, 4usize, 2usize);
        let njy = nao * nbes;
        let mut s = String::new();
        s.push_str("1 ntype\n1 na\n40 ecutwfc\n40 ecutwfc_jlq\n7 rcut_Jlq\n");
        s.push_str("8 kmesh\n0.01 dr\n1 lmax\n1 nks\n2 nbands\n2 ne\n");
        s.push_str("<WEIGHT_OF_KPOINTS>\n0 0 0 1.0\n</WEIGHT_OF_KPOINTS>\n");

        s.push_str("<OVERLAP_Q>\n");
        for b in 0..nbands {
            for mu in 0..njy {
                let idx = (b * njy + mu) as f64;
                writeln!(s, "{} {}", 0.1 * idx, 0.01 * idx).unwrap();
            }
        }
        s.push_str("</OVERLAP_Q>\n");

        s.push_str("<OVERLAP_Sq>\n");
        for mu1 in 0..nao {
            for mu2 in 0..nao {
                for q1 in 0..nbes {
                    for q2 in 0..nbes {
                        let code = 1000.0 * mu1 as f64
                            + 100.0 * mu2 as f64
                            + 10.0 * q1 as f64
                            + q2 as f64;
                        writeln!(s, "{code} {imag_jy_jy}").unwrap();
                    }
                }
            }
        }
        s.push_str("</OVERLAP_Sq>\n");

        s.push_str("<OVERLAP_V>\n1.0 1.0\n</OVERLAP_V>\n");
        s
    }

    #[test]
    fn parses_scalars_and_kpoints() {
        let dat = parse_orb_mat(&miniature(0.0)).unwrap();
        assert_eq!(dat.ntype, 1);
        assert_eq!(dat.natom, vec![1]);
        assert_eq!(dat.ecutwfc, 40.0);
        assert_eq!(dat.ecutjlq, 40.0);
        assert_eq!(dat.rcut, 7.0);
        assert_eq!(dat.lmax, vec![1]);
        assert_eq!(dat.nk, 1);
        assert_eq!(dat.nbands, 2);
        assert_eq!(dat.nbes, 2);
        assert_eq!(dat.wk, vec![1.0]);
        assert_eq!(dat.kpt, vec![[0.0, 0.0, 0.0]]);
        assert_eq!(dat.lin2comp.len(), 4);
    }

    #[test]
    fn conjugates_mo_jy() {
        let dat = parse_orb_mat(&miniature(0.0)).unwrap();
        assert_eq!(dat.mo_jy[0].shape(), (2, 8));
        // entry (1, 3): flat index 11, stored (1.1, 0.11), conjugated
        let z = dat.mo_jy[0][(1, 3)];
        assert!((z.re - 1.1).abs() < 1e-12 && (z.im + 0.11).abs() < 1e-12);
    }

    #[test]
    fn permutes_jy_jy_axes() {
        let dat = parse_orb_mat(&miniature(0.0)).unwrap();
        assert_eq!(dat.jy_jy[0].shape(), (8, 8));
        // (mu1, q1, mu2, q2) = (3, 1, 2, 0) -> stored code 3210
        assert_eq!(dat.jy_jy[0][(3 * 2 + 1, 2 * 2)], 3210.0);
    }

    #[test]
    fn rejects_imaginary_jy_jy() {
        assert!(matches!(
            parse_orb_mat(&miniature(1e-9)),
            Err(OrbgenError::MalformedDataset(_))
        ));
    }

    #[test]
    fn rejects_missing_section() {
        let text = miniature(0.0).replace("<OVERLAP_V>", "<OVERLAP_W>");
        assert!(matches!(
            parse_orb_mat(&text),
            Err(OrbgenError::MalformedDataset(_))
        ));
    }

    #[test]
    fn rejects_size_mismatch() {
        // drop one band from OVERLAP_V
        let text = miniature(0.0).replace("<OVERLAP_V>\n1.0 1.0\n", "<OVERLAP_V>\n1.0\n");
        assert!(matches!(
            parse_orb_mat(&text),
            Err(OrbgenError::MalformedDataset(_))
        ));
    }
}
