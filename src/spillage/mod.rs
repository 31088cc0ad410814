//! Generalized spillage function and its minimization.
//!
//! The engine holds immutable configuration records plus tables that
//! depend only on the frozen set and on the nesting shape of the
//! optimization coefficient. Between optimizer iterations only
//! coefficient values change, so the tables stay valid for a whole
//! `opt` call.

use std::ops::Range;

use log::debug;
use nalgebra::{DMatrix, DVector, QR};
use rayon::prelude::*;

use crate::basis::transform::{jy2ao, NbesSpec};
use crate::dataset::{load_config, read_orb_mat, ConfigRecord, Weights};
use crate::error::{OrbgenError, Result};
use crate::linalg::{cplx, mrdiv, rfrob, rfrob_rc, rfrob_rows, CMatrix};
use crate::nesting::{flatten, nest, nestpat, Coef};
use crate::optimization::{minimize, OptOptions};

/// Per-configuration tables filled by [`Spillage::tab_frozen`].
struct FrozenTab {
    /// Band-wise spillage contribution of the frozen subspace.
    spill: DVector<f64>,
    /// `<mo|P_frozen|jy>` and `<mo|P_frozen op|jy>`, per slice and k.
    mo_pfrozen_jy: [Vec<CMatrix>; 2],
}

/// Per-configuration tables filled by [`Spillage::tab_deriv`].
struct DerivTab {
    /// Leaf count of the coefficient shape the table was built for.
    ncoef: usize,
    /// `d<ao|jy>` and `d<ao|op|jy>`, per slice, coefficient and k.
    dao_jy: [Vec<Vec<DMatrix<f64>>>; 2],
    /// `d<mo|Q_frozen|ao>` and `d<mo|Q_frozen op|ao>`, same layout.
    mo_qfrozen_dao: [Vec<Vec<CMatrix>>; 2],
}

pub struct Spillage {
    reduced: bool,
    rcut: Option<f64>,
    config: Vec<ConfigRecord>,
    frozen: Option<Vec<FrozenTab>>,
    deriv: Vec<DerivTab>,
}

impl Spillage {
    pub fn new(reduced: bool) -> Self {
        Self {
            reduced,
            rcut: None,
            config: Vec::new(),
            frozen: None,
            deriv: Vec::new(),
        }
    }

    pub fn reduced(&self) -> bool {
        self.reduced
    }

    pub fn nconf(&self) -> usize {
        self.config.len()
    }

    pub fn config(&self, iconf: usize) -> &ConfigRecord {
        &self.config[iconf]
    }

    /// Append a configuration record. All records of one engine share a
    /// cutoff radius; the first add pins it.
    pub fn add(&mut self, dat: ConfigRecord) -> Result<()> {
        match self.rcut {
            None => self.rcut = Some(dat.rcut),
            Some(rcut) if rcut == dat.rcut => {}
            Some(rcut) => {
                return Err(OrbgenError::Inconsistent(format!(
                    "configuration rcut {} differs from the engine's {rcut}",
                    dat.rcut
                )));
            }
        }
        self.config.push(dat);
        // existing tables do not cover the new record
        self.frozen = None;
        self.deriv.clear();
        Ok(())
    }

    /// Load a plane-wave overlap/operator file pair and append it.
    pub fn add_pw(
        &mut self,
        file_ov: &std::path::Path,
        file_op: &std::path::Path,
        weight: Weights,
    ) -> Result<()> {
        let ov = read_orb_mat(file_ov)?;
        let op = read_orb_mat(file_op)?;
        self.add(load_config(&ov, &op, weight, self.reduced)?)
    }

    /// Tabulate the frozen-subspace contributions (§ frozen orbitals):
    /// the band-wise spillage offset and `<mo|P_frozen (op)|jy>`, where
    /// `P_frozen = |frozen_dual><frozen|`.
    pub fn tab_frozen(&mut self, coef_frozen: Option<&Coef>) -> Result<()> {
        let Some(coef_frozen) = coef_frozen else {
            self.frozen = None;
            return Ok(());
        };

        let mut tabs = Vec::with_capacity(self.config.len());
        for dat in &self.config {
            let j = jy2ao(coef_frozen, &dat.natom, &dat.lmax, &dat.nbes)?;
            let jc = cplx(&j);

            // FF[c][k] = J^T jy_jy J,  MF[c][k] = mo_jy J
            let ff: [Vec<DMatrix<f64>>; 2] = [0usize, 1].map(|c| {
                dat.jy_jy[c]
                    .iter()
                    .map(|s| j.transpose() * s * &j)
                    .collect()
            });
            let mf: [Vec<CMatrix>; 2] =
                [0usize, 1].map(|c| dat.mo_jy[c].iter().map(|m| m * &jc).collect());

            // dual frame of the frozen orbitals, overlap metric only
            let mf_dual: Vec<CMatrix> = mf[0]
                .iter()
                .zip(ff[0].iter())
                .map(|(x, s)| mrdiv(x, s, "frozen-frozen overlap"))
                .collect::<Result<_>>()?;

            let mo_pfrozen_jy: [Vec<CMatrix>; 2] = [0usize, 1].map(|c| {
                mf_dual
                    .iter()
                    .zip(dat.jy_jy[c].iter())
                    .map(|(d, s)| d * cplx(&(j.transpose() * s)))
                    .collect()
            });

            // band-wise frozen spillage, summed over k with weights
            let mut spill = DVector::zeros(dat.nbands);
            for k in 0..dat.nk {
                let t = rfrob_rows(&(&mf_dual[k] * cplx(&ff[1][k])), &mf_dual[k])
                    - 2.0 * rfrob_rows(&mf_dual[k], &mf[1][k]);
                spill += dat.wk[k] * t;
            }

            tabs.push(FrozenTab {
                spill,
                mo_pfrozen_jy,
            });
        }
        self.frozen = Some(tabs);
        Ok(())
    }

    /// Tabulate the derivatives of `<ao|(op)|jy>` and
    /// `<mo|Q_frozen (op)|ao>` with respect to every coefficient leaf.
    /// Only the nesting shape of `coef` matters.
    pub fn tab_deriv(&mut self, coef: &Coef) -> Result<()> {
        let pat = nestpat(coef);
        let ncoef = pat.len();

        self.deriv.clear();
        for (iconf, dat) in self.config.iter().enumerate() {
            let mut dao_jy: [Vec<Vec<DMatrix<f64>>>; 2] = [Vec::new(), Vec::new()];
            let mut mo_qfrozen_dao: [Vec<Vec<CMatrix>>; 2] = [Vec::new(), Vec::new()];

            let mut one_hot = vec![0.0; ncoef];
            for i in 0..ncoef {
                one_hot[i] = 1.0;
                let ei = nest(&one_hot, &pat)?;
                one_hot[i] = 0.0;

                let ji = jy2ao(&ei, &dat.natom, &dat.lmax, &dat.nbes)?;
                let jic = cplx(&ji);

                for c in 0..2 {
                    dao_jy[c].push(
                        dat.jy_jy[c]
                            .iter()
                            .map(|s| ji.transpose() * s)
                            .collect::<Vec<_>>(),
                    );
                    mo_qfrozen_dao[c].push(
                        (0..dat.nk)
                            .map(|k| match &self.frozen {
                                Some(tabs) => {
                                    (&dat.mo_jy[c][k] - &tabs[iconf].mo_pfrozen_jy[c][k]) * &jic
                                }
                                None => &dat.mo_jy[c][k] * &jic,
                            })
                            .collect::<Vec<_>>(),
                    );
                }
            }
            debug!(
                "tab_deriv: configuration {iconf}, {ncoef} coefficients, nk = {}",
                dat.nk
            );
            self.deriv.push(DerivTab {
                ncoef,
                dao_jy,
                mo_qfrozen_dao,
            });
        }
        Ok(())
    }

    /// Generalized spillage of one configuration over the bands `ibands`,
    /// optionally with its analytic gradient re-nested into the shape of
    /// `coef`.
    pub fn generalize_spillage(
        &self,
        iconf: usize,
        coef: &Coef,
        ibands: &[usize],
        with_grad: bool,
    ) -> Result<(f64, Option<Coef>)> {
        let dat = &self.config[iconf];
        let nb = ibands.len();
        if nb == 0 || ibands.iter().any(|&b| b >= dat.nbands) {
            return Err(OrbgenError::Shape(format!(
                "band selection {ibands:?} outside the {} bands of configuration {iconf}",
                dat.nbands
            )));
        }
        let frozen = self.frozen.as_ref().map(|tabs| &tabs[iconf]);

        let m = jy2ao(coef, &dat.natom, &dat.lmax, &dat.nbes)?;
        let mc = cplx(&m);

        let mut spill: f64 = (0..dat.nk)
            .map(|k| {
                dat.wk[k]
                    * ibands
                        .iter()
                        .map(|&b| dat.mo_mo[1][(k, b)])
                        .sum::<f64>()
            })
            .sum();
        if let Some(tab) = frozen {
            spill += ibands.iter().map(|&b| tab.spill[b]).sum::<f64>();
        }

        // V[c][k] = <mo|Q_frozen (op)|ao> on the selected bands
        let v: [Vec<CMatrix>; 2] = [0usize, 1].map(|c| {
            (0..dat.nk)
                .map(|k| {
                    let full = match frozen {
                        Some(tab) => &dat.mo_jy[c][k] - &tab.mo_pfrozen_jy[c][k],
                        None => dat.mo_jy[c][k].clone(),
                    };
                    full.select_rows(ibands.iter()) * &mc
                })
                .collect()
        });
        // W[c][k] = <ao|(op)|ao>
        let w: [Vec<DMatrix<f64>>; 2] = [0usize, 1].map(|c| {
            dat.jy_jy[c]
                .iter()
                .map(|s| m.transpose() * s * &m)
                .collect()
        });

        let v_dual: Vec<CMatrix> = v[0]
            .iter()
            .zip(w[0].iter())
            .map(|(vk, wk)| mrdiv(vk, wk, "orbital overlap"))
            .collect::<Result<_>>()?;
        let vdagv: Vec<CMatrix> = v_dual.iter().map(|d| d.adjoint() * d).collect();

        for k in 0..dat.nk {
            spill += dat.wk[k]
                * (rfrob_rc(&w[1][k], &vdagv[k]) - 2.0 * rfrob(&v_dual[k], &v[1][k]));
        }
        spill /= nb as f64;

        if !with_grad {
            return Ok((spill, None));
        }

        let tab = self.deriv.get(iconf).ok_or_else(|| {
            OrbgenError::Shape("gradient requested before tab_deriv".into())
        })?;
        let pat = nestpat(coef);
        if tab.ncoef != pat.len() {
            return Err(OrbgenError::Shape(format!(
                "derivative tables cover {} coefficients, shape demands {}",
                tab.ncoef,
                pat.len()
            )));
        }

        // the k-resolved factor (V_dual W[1] - V[1]) W[0]^{-1} is shared
        // by every coefficient
        let resid: Vec<CMatrix> = (0..dat.nk)
            .map(|k| {
                mrdiv(
                    &(&v_dual[k] * cplx(&w[1][k]) - &v[1][k]),
                    &w[0][k],
                    "orbital overlap",
                )
            })
            .collect::<Result<_>>()?;

        let mut grad = vec![0.0; tab.ncoef];
        for (i, gi) in grad.iter_mut().enumerate() {
            for k in 0..dat.nk {
                let dw0 = plus_transpose(&tab.dao_jy[0][i][k] * &m);
                let dw1 = plus_transpose(&tab.dao_jy[1][i][k] * &m);

                let dv0 = tab.mo_qfrozen_dao[0][i][k].select_rows(ibands.iter());
                let dv1 = tab.mo_qfrozen_dao[1][i][k].select_rows(ibands.iter());

                *gi += dat.wk[k]
                    * (rfrob_rc(&dw1, &vdagv[k]) - 2.0 * rfrob(&v_dual[k], &dv1)
                        + 2.0 * rfrob(&(dv0 - &v_dual[k] * cplx(&dw0)), &resid[k]));
            }
            *gi /= nb as f64;
        }

        Ok((spill, Some(nest(&grad, &pat)?)))
    }

    /// Minimize the average generalized spillage of `iconfs` over the
    /// coefficients, with per-configuration band ranges and a dedicated
    /// worker pool of `nthreads`.
    ///
    /// Zetas of the result are orthonormalized within each (itype, l) by
    /// a thin QR factorization, which preserves their span.
    pub fn opt(
        &mut self,
        coef_init: &Coef,
        coef_frozen: Option<&Coef>,
        iconfs: &[usize],
        ibands: &[Range<usize>],
        options: &OptOptions,
        nthreads: usize,
    ) -> Result<Coef> {
        let nconf = iconfs.len();
        if nconf == 0 {
            return Err(OrbgenError::Shape("no configurations selected".into()));
        }
        if let Some(&bad) = iconfs.iter().find(|&&i| i >= self.config.len()) {
            return Err(OrbgenError::Shape(format!(
                "configuration index {bad} outside 0..{}",
                self.config.len()
            )));
        }
        let bands: Vec<Vec<usize>> = match ibands.len() {
            1 => vec![ibands[0].clone().collect(); nconf],
            n if n == nconf => ibands.iter().map(|r| r.clone().collect()).collect(),
            n => {
                return Err(OrbgenError::Shape(format!(
                    "{n} band ranges for {nconf} configurations"
                )));
            }
        };

        self.tab_frozen(coef_frozen)?;
        self.tab_deriv(coef_init)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build()
            .map_err(|e| OrbgenError::Io(std::io::Error::other(e)))?;

        let pat = nestpat(coef_init);
        let this: &Spillage = self;
        let eval = |x: &[f64]| -> Result<(f64, Vec<f64>)> {
            let c = nest(x, &pat)?;
            // fan out over configurations, reduce in index order so the
            // average is deterministic
            let parts: Vec<(f64, Coef)> = pool.install(|| {
                iconfs
                    .par_iter()
                    .zip(bands.par_iter())
                    .map(|(&ic, ib)| {
                        let (s, g) = this.generalize_spillage(ic, &c, ib, true)?;
                        let g = g.ok_or_else(|| {
                            OrbgenError::Shape("gradient evaluation returned no gradient".into())
                        })?;
                        Ok((s, g))
                    })
                    .collect::<Result<_>>()
            })?;

            let mut spill = 0.0;
            let mut grad = vec![0.0; x.len()];
            for (s, g) in &parts {
                spill += s;
                for (acc, v) in grad.iter_mut().zip(flatten(g)) {
                    *acc += v;
                }
            }
            spill /= nconf as f64;
            for v in &mut grad {
                *v /= nconf as f64;
            }
            Ok((spill, grad))
        };

        // coefficients live in [-1, 1] for numerical stability
        let res = minimize(&eval, flatten(coef_init), -1.0, 1.0, options)?;
        debug!(
            "opt: spillage {:.10e} after {} iterations (converged: {})",
            res.f, res.iterations, res.converged
        );

        let mut coef_opt = nest(&res.x, &pat)?;
        for coef_t in &mut coef_opt {
            for coef_tl in coef_t.iter_mut() {
                if coef_tl.nrows() > 0 {
                    let q = QR::new(coef_tl.transpose()).q();
                    *coef_tl = q.transpose();
                }
            }
        }
        Ok(coef_opt)
    }
}

fn plus_transpose(a: DMatrix<f64>) -> DMatrix<f64> {
    let t = a.transpose();
    a + t
}

/// Overlap spillage of a single-slice dataset.
///
/// A special case of the generalized spillage (operator = identity) kept
/// as a cross-check of that implementation; not used by the optimizer.
#[allow(clippy::too_many_arguments)]
pub fn overlap_spillage(
    natom: &[usize],
    lmax: &[usize],
    nbes: &NbesSpec,
    jy_jy: &[DMatrix<f64>],
    mo_jy: &[CMatrix],
    mo_mo: &DMatrix<f64>,
    wk: &[f64],
    coef: &Coef,
    ibands: &[usize],
    coef_frozen: Option<&Coef>,
) -> Result<f64> {
    let nk = wk.len();
    let mut spill: f64 = (0..nk)
        .map(|k| wk[k] * ibands.iter().map(|&b| mo_mo[(k, b)]).sum::<f64>())
        .sum();

    let m = jy2ao(coef, natom, lmax, nbes)?;
    let mc = cplx(&m);
    let mut v: Vec<CMatrix> = mo_jy
        .iter()
        .map(|mj| mj.select_rows(ibands.iter()) * &mc)
        .collect();
    let w: Vec<DMatrix<f64>> = jy_jy.iter().map(|s| m.transpose() * s * &m).collect();

    if let Some(coef_frozen) = coef_frozen {
        let j = jy2ao(coef_frozen, natom, lmax, nbes)?;
        let jc = cplx(&j);
        for k in 0..nk {
            let x = mo_jy[k].select_rows(ibands.iter()) * &jc;
            let s = j.transpose() * &jy_jy[k] * &j;
            let x_dual = mrdiv(&x, &s, "frozen-frozen overlap")?;
            v[k] -= &x_dual * cplx(&(j.transpose() * &jy_jy[k] * &m));
            spill -= wk[k] * rfrob(&x_dual, &x);
        }
    }

    for k in 0..nk {
        let v_dual = mrdiv(&v[k], &w[k], "orbital overlap")?;
        spill -= wk[k] * rfrob(&v_dual, &v[k]);
    }

    Ok(spill / ibands.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Complex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spd(n: usize, rng: &mut StdRng) -> DMatrix<f64> {
        let r = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-0.5..0.5));
        &r * r.transpose() / n as f64 + DMatrix::identity(n, n)
    }

    fn sym(n: usize, rng: &mut StdRng) -> DMatrix<f64> {
        let r = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-0.5..0.5));
        (&r + r.transpose()) * 0.5
    }

    fn randc(nr: usize, nc: usize, rng: &mut StdRng) -> CMatrix {
        CMatrix::from_fn(nr, nc, |_, _| {
            Complex::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5))
        })
    }

    fn randcoef(nzeta: &[Vec<usize>], nbes: usize, rng: &mut StdRng) -> Coef {
        nzeta
            .iter()
            .map(|t| {
                t.iter()
                    .map(|&nz| DMatrix::from_fn(nz, nbes, |_, _| rng.gen_range(-1.0..1.0)))
                    .collect()
            })
            .collect()
    }

    /// A synthetic configuration record with well-conditioned overlaps.
    /// With `op_equals_ov` the `c = 1` slice duplicates `c = 0`, which is
    /// the operator = identity special case.
    fn synth_config(
        natom: Vec<usize>,
        lmax: Vec<usize>,
        nbes: usize,
        nk: usize,
        nbands: usize,
        op_equals_ov: bool,
        rng: &mut StdRng,
    ) -> ConfigRecord {
        let njy: usize = natom
            .iter()
            .zip(lmax.iter())
            .map(|(&na, &lm)| na * (lm + 1) * (lm + 1) * nbes)
            .sum();

        let jy_ov: Vec<DMatrix<f64>> = (0..nk).map(|_| spd(njy, rng)).collect();
        let mo_ov: Vec<CMatrix> = (0..nk).map(|_| randc(nbands, njy, rng)).collect();
        let mm_ov = DMatrix::from_element(nk, nbands, 1.0);

        let (jy_op, mo_op, mm_op) = if op_equals_ov {
            (jy_ov.clone(), mo_ov.clone(), mm_ov.clone())
        } else {
            (
                (0..nk).map(|_| sym(njy, rng)).collect::<Vec<_>>(),
                (0..nk).map(|_| randc(nbands, njy, rng)).collect::<Vec<_>>(),
                DMatrix::from_fn(nk, nbands, |_, _| rng.gen_range(0.0..1.0)),
            )
        };

        let wk = match nk {
            1 => vec![1.0],
            _ => vec![0.6, 0.4],
        };
        ConfigRecord {
            ntype: natom.len(),
            natom,
            lmax,
            rcut: 7.0,
            nbes: NbesSpec::Uniform(nbes),
            nk,
            wk,
            kpt: vec![[0.0, 0.0, 0.0]; nk],
            nbands,
            mo_mo: [mm_ov, mm_op],
            mo_jy: [mo_ov, mo_op],
            jy_jy: [jy_ov, jy_op],
        }
    }

    #[test]
    fn identity_operator_recovers_overlap_spillage() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut engine = Spillage::new(true);
        engine
            .add(synth_config(vec![2], vec![2], 4, 1, 6, true, &mut rng))
            .unwrap();
        engine
            .add(synth_config(vec![3], vec![2], 4, 2, 6, true, &mut rng))
            .unwrap();

        let ibands: Vec<usize> = (0..5).collect();
        let coef = randcoef(&[vec![2, 2, 1]], 4, &mut rng);
        let frozen_list = [
            None,
            Some(randcoef(&[vec![1, 1]], 4, &mut rng)),
            Some(randcoef(&[vec![2, 1, 0]], 4, &mut rng)),
            Some(randcoef(&[vec![0, 1, 1]], 4, &mut rng)),
        ];

        for coef_frozen in &frozen_list {
            engine.tab_frozen(coef_frozen.as_ref()).unwrap();
            for iconf in 0..engine.nconf() {
                let dat = engine.config(iconf);
                let reference = overlap_spillage(
                    &dat.natom,
                    &dat.lmax,
                    &dat.nbes,
                    &dat.jy_jy[0],
                    &dat.mo_jy[0],
                    &dat.mo_mo[0],
                    &dat.wk,
                    &coef,
                    &ibands,
                    coef_frozen.as_ref(),
                )
                .unwrap();
                let (spill, _) = engine
                    .generalize_spillage(iconf, &coef, &ibands, false)
                    .unwrap();
                assert!(
                    (spill - reference).abs() < 1e-10,
                    "iconf {iconf}: {spill} vs {reference}"
                );
            }
        }
    }

    #[test]
    fn gradient_matches_central_differences() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut engine = Spillage::new(true);
        engine
            .add(synth_config(vec![1], vec![1], 3, 2, 4, false, &mut rng))
            .unwrap();

        let ibands: Vec<usize> = (0..3).collect();
        let coef = randcoef(&[vec![2, 1]], 3, &mut rng);
        let frozen_list = [None, Some(randcoef(&[vec![1, 1]], 3, &mut rng))];

        for coef_frozen in &frozen_list {
            engine.tab_frozen(coef_frozen.as_ref()).unwrap();
            engine.tab_deriv(&coef).unwrap();

            let (_, grad) = engine
                .generalize_spillage(0, &coef, &ibands, true)
                .unwrap();
            let grad = flatten(&grad.unwrap());

            let pat = nestpat(&coef);
            let flat = flatten(&coef);
            let h = 1e-6;
            for (i, &gi) in grad.iter().enumerate() {
                let mut plus = flat.clone();
                plus[i] += h;
                let mut minus = flat.clone();
                minus[i] -= h;
                let (sp, _) = engine
                    .generalize_spillage(0, &nest(&plus, &pat).unwrap(), &ibands, false)
                    .unwrap();
                let (sm, _) = engine
                    .generalize_spillage(0, &nest(&minus, &pat).unwrap(), &ibands, false)
                    .unwrap();
                let fd = (sp - sm) / (2.0 * h);
                assert!(
                    (gi - fd).abs() < 1e-7,
                    "coefficient {i}: analytic {gi} vs central difference {fd}"
                );
            }
        }
    }

    #[test]
    fn frozen_projector_is_idempotent_and_self_adjoint() {
        let mut rng = StdRng::seed_from_u64(13);
        let dat = synth_config(vec![2], vec![1], 3, 1, 4, true, &mut rng);
        let coef_frozen = randcoef(&[vec![1, 1]], 3, &mut rng);

        let j = jy2ao(&coef_frozen, &dat.natom, &dat.lmax, &dat.nbes).unwrap();
        let s = &dat.jy_jy[0][0];
        let ff = j.transpose() * s * &j;
        let chol = nalgebra::Cholesky::new(ff).unwrap();
        // P = J (J^T S J)^{-1} J^T S projects onto the frozen subspace
        let p = &j * chol.solve(&(j.transpose() * s));

        let pp = &p * &p;
        for (a, b) in pp.iter().zip(p.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
        let sp = s * &p;
        let pts = p.transpose() * s;
        for (a, b) in sp.iter().zip(pts.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn tabulated_quantities_have_documented_shapes() {
        let mut rng = StdRng::seed_from_u64(14);
        let mut engine = Spillage::new(true);
        for nk in [1, 2] {
            engine
                .add(synth_config(vec![2], vec![2], 3, nk, 5, false, &mut rng))
                .unwrap();
        }

        let coef_frozen = randcoef(&[vec![2, 1, 0]], 3, &mut rng);
        engine.tab_frozen(Some(&coef_frozen)).unwrap();
        let tabs = engine.frozen.as_ref().unwrap();
        assert_eq!(tabs.len(), 2);
        for (tab, dat) in tabs.iter().zip(engine.config.iter()) {
            let njy = dat.njy().unwrap();
            assert_eq!(tab.spill.len(), dat.nbands);
            for c in 0..2 {
                assert_eq!(tab.mo_pfrozen_jy[c].len(), dat.nk);
                assert_eq!(tab.mo_pfrozen_jy[c][0].shape(), (dat.nbands, njy));
            }
        }

        let coef = randcoef(&[vec![2, 1, 0]], 3, &mut rng);
        let ncoef = flatten(&coef).len();
        // orbitals related to the coefficients: 2 atoms, (1 + 3) channels
        let n_dao = 2 * (2 + 3);
        engine.tab_deriv(&coef).unwrap();
        assert_eq!(engine.deriv.len(), 2);
        for (tab, dat) in engine.deriv.iter().zip(engine.config.iter()) {
            let njy = dat.njy().unwrap();
            assert_eq!(tab.ncoef, ncoef);
            for c in 0..2 {
                assert_eq!(tab.dao_jy[c].len(), ncoef);
                assert_eq!(tab.dao_jy[c][0].len(), dat.nk);
                assert_eq!(tab.dao_jy[c][0][0].shape(), (n_dao, njy));
                assert_eq!(tab.mo_qfrozen_dao[c][0][0].shape(), (dat.nbands, n_dao));
            }
        }
    }

    #[test]
    fn mismatched_rcut_is_rejected() {
        let mut rng = StdRng::seed_from_u64(15);
        let mut engine = Spillage::new(true);
        engine
            .add(synth_config(vec![1], vec![1], 3, 1, 4, true, &mut rng))
            .unwrap();
        let mut other = synth_config(vec![1], vec![1], 3, 1, 4, true, &mut rng);
        other.rcut = 8.0;
        assert!(matches!(
            engine.add(other),
            Err(OrbgenError::Inconsistent(_))
        ));
    }

    #[test]
    fn gradient_without_tables_is_an_error() {
        let mut rng = StdRng::seed_from_u64(16);
        let mut engine = Spillage::new(true);
        engine
            .add(synth_config(vec![1], vec![1], 3, 1, 4, true, &mut rng))
            .unwrap();
        let coef = randcoef(&[vec![1, 1]], 3, &mut rng);
        assert!(matches!(
            engine.generalize_spillage(0, &coef, &[0, 1], true),
            Err(OrbgenError::Shape(_))
        ));

        // tables for a different shape are rejected as well
        engine.tab_deriv(&coef).unwrap();
        let wider = randcoef(&[vec![2, 1]], 3, &mut rng);
        assert!(matches!(
            engine.generalize_spillage(0, &wider, &[0, 1], true),
            Err(OrbgenError::Shape(_))
        ));
    }

    #[test]
    fn optimization_lowers_the_spillage_and_orthonormalizes() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut engine = Spillage::new(true);
        for _ in 0..2 {
            engine
                .add(synth_config(vec![1], vec![2], 4, 1, 6, true, &mut rng))
                .unwrap();
        }

        let coef_init = randcoef(&[vec![2, 1, 1]], 4, &mut rng);
        let ibands = 0..4;
        let options = OptOptions {
            ftol: 0.0,
            gtol: 1e-6,
            maxiter: 200,
            ..OptOptions::default()
        };

        let initial: f64 = (0..2)
            .map(|ic| {
                engine
                    .generalize_spillage(ic, &coef_init, &[0, 1, 2, 3], false)
                    .unwrap()
                    .0
            })
            .sum::<f64>()
            / 2.0;

        let coef_opt = engine
            .opt(&coef_init, None, &[0, 1], &[ibands], &options, 2)
            .unwrap();

        let finals: f64 = (0..2)
            .map(|ic| {
                engine
                    .generalize_spillage(ic, &coef_opt, &[0, 1, 2, 3], false)
                    .unwrap()
                    .0
            })
            .sum::<f64>()
            / 2.0;
        assert!(finals < initial, "optimized {finals} vs initial {initial}");

        // zetas are orthonormal within each (itype, l)
        for coef_t in &coef_opt {
            for coef_tl in coef_t {
                let gram = coef_tl * coef_tl.transpose();
                for i in 0..gram.nrows() {
                    for jj in 0..gram.ncols() {
                        let expect = if i == jj { 1.0 } else { 0.0 };
                        assert!((gram[(i, jj)] - expect).abs() < 1e-10);
                    }
                }
            }
        }
    }

    #[test]
    fn frozen_level_optimization_runs() {
        let mut rng = StdRng::seed_from_u64(18);
        let mut engine = Spillage::new(false);
        engine
            .add(synth_config(vec![1], vec![1], 3, 1, 5, true, &mut rng))
            .unwrap();

        let coef_frozen = randcoef(&[vec![1, 0]], 3, &mut rng);
        let coef_init = randcoef(&[vec![1, 1]], 3, &mut rng);
        let options = OptOptions {
            maxiter: 50,
            ..OptOptions::default()
        };
        let coef_opt = engine
            .opt(&coef_init, Some(&coef_frozen), &[0], &[0..3], &options, 1)
            .unwrap();
        assert_eq!(coef_opt[0][0].shape(), (1, 3));
        assert_eq!(coef_opt[0][1].shape(), (1, 3));
    }

    #[test]
    fn band_selection_is_validated() {
        let mut rng = StdRng::seed_from_u64(19);
        let mut engine = Spillage::new(true);
        engine
            .add(synth_config(vec![1], vec![1], 3, 1, 4, true, &mut rng))
            .unwrap();
        let coef = randcoef(&[vec![1, 1]], 3, &mut rng);
        assert!(matches!(
            engine.generalize_spillage(0, &coef, &[3, 4], false),
            Err(OrbgenError::Shape(_))
        ));
    }
}
