//! Bounded minimization driver.
//!
//! Runs the L-BFGS iteration until the projected-gradient sup-norm drops
//! below `gtol`, the relative objective decrease drops below `ftol`, or
//! `maxiter` is reached. Hitting the cap is reported as a warning and the
//! best iterate is returned regardless; a cooperative cancellation flag
//! is honored at the iteration barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{OrbgenError, Result};
use crate::optimization::lbfgs::Lbfgs;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OptOptions {
    /// Relative objective-decrease tolerance.
    pub ftol: f64,
    /// Projected-gradient sup-norm tolerance.
    pub gtol: f64,
    pub maxiter: usize,
    /// History length of the quasi-Newton model.
    pub maxcor: usize,
    /// Cooperative cancellation, checked once per iteration.
    #[serde(skip)]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for OptOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-12,
            gtol: 1e-6,
            maxiter: 1000,
            maxcor: 20,
            cancel: None,
        }
    }
}

pub struct MinimizeResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Minimize `eval` over the box `[lo, hi]^n` starting from `x0`.
pub fn minimize<F>(eval: &F, x0: Vec<f64>, lo: f64, hi: f64, opts: &OptOptions) -> Result<MinimizeResult>
where
    F: Fn(&[f64]) -> Result<(f64, Vec<f64>)>,
{
    let mut opt = Lbfgs::new(opts.maxcor, lo, hi);
    let mut x: Vec<f64> = x0.iter().map(|v| v.clamp(lo, hi)).collect();
    let (mut f, mut g) = eval(&x)?;

    let mut best_x = x.clone();
    let mut best_f = f;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..opts.maxiter {
        iterations = iter;
        if let Some(cancel) = &opts.cancel {
            if cancel.load(Ordering::Relaxed) {
                debug!("minimize: cancelled at iteration {iter}");
                break;
            }
        }

        let pg_max = opt
            .projected_gradient(&x, &g)
            .iter()
            .fold(0.0_f64, |m, v| m.max(v.abs()));
        if pg_max <= opts.gtol {
            converged = true;
            break;
        }

        let (x_new, f_new, g_new) = opt.step(&x, f, &g, eval)?;
        if f_new < best_f {
            best_f = f_new;
            best_x = x_new.clone();
        }

        let decrease = f - f_new;
        let scale = f.abs().max(f_new.abs()).max(1.0);
        let stalled = decrease <= opts.ftol * scale;
        x = x_new;
        f = f_new;
        g = g_new;

        if stalled {
            converged = true;
            break;
        }
        debug!("minimize: iter {iter}, f = {f:.10e}, |pg| = {pg_max:.3e}");
    }

    if !converged {
        warn!(
            "{}",
            OrbgenError::OptDiverged(format!(
                "no convergence within {} iterations; best f = {best_f:.6e}",
                opts.maxiter
            ))
        );
    }
    Ok(MinimizeResult {
        x: best_x,
        f: best_f,
        converged,
        iterations,
    })
}
