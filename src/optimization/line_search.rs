//! Backtracking line search with an Armijo condition, along a projected
//! path when bounds are active.

use crate::error::Result;

/// Search along `p` from `x`, clamping each trial point to `[lo, hi]`.
///
/// Returns the accepted point together with its objective and gradient
/// (the last evaluation is reused by the caller). The Armijo test uses
/// the actual displacement, so projection shortens the reference decrease
/// accordingly.
pub fn line_search<F>(
    x: &[f64],
    f: f64,
    g: &[f64],
    p: &[f64],
    lo: f64,
    hi: f64,
    eval: &F,
) -> Result<(Vec<f64>, f64, Vec<f64>)>
where
    F: Fn(&[f64]) -> Result<(f64, Vec<f64>)>,
{
    let c1 = 1e-4;
    let mut alpha = 1.0;

    loop {
        let x_new: Vec<f64> = x
            .iter()
            .zip(p.iter())
            .map(|(xi, pi)| (xi + alpha * pi).clamp(lo, hi))
            .collect();

        let (f_new, g_new) = eval(&x_new)?;

        let ref_decrease: f64 = g
            .iter()
            .zip(x_new.iter().zip(x.iter()))
            .map(|(gi, (xn, xo))| gi * (xn - xo))
            .sum();

        if f_new <= f + c1 * ref_decrease {
            return Ok((x_new, f_new, g_new));
        }

        alpha *= 0.5;
        if alpha < 1e-10 {
            // stagnated; hand the last trial back and let the driver's
            // tolerance test decide
            return Ok((x_new, f_new, g_new));
        }
    }
}
