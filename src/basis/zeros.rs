//! Spherical Bessel functions of the first kind and their positive zeros.
//!
//! The zeros back the truncated radial basis: the q-th radial function of
//! angular momentum l is j_l(z_{l,q} r / rcut), which vanishes at rcut by
//! construction. Zeros are tabulated lazily: the l = 0 row is exactly
//! n*pi, and each higher row is found by bisection plus a Newton polish
//! inside the interlacing bracket (z_{l-1,n}, z_{l-1,n+1}).

use std::sync::OnceLock;

use crate::error::{OrbgenError, Result};

/// Largest tabulated angular momentum.
pub const LMAX_TAB: usize = 8;
/// Largest tabulated zero index per l (1-based).
pub const NMAX_TAB: usize = 64;

/// Spherical Bessel function j_l(x).
///
/// Upward recurrence for x > l, downward (Miller) otherwise; the
/// recurrences are the stable direction in each regime.
pub fn spherical_jl(l: usize, x: f64) -> f64 {
    if x == 0.0 {
        return if l == 0 { 1.0 } else { 0.0 };
    }
    if l == 0 {
        return x.sin() / x;
    }
    if x > l as f64 {
        // upward from j0, j1
        let mut jm = x.sin() / x;
        let mut jc = x.sin() / (x * x) - x.cos() / x;
        for n in 1..l {
            let jn = (2 * n + 1) as f64 / x * jc - jm;
            jm = jc;
            jc = jn;
        }
        jc
    } else {
        // downward from a start well above l; rescale on the fly since
        // the unnormalized values grow fast, then normalize against
        // whichever of j0/j1 is away from its zero
        let start = l + 16 + x as usize;
        let mut jp = 0.0_f64;
        let mut jc = 1e-30_f64;
        let mut jl = 0.0_f64;
        let mut j1 = 0.0_f64;
        let mut j0 = 0.0_f64;
        for n in (0..=start).rev() {
            let jm = (2 * n + 3) as f64 / x * jc - jp;
            jp = jc;
            jc = jm;
            if jc.abs() > 1e250 {
                jc *= 1e-250;
                jp *= 1e-250;
                jl *= 1e-250;
                j1 *= 1e-250;
            }
            if n == l {
                jl = jc;
            }
            if n == 1 {
                j1 = jc;
            }
            if n == 0 {
                j0 = jc;
            }
        }
        let true0 = x.sin() / x;
        let true1 = x.sin() / (x * x) - x.cos() / x;
        if true0.abs() >= true1.abs() {
            jl * true0 / j0
        } else {
            jl * true1 / j1
        }
    }
}

/// First derivative j_l'(x).
pub fn spherical_jl_deriv(l: usize, x: f64) -> f64 {
    if x == 0.0 {
        return if l == 1 { 1.0 / 3.0 } else { 0.0 };
    }
    if l == 0 {
        -spherical_jl(1, x)
    } else {
        spherical_jl(l - 1, x) - (l + 1) as f64 / x * spherical_jl(l, x)
    }
}

/// The n-th positive zero of j_l (n is 1-based).
pub fn jl_zero(l: usize, n: usize) -> Result<f64> {
    if l > LMAX_TAB || n == 0 || n > NMAX_TAB {
        return Err(OrbgenError::BesselOutOfRange(format!(
            "requested zero (l = {l}, n = {n}); supported l <= {LMAX_TAB}, 1 <= n <= {NMAX_TAB}"
        )));
    }
    Ok(table()[l][n - 1])
}

static TABLE: OnceLock<Vec<Vec<f64>>> = OnceLock::new();

fn table() -> &'static Vec<Vec<f64>> {
    TABLE.get_or_init(|| {
        // row l needs one more zero than row l+1 to supply brackets
        let mut tab: Vec<Vec<f64>> = Vec::with_capacity(LMAX_TAB + 1);
        let n0 = NMAX_TAB + LMAX_TAB;
        tab.push((1..=n0).map(|n| n as f64 * std::f64::consts::PI).collect());
        for l in 1..=LMAX_TAB {
            let prev = &tab[l - 1];
            let count = n0 - l;
            let mut row = Vec::with_capacity(count);
            for n in 0..count {
                row.push(refine_zero(l, prev[n], prev[n + 1]));
            }
            tab.push(row);
        }
        tab
    })
}

/// One simple zero of j_l lies strictly inside (lo, hi); bisect to it,
/// then polish with Newton.
fn refine_zero(l: usize, lo: f64, hi: f64) -> f64 {
    let (mut a, mut b) = (lo, hi);
    let fa = spherical_jl(l, a);
    for _ in 0..80 {
        let mid = 0.5 * (a + b);
        let fm = spherical_jl(l, mid);
        if fm == 0.0 {
            return mid;
        }
        if (fa > 0.0) == (fm > 0.0) {
            a = mid;
        } else {
            b = mid;
        }
    }
    let mut x = 0.5 * (a + b);
    for _ in 0..3 {
        let f = spherical_jl(l, x);
        let df = spherical_jl_deriv(l, x);
        if df != 0.0 {
            x -= f / df;
        }
    }
    x
}
