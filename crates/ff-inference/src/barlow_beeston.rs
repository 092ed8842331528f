//! Per-bin profiling of true template contents (Barlow & Beeston, 1993).
//!
//! In every bin the observed template counts `a_j` are Poisson fluctuations of
//! unknown true contents `A_j`. For fixed normalisations `p_j` the likelihood
//! maximum over the `A_j` reduces to a single variable `t`:
//!
//! ```text
//! d / (1 - t) = sum_j p_j a_j / (1 + p_j t)        A_j = a_j / (1 + p_j t)
//! ```
//!
//! The left side increases and the right side decreases in `t`, so there is at
//! most one root on `(-1/p_max, 1)`.

const MAX_ITER: usize = 200;
const T_TOL: f64 = 1e-14;

/// Profile the true template contents of one bin.
///
/// `d` is the data count, `a` the observed template counts and `p` the template
/// normalisations. The profiled contents are written into `true_counts` and the
/// returned `t` satisfies `prediction = d / (1 - t)` whenever `d > 0`.
pub fn profile_bin(d: f64, a: &[f64], p: &[f64], true_counts: &mut [f64]) -> f64 {
    debug_assert_eq!(a.len(), p.len());
    debug_assert_eq!(a.len(), true_counts.len());

    if d <= 0.0 {
        for ((out, &aj), &pj) in true_counts.iter_mut().zip(a).zip(p) {
            *out = aj / (1.0 + pj);
        }
        return 1.0;
    }

    let p_max = p.iter().copied().fold(0.0_f64, f64::max);
    if p_max <= 0.0 {
        true_counts.copy_from_slice(a);
        return 1.0;
    }

    if let Some(t) = boundary_solution(d, a, p, p_max, true_counts) {
        return t;
    }

    let t = solve_interior(d, a, p, p_max);
    for ((out, &aj), &pj) in true_counts.iter_mut().zip(a).zip(p) {
        *out = aj / (1.0 + pj * t);
    }
    t
}

fn is_max(pj: f64, p_max: f64) -> bool {
    pj >= p_max * (1.0 - 1e-12)
}

/// When every template with the largest normalisation is empty in this bin the
/// root may sit on the lower edge `t = -1/p_max`. The empty template then
/// absorbs whatever the others cannot explain.
fn boundary_solution(
    d: f64,
    a: &[f64],
    p: &[f64],
    p_max: f64,
    true_counts: &mut [f64],
) -> Option<f64> {
    let mut k = None;
    for (j, (&aj, &pj)) in a.iter().zip(p).enumerate() {
        if is_max(pj, p_max) {
            if aj > 0.0 {
                return None;
            }
            k.get_or_insert(j);
        }
    }
    let k = k?;

    let mut a_k = d / (1.0 + p_max);
    for (j, (&aj, &pj)) in a.iter().zip(p).enumerate() {
        if is_max(pj, p_max) {
            true_counts[j] = 0.0;
        } else {
            let aj_true = aj / (1.0 - pj / p_max);
            true_counts[j] = aj_true;
            a_k -= pj * aj_true / p_max;
        }
    }
    if a_k <= 0.0 {
        return None;
    }
    true_counts[k] = a_k;
    Some(-1.0 / p_max)
}

/// Safeguarded Newton iteration on `g(t) = d/(1-t) - sum p a / (1 + p t)`.
fn solve_interior(d: f64, a: &[f64], p: &[f64], p_max: f64) -> f64 {
    let mut lo = -1.0 / p_max;
    let mut hi = 1.0;
    let mut t = 0.0;

    for _ in 0..MAX_ITER {
        let one_minus = 1.0 - t;
        let mut g = d / one_minus;
        let mut dg = d / (one_minus * one_minus);
        for (&aj, &pj) in a.iter().zip(p) {
            if aj > 0.0 && pj > 0.0 {
                let denom = 1.0 + pj * t;
                g -= pj * aj / denom;
                dg += pj * pj * aj / (denom * denom);
            }
        }

        if g == 0.0 {
            return t;
        }
        if g > 0.0 {
            hi = t;
        } else {
            lo = t;
        }

        let newton = t - g / dg;
        let next = if newton > lo && newton < hi { newton } else { 0.5 * (lo + hi) };
        if (next - t).abs() <= T_TOL * t.abs().max(1.0) {
            return next;
        }
        t = next;
    }
    t
}
