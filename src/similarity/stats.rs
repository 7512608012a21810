//! Numeric kernels shared by the similarity engine and the trend detector
//!
//! Every function here is total: degenerate input (empty slices, zero
//! variance, non-finite intermediates) yields a neutral value instead of NaN.

/// Arithmetic mean, 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean and population standard deviation using Welford's algorithm
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, &value) in values.iter().enumerate() {
        let delta = value - mean;
        mean += delta / (i + 1) as f64;
        m2 += delta * (value - mean);
    }

    let variance = (m2 / values.len() as f64).max(0.0);
    (mean, variance.sqrt())
}

/// Minimum and maximum, `(0.0, 0.0)` for an empty slice
pub fn min_max(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Pearson correlation coefficient over the common prefix
///
/// Returns 0.0 for fewer than two points or a constant series.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = mean(a);
    let mean_b = mean(b);

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    let r = cov / denom;
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Result of a two-sample Kolmogorov-Smirnov test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsTest {
    /// Largest distance between the two empirical CDFs
    pub statistic: f64,
    /// Two-sided p-value, exact for samples up to [`EXACT_MAX_SAMPLES`]
    pub pvalue: f64,
}

/// Largest sample size for which the exact p-value is computed
pub const EXACT_MAX_SAMPLES: usize = 10_000;

/// Largest lattice (`n * m`) walked for unequal sample sizes
const EXACT_MAX_CELLS: usize = 1_000_000;

/// Two-sample Kolmogorov-Smirnov test
///
/// The p-value is the exact probability, under the null hypothesis, of a
/// statistic at least as large as the observed one. Equal sample sizes use
/// the closed form of the reflection principle; unequal sizes walk the
/// lattice of merged orderings. Larger samples fall back to the asymptotic
/// Kolmogorov distribution with Stephens' correction.
/// Identical samples give `pvalue == 1.0`.
pub fn ks_2samp(a: &[f64], b: &[f64]) -> KsTest {
    if a.is_empty() || b.is_empty() {
        return KsTest {
            statistic: 0.0,
            pvalue: 1.0,
        };
    }

    let mut xs = a.to_vec();
    let mut ys = b.to_vec();
    xs.sort_by(|x, y| x.total_cmp(y));
    ys.sort_by(|x, y| x.total_cmp(y));

    let n = xs.len() as f64;
    let m = ys.len() as f64;
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < xs.len() && j < ys.len() {
        let x = xs[i].min(ys[j]);
        while i < xs.len() && xs[i] <= x {
            i += 1;
        }
        while j < ys.len() && ys[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }

    if d <= 0.0 {
        return KsTest {
            statistic: 0.0,
            pvalue: 1.0,
        };
    }

    let pvalue = exact_pvalue(xs.len(), ys.len(), d).unwrap_or_else(|| {
        let en = (n * m / (n + m)).sqrt();
        kolmogorov_survival((en + 0.12 + 0.11 / en) * d)
    });
    KsTest {
        statistic: d,
        pvalue,
    }
}

// =============================================================================
// Exact Distribution
// =============================================================================

/// Exact two-sided p-value of statistic `d` for sample sizes `n` and `m`
///
/// Returns `None` when the samples are too large or the computation does
/// not yield a probability.
fn exact_pvalue(n: usize, m: usize, d: f64) -> Option<f64> {
    if n.max(m) > EXACT_MAX_SAMPLES {
        return None;
    }

    // The statistic is a multiple of 1 / lcm(n, m)
    let g = gcd(n, m);
    let lcm = (n / g) * m;
    let h = (d * lcm as f64).round() as usize;
    if h == 0 {
        return Some(1.0);
    }

    let p = if n == m {
        outside_square(n, h)
    } else if n.saturating_mul(m) <= EXACT_MAX_CELLS {
        1.0 - inside_lattice(n, m, h * g)
    } else {
        return None;
    };

    if p.is_finite() {
        Some(p.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Share of balanced orderings of `n + n` values whose CDF gap reaches `h / n`
///
/// Alternating sum over reflections, accumulated from the outermost term
/// inwards so every partial product stays in `[0, 1]`.
fn outside_square(n: usize, h: usize) -> f64 {
    let mut p = 0.0;
    for k in (0..=n / h).rev() {
        let mut term = 1.0;
        for j in 0..h {
            if k * h + j >= n {
                term = 0.0;
                break;
            }
            term = term * (n - k * h - j) as f64 / (n + k * h + j + 1) as f64;
        }
        p = term * (1.0 - p);
    }
    2.0 * p
}

/// Probability that a random ordering of `n + m` values keeps the CDF gap
/// strictly inside `bound / (n * m)`
///
/// Each lattice step is taken with its hypergeometric probability, so the
/// row holds probabilities rather than path counts and cannot overflow.
fn inside_lattice(n: usize, m: usize, bound: usize) -> f64 {
    let inside = |i: usize, j: usize| (i * m).abs_diff(j * n) < bound;

    let mut row = vec![0.0f64; m + 1];
    row[0] = 1.0;
    for j in 1..=m {
        row[j] = if inside(0, j) {
            row[j - 1] * (m - j + 1) as f64 / (n + m - j + 1) as f64
        } else {
            0.0
        };
    }

    for i in 1..=n {
        for j in 0..=m {
            if !inside(i, j) {
                row[j] = 0.0;
                continue;
            }
            let mut p = row[j] * (n - i + 1) as f64 / (n - i + 1 + m - j) as f64;
            if j > 0 {
                p += row[j - 1] * (m - j + 1) as f64 / (n - i + m - j + 1) as f64;
            }
            row[j] = p;
        }
    }
    row[m]
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Survival function of the Kolmogorov distribution, `Q_KS(lambda)`
fn kolmogorov_survival(lambda: f64) -> f64 {
    const EPS1: f64 = 1e-3;
    const EPS2: f64 = 1e-8;

    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = fac * (a2 * j * j).exp();
        sum += term;
        if term.abs() <= EPS1 * previous || term.abs() <= EPS2 * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        previous = term.abs();
    }
    // The series only fails to converge for very small lambda
    1.0
}

/// Ordinary least-squares fit of `values` against their index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    /// Fitted slope
    pub slope: f64,
    /// Fitted intercept
    pub intercept: f64,
    /// Correlation coefficient of the fit
    pub r: f64,
}

/// Fit `value = slope * index + intercept`
///
/// Returns `None` for fewer than two points. A constant series has slope
/// 0.0 and `r == 0.0`.
pub fn linear_regression(values: &[f64]) -> Option<Regression> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = mean(values);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    let slope = sxy / sxx;
    let r = if syy < f64::EPSILON {
        0.0
    } else {
        (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
    };

    if !slope.is_finite() || !r.is_finite() {
        return None;
    }
    Some(Regression {
        slope,
        intercept: mean_y - slope * mean_x,
        r,
    })
}

/// Z-normalize with the population standard deviation (divisor 1 when zero)
pub fn z_normalize(values: &[f64]) -> Vec<f64> {
    let (mean, std) = mean_std(values);
    let divisor = if std > 0.0 { std } else { 1.0 };
    values.iter().map(|v| (v - mean) / divisor).collect()
}

/// First differences `x[i+1] - x[i]`
pub fn first_differences(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|pair| pair[1] - pair[0]).collect()
}
