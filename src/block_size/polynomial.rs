//! Least-squares quadratic fit used to locate the best block size
//!
//! The controller records `(block_size, hit_ratio)` observations. When at
//! least three distinct sizes are known, a parabola is fitted through them;
//! a concave fit has a maximum whose abscissa is the candidate size.

/// Coefficients of `a2 * x^2 + a1 * x + a0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadratic {
    /// Quadratic coefficient
    pub a2: f64,
    /// Linear coefficient
    pub a1: f64,
    /// Constant term
    pub a0: f64,
}

impl Quadratic {
    /// Evaluate at `x`
    pub fn eval(&self, x: f64) -> f64 {
        (self.a2 * x + self.a1) * x + self.a0
    }

    /// Abscissa of the maximum, `None` unless the parabola opens downwards
    pub fn maximum(&self) -> Option<f64> {
        if self.a2.is_nan() || self.a2 >= 0.0 {
            return None;
        }
        let x = -self.a1 / (2.0 * self.a2);
        x.is_finite().then_some(x)
    }
}

/// Fit a quadratic to `points` by least squares
///
/// Returns `None` with fewer than three distinct abscissas or when the
/// normal equations are singular.
pub fn fit_quadratic(points: &[(f64, f64)]) -> Option<Quadratic> {
    let mut distinct: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    distinct.sort_by(|a, b| a.total_cmp(b));
    distinct.dedup();
    if distinct.len() < 3 {
        return None;
    }

    // Center the abscissas to keep the normal equations well conditioned
    let shift = points.iter().map(|(x, _)| x).sum::<f64>() / points.len() as f64;

    // Power sums S_k = sum x^k and T_k = sum x^k * y
    let mut s = [0.0f64; 5];
    let mut t = [0.0f64; 3];
    for &(x, y) in points {
        let x = x - shift;
        let mut p = 1.0;
        for k in 0..5 {
            s[k] += p;
            if k < 3 {
                t[k] += p * y;
            }
            p *= x;
        }
    }

    // Rows for unknowns [c0, c1, c2] of c2*u^2 + c1*u + c0 with u = x - shift
    let mut m = [
        [s[0], s[1], s[2], t[0]],
        [s[1], s[2], s[3], t[1]],
        [s[2], s[3], s[4], t[2]],
    ];
    let [c0, c1, c2] = solve3(&mut m)?;

    // Expand back to powers of x
    let a2 = c2;
    let a1 = c1 - 2.0 * c2 * shift;
    let a0 = c0 - c1 * shift + c2 * shift * shift;
    [a2, a1, a0]
        .iter()
        .all(|c| c.is_finite())
        .then_some(Quadratic { a2, a1, a0 })
}

/// Gaussian elimination with partial pivoting on an augmented 3x4 matrix
fn solve3(m: &mut [[f64; 4]; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let mut acc = m[row][3];
        for k in row + 1..3 {
            acc -= m[row][k] * x[k];
        }
        x[row] = acc / m[row][row];
    }
    Some(x)
}
