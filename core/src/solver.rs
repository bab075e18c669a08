//! Two-column least squares.
//!
//! The uplift design always has exactly two regressors, so the normal
//! equations are a 2×2 symmetric system solved in closed form. Rank is decided
//! on the column-normalised system, so a regressor on a tiny scale (rebate
//! pressure next to promo spend) is never mistaken for a null direction.
//! Rank-deficient systems get the minimum-norm solution through the
//! pseudo-inverse of the Gram matrix instead of an error.

/// `1 − cos²` between the columns at or below which they count as collinear.
const COLLINEAR_TOL: f64 = 64.0 * f64::EPSILON;

/// Sufficient statistics of `min ||x1·a + x2·b − y||²`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gram2 {
    pub s11: f64,
    pub s12: f64,
    pub s22: f64,
    pub t1:  f64,
    pub t2:  f64,
    pub yy:  f64,
}

impl Gram2 {
    /// Accumulate `XᵀX`, `Xᵀy` and `yᵀy`. Each row is scaled by
    /// `sqrt(weight)` when weights are given.
    pub fn accumulate(x1: &[f64], x2: &[f64], y: &[f64], weights: Option<&[f64]>) -> Self {
        let mut g = Gram2 { s11: 0.0, s12: 0.0, s22: 0.0, t1: 0.0, t2: 0.0, yy: 0.0 };
        for i in 0..y.len() {
            let w = weights.map_or(1.0, |w| w[i].max(0.0));
            g.s11 += w * x1[i] * x1[i];
            g.s12 += w * x1[i] * x2[i];
            g.s22 += w * x2[i] * x2[i];
            g.t1  += w * x1[i] * y[i];
            g.t2  += w * x2[i] * y[i];
            g.yy  += w * y[i] * y[i];
        }
        g
    }

    /// Residual sum of squares at `(a, b)`.
    pub fn rss(&self, a: f64, b: f64) -> f64 {
        self.yy - 2.0 * (a * self.t1 + b * self.t2)
            + a * a * self.s11
            + 2.0 * a * b * self.s12
            + b * b * self.s22
    }

    /// Unconstrained least-squares solution, minimum-norm when rank-deficient.
    pub fn solve(&self) -> (f64, f64) {
        if self.s11 + self.s22 <= 0.0 {
            return (0.0, 0.0);
        }
        let d1 = self.s11.sqrt();
        let d2 = self.s22.sqrt();
        if d1 > 0.0 && d2 > 0.0 {
            // Normalised Gram is [[1, r], [r, 1]].
            let r = (self.s12 / (d1 * d2)).clamp(-1.0, 1.0);
            let det = 1.0 - r * r;
            if det > COLLINEAR_TOL {
                let u1 = self.t1 / d1;
                let u2 = self.t2 / d2;
                let a = (u1 - r * u2) / det;
                let b = (u2 - r * u1) / det;
                return (a / d1, b / d2);
            }
        }
        self.solve_rank_one()
    }

    /// `G⁺·t` keeping only the dominant eigenpair of the Gram matrix.
    fn solve_rank_one(&self) -> (f64, f64) {
        let trace = self.s11 + self.s22;
        let half_gap = ((self.s11 - self.s22) / 2.0).hypot(self.s12);
        let l1 = trace / 2.0 + half_gap;
        if l1 <= 0.0 {
            return (0.0, 0.0);
        }
        let (vx, vy) = if self.s12.abs() > 0.0 {
            let (x, y) = (self.s12, l1 - self.s11);
            let n = x.hypot(y);
            (x / n, y / n)
        } else if self.s11 >= self.s22 {
            (1.0, 0.0)
        } else {
            (0.0, 1.0)
        };
        let c = (vx * self.t1 + vy * self.t2) / l1;
        (c * vx, c * vy)
    }

    /// Least squares over `a ≥ 0, b ≤ 0`.
    ///
    /// The objective is a convex quadratic, so the optimum is one of the KKT
    /// candidates: the interior solution, either coordinate solved alone with
    /// the other pinned at zero, or the origin. The feasible candidate with
    /// the smallest residual wins.
    pub fn solve_bounded(&self) -> (f64, f64) {
        let mut candidates: Vec<(f64, f64)> = Vec::with_capacity(4);
        candidates.push(self.solve());
        if self.s11 > 0.0 {
            candidates.push((self.t1 / self.s11, 0.0));
        }
        if self.s22 > 0.0 {
            candidates.push((0.0, self.t2 / self.s22));
        }
        candidates.push((0.0, 0.0));

        candidates
            .into_iter()
            .filter(|(a, b)| *a >= 0.0 && *b <= 0.0)
            .map(|(a, b)| (a, b, self.rss(a, b)))
            .fold(None::<(f64, f64, f64)>, |best, cand| match best {
                Some(b) if b.2 <= cand.2 => Some(b),
                _ => Some(cand),
            })
            .map_or((0.0, 0.0), |(a, b, _)| (a, b))
    }
}
