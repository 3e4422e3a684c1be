//! Numeric primitives shared by the estimator, predictor and calibration
//! pipeline: a piecewise-linear map, a least-squares line fit, and an
//! equilibrium detector.

/// A piecewise-linear function over a set of (x, y) points, kept sorted by
/// `x`. Values beyond the first/last point are clamped to the nearest
/// endpoint's slope-extended line (used for RTD lookup extrapolation and
/// temperature-banded predictor tables alike).
#[derive(Debug, Clone, Default)]
pub struct PiecewiseLinear {
    points: Vec<(f64, f64)>,
}

impl PiecewiseLinear {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Build directly from a single scalar value, for promoting a legacy
    /// scalar parameter to a single-point table (spec section 4.2).
    pub fn from_scalar(x: f64, y: f64) -> Self {
        let mut p = Self::new();
        p.add_point(x, y);
        p
    }

    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut p = Self::new();
        for (x, y) in points {
            p.add_point(x, y);
        }
        p
    }

    /// Insert a point, keeping the table sorted by `x`. Replaces any
    /// existing point at the same `x`.
    pub fn add_point(&mut self, x: f64, y: f64) {
        match self
            .points
            .binary_search_by(|(px, _)| px.partial_cmp(&x).unwrap())
        {
            Ok(i) => self.points[i] = (x, y),
            Err(i) => self.points.insert(i, (x, y)),
        }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Linear interpolation between bracketing points; linear extrapolation
    /// beyond the ends using the nearest segment's slope.
    pub fn eval(&self, x: f64) -> f64 {
        match self.points.len() {
            0 => 0.0,
            1 => self.points[0].1,
            _ => {
                let (a, b) = self.bracket(x);
                interp(a, b, x)
            }
        }
    }

    /// Inverse lookup: given `y`, find `x` such that `eval(x) == y`, assuming
    /// the table is monotonic in `y`. Used by RTD calibration tests to
    /// construct a resistance from a known temperature.
    pub fn invert(&self, y: f64) -> f64 {
        match self.points.len() {
            0 => 0.0,
            1 => self.points[0].0,
            _ => {
                let (a, b) = self.bracket_by_value(y);
                let (ax, ay) = a;
                let (bx, by) = b;
                if (by - ay).abs() < f64::EPSILON {
                    ax
                } else {
                    ax + (y - ay) * (bx - ax) / (by - ay)
                }
            }
        }
    }

    fn bracket(&self, x: f64) -> ((f64, f64), (f64, f64)) {
        let pts = &self.points;
        if x <= pts[0].0 {
            return (pts[0], pts[1]);
        }
        if x >= pts[pts.len() - 1].0 {
            return (pts[pts.len() - 2], pts[pts.len() - 1]);
        }
        for w in pts.windows(2) {
            if x >= w[0].0 && x <= w[1].0 {
                return (w[0], w[1]);
            }
        }
        (pts[pts.len() - 2], pts[pts.len() - 1])
    }

    fn bracket_by_value(&self, y: f64) -> ((f64, f64), (f64, f64)) {
        let pts = &self.points;
        let ascending = pts[0].1 <= pts[pts.len() - 1].1;
        let below_first = if ascending {
            y <= pts[0].1
        } else {
            y >= pts[0].1
        };
        if below_first {
            return (pts[0], pts[1]);
        }
        let above_last = if ascending {
            y >= pts[pts.len() - 1].1
        } else {
            y <= pts[pts.len() - 1].1
        };
        if above_last {
            return (pts[pts.len() - 2], pts[pts.len() - 1]);
        }
        for w in pts.windows(2) {
            let (lo, hi) = if ascending {
                (w[0].1, w[1].1)
            } else {
                (w[1].1, w[0].1)
            };
            if y >= lo && y <= hi {
                return (w[0], w[1]);
            }
        }
        (pts[pts.len() - 2], pts[pts.len() - 1])
    }
}

fn interp(a: (f64, f64), b: (f64, f64), x: f64) -> f64 {
    let (ax, ay) = a;
    let (bx, by) = b;
    if (bx - ax).abs() < f64::EPSILON {
        return ay;
    }
    ay + (x - ax) * (by - ay) / (bx - ax)
}

/// Accumulates (x, y) samples and fits a least-squares line `y = slope*x +
/// intercept` on demand.
#[derive(Debug, Clone, Default)]
pub struct SimpleLinearRegression {
    n: usize,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_xy: f64,
}

impl SimpleLinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64, y: f64) {
        self.n += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_xy += x * y;
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Returns `(slope, intercept)`, or `None` with fewer than two distinct
    /// samples.
    pub fn fit(&self) -> Option<(f64, f64)> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let denom = n * self.sum_xx - self.sum_x * self.sum_x;
        if denom.abs() < f64::EPSILON {
            return None;
        }
        let slope = (n * self.sum_xy - self.sum_x * self.sum_y) / denom;
        let intercept = (self.sum_y - slope * self.sum_x) / n;
        Some((slope, intercept))
    }
}

/// Declares equilibrium once `required_count` consecutive updates fall
/// within `tolerance` of an exponentially-smoothed running value (glossary:
/// "IIR-filtered delta check requiring N consecutive in-band samples").
#[derive(Debug, Clone)]
pub struct SteadyStateDetector {
    filter_alpha: f64,
    tolerance: f64,
    required_count: usize,
    filtered: Option<f64>,
    in_band_count: usize,
}

impl SteadyStateDetector {
    pub fn new(filter_alpha: f64, tolerance: f64, required_count: usize) -> Self {
        Self {
            filter_alpha,
            tolerance,
            required_count,
            filtered: None,
            in_band_count: 0,
        }
    }

    /// Feed a new measurement; returns `true` once equilibrium has been
    /// declared (`required_count` consecutive in-band samples).
    pub fn update(&mut self, value: f64) -> bool {
        let prev = self.filtered.unwrap_or(value);
        let filtered = prev + self.filter_alpha * (value - prev);
        let delta = (filtered - prev).abs();
        self.filtered = Some(filtered);

        if delta <= self.tolerance {
            self.in_band_count += 1;
        } else {
            self.in_band_count = 0;
        }

        self.in_band_count >= self.required_count
    }

    pub fn reset(&mut self) {
        self.filtered = None;
        self.in_band_count = 0;
    }

    pub fn filtered_value(&self) -> Option<f64> {
        self.filtered
    }
}
