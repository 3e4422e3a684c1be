//! Bounded numerical minimum search (spec section 4.6): grid-evaluate an
//! objective over a box, shrink around the best point, recurse. Used both
//! for calibration curve fitting and predictor-table tuning. Grounded on
//! the teacher's `AutoTuner` relay/Ziegler-Nichols search, which evaluates
//! a scored grid of candidate gains and narrows toward the best one.

/// A per-dimension search bound, with an optional hard lower constraint
/// (e.g. a time constant must stay positive regardless of how far the box
/// shrinks).
#[derive(Debug, Clone, Copy)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
    pub lower_constraint: Option<f64>,
}

impl Bound {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            lower_constraint: None,
        }
    }

    pub fn with_lower_constraint(mut self, lower: f64) -> Self {
        self.lower_constraint = Some(lower);
        self
    }

    fn clamp_min(&self, v: f64) -> f64 {
        match self.lower_constraint {
            Some(lc) => v.max(lc),
            None => v,
        }
    }
}

/// Runs the grid+shrink-and-recurse minimum search described in spec
/// section 4.6. `objective` is evaluated at each grid point; `steps` points
/// per dimension; `depth` recursion levels; stops early once the box width
/// on every dimension is below `threshold`.
///
/// When the grid spans more than [`PARALLEL_THRESHOLD`] points, evaluation
/// runs across a bounded set of scoped worker threads instead of serially —
/// the only concurrency this module introduces, confined to calibration
/// postprocess outside the real-time loop per spec section 5.
pub fn minimum_search<F>(mut bounds: Vec<Bound>, steps: usize, depth: usize, threshold: f64, objective: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    assert!(steps >= 2, "grid search needs at least 2 steps per dimension");
    let dims = bounds.len();
    let mut best_point = bounds.iter().map(|b| (b.min + b.max) / 2.0).collect::<Vec<_>>();

    for _ in 0..depth {
        let grid = build_grid(&bounds, steps);
        let scored = evaluate_grid(&grid, &objective);

        let (best_idx, _) = scored
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .expect("grid is non-empty");
        best_point = grid[best_idx].clone();

        let converged = bounds.iter().all(|b| (b.max - b.min) <= threshold);
        if converged {
            break;
        }

        for d in 0..dims {
            let bound = &bounds[d];
            let span = (bound.max - bound.min) / (steps as f64 - 1.0);
            let new_min = bound.clamp_min(best_point[d] - span);
            let new_max = best_point[d] + span;
            bounds[d] = Bound {
                min: new_min.min(new_max),
                max: new_max.max(new_min),
                lower_constraint: bound.lower_constraint,
            };
        }
    }

    best_point
}

/// 1-D convenience wrapper over [`minimum_search`].
pub fn minimum_search_1d<F>(bound: Bound, steps: usize, depth: usize, threshold: f64, objective: F) -> f64
where
    F: Fn(f64) -> f64 + Sync,
{
    let result = minimum_search(vec![bound], steps, depth, threshold, |p| objective(p[0]));
    result[0]
}

fn build_grid(bounds: &[Bound], steps: usize) -> Vec<Vec<f64>> {
    let axes: Vec<Vec<f64>> = bounds
        .iter()
        .map(|b| {
            (0..steps)
                .map(|i| b.min + (b.max - b.min) * (i as f64) / (steps as f64 - 1.0))
                .collect()
        })
        .collect();

    let mut points = vec![Vec::with_capacity(bounds.len())];
    for axis in &axes {
        let mut next = Vec::with_capacity(points.len() * axis.len());
        for prefix in &points {
            for &v in axis {
                let mut p = prefix.clone();
                p.push(v);
                next.push(p);
            }
        }
        points = next;
    }
    points
}

const PARALLEL_THRESHOLD: usize = 64;

fn evaluate_grid<F>(grid: &[Vec<f64>], objective: &F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    if grid.len() < PARALLEL_THRESHOLD {
        return grid.iter().map(|p| objective(p)).collect();
    }

    let worker_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(grid.len());
    let chunk_size = grid.len().div_ceil(worker_count);

    std::thread::scope(|scope| {
        let handles: Vec<_> = grid
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || chunk.iter().map(|p| objective(p)).collect::<Vec<_>>()))
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    })
}

/// Optional error biasing by `(T_expected - T_ambient)`, per spec section
/// 4.6, applied by callers that want larger expected excursions to weigh
/// relative rather than absolute error.
pub fn biased_squared_error(expected: f64, actual: f64, ambient: f64) -> f64 {
    let scale = (expected - ambient).abs().max(1.0);
    ((expected - actual) / scale).powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn finds_minimum_of_simple_quadratic_1d() {
        let bound = Bound::new(-10.0, 10.0);
        let minimum = minimum_search_1d(bound, 10, 6, 1e-4, |x| (x - 3.0).powi(2));
        assert!((minimum - 3.0).abs() < 1e-2);
    }

    #[test]
    fn finds_minimum_of_quadratic_2d() {
        let bounds = vec![Bound::new(-10.0, 10.0), Bound::new(-10.0, 10.0)];
        let minimum = minimum_search(bounds, 9, 6, 1e-4, |p| (p[0] - 2.0).powi(2) + (p[1] + 1.0).powi(2));
        assert!((minimum[0] - 2.0).abs() < 0.1);
        assert!((minimum[1] + 1.0).abs() < 0.1);
    }

    #[test]
    fn respects_lower_constraint() {
        let bound = Bound::new(-10.0, 10.0).with_lower_constraint(0.5);
        let minimum = minimum_search_1d(bound, 10, 6, 1e-4, |x| (x - 0.0).powi(2));
        assert!(minimum >= 0.5 - 1e-9);
    }

    proptest! {
        // Property 7: minimum-search correctness on a known convex quadratic.
        #[test]
        fn recovers_analytical_minimum_of_shifted_quadratic(target in -5.0f64..5.0) {
            let bound = Bound::new(-20.0, 20.0);
            let minimum = minimum_search_1d(bound, 12, 8, 1e-5, |x| (x - target).powi(2));
            prop_assert!((minimum - target).abs() < 0.05);
        }
    }
}
