//! RTD resistance→temperature estimator (spec section 4.1): the heating
//! element doubles as its own sensor, so temperature is inferred from
//! measured resistance via calibration points plus a copper fallback.

use crate::error::RtdError;
use crate::numeric::PiecewiseLinear;
use crate::sample::CalibrationPoint;

/// Copper's temperature coefficient of resistance, per °C.
pub const COPPER_ALPHA: f64 = 0.00393;

/// Maps measured element resistance to temperature.
#[derive(Debug, Clone)]
pub struct RtdEstimator {
    table: PiecewiseLinear,
    auto_seed_disabled: bool,
    minimum_measurable_current: f64,
    maximum_temperature_rate: f64,
    last_temperature: Option<f64>,
}

impl RtdEstimator {
    pub fn new(minimum_measurable_current: f64, maximum_temperature_rate: f64) -> Self {
        Self {
            table: PiecewiseLinear::new(),
            auto_seed_disabled: false,
            minimum_measurable_current,
            maximum_temperature_rate,
            last_temperature: None,
        }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        self.table.points()
    }

    pub fn add_point(&mut self, resistance: f64, temperature: f64) {
        self.table.add_point(resistance, temperature);
    }

    pub fn add_calibration_point(&mut self, point: CalibrationPoint) {
        self.add_point(point.resistance, point.temperature);
    }

    /// Clears all calibration points; `disable_autoseed` controls whether
    /// a future single-point seeding from `temperature_of` is allowed.
    pub fn reset(&mut self, disable_autoseed: bool) {
        self.table = PiecewiseLinear::new();
        self.auto_seed_disabled = disable_autoseed;
        self.last_temperature = None;
    }

    /// Back-calculates the resistance a copper RTD would read at
    /// `temperature`, given one known (resistance, temperature) anchor.
    fn copper_resistance_at(anchor_r: f64, anchor_t: f64, temperature: f64) -> f64 {
        anchor_r * (1.0 + COPPER_ALPHA * (temperature - anchor_t))
    }

    /// Seeds the table with a synthetic second point using the copper
    /// coefficient, so a line exists for interpolation (spec section 4.1:
    /// "with one point, synthesize a second point").
    fn synthesize_second_point(&mut self) {
        debug_assert_eq!(self.table.len(), 1);
        let (r0, t0) = self.table.points()[0];
        let t1 = t0 + 50.0;
        let r1 = Self::copper_resistance_at(r0, t0, t1);
        self.table.add_point(r1, t1);
    }

    /// Seeds a fresh table from a live (resistance, ambient) observation:
    /// one point at the observation, and a back-calculated 20 °C point via
    /// the copper coefficient (spec section 4.1).
    fn auto_seed(&mut self, resistance: f64, ambient: f64) {
        self.table.add_point(resistance, ambient);
        let r20 = Self::copper_resistance_at(resistance, ambient, 20.0);
        self.table.add_point(r20, 20.0);
    }

    /// Maps a measured element resistance to temperature, given the sample
    /// period (for the runaway-rate check) and current ambient (for
    /// auto-seeding an empty table).
    pub fn temperature_of(
        &mut self,
        resistance: f64,
        current: f64,
        ambient: f64,
        period: f64,
    ) -> Result<f64, RtdError> {
        if current < self.minimum_measurable_current {
            return Err(RtdError::Unavailable);
        }

        if self.table.is_empty() {
            if self.auto_seed_disabled {
                self.table.add_point(resistance, ambient);
            } else {
                self.auto_seed(resistance, ambient);
            }
        } else if self.table.len() == 1 {
            self.synthesize_second_point();
        }

        let temperature = self.table.eval(resistance);

        if let Some(prev) = self.last_temperature {
            let rate = (temperature - prev).abs() / period;
            if rate > self.maximum_temperature_rate {
                return Err(RtdError::Runaway {
                    rate,
                    limit: self.maximum_temperature_rate,
                });
            }
        }
        self.last_temperature = Some(temperature);
        Ok(temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_point_autoseeds_a_line() {
        let mut rtd = RtdEstimator::new(0.05, 30.0);
        rtd.add_point(5.0, 25.0);
        let t = rtd.temperature_of(5.0, 1.0, 25.0, 1.5).unwrap();
        assert!((t - 25.0).abs() < 1e-6);
    }

    #[test]
    fn empty_table_autoseeds_from_observation() {
        let mut rtd = RtdEstimator::new(0.05, 30.0);
        let t = rtd.temperature_of(5.0, 1.0, 25.0, 1.5).unwrap();
        assert!((t - 25.0).abs() < 1e-6);
        assert_eq!(rtd.points().len(), 2);
    }

    #[test]
    fn below_minimum_current_is_unavailable() {
        let mut rtd = RtdEstimator::new(0.05, 30.0);
        rtd.add_point(5.0, 25.0);
        rtd.add_point(6.0, 75.0);
        let err = rtd.temperature_of(5.5, 0.001, 25.0, 1.5).unwrap_err();
        assert_eq!(err, RtdError::Unavailable);
    }

    #[test]
    fn runaway_rate_is_fatal() {
        let mut rtd = RtdEstimator::new(0.05, 1.0);
        rtd.add_point(5.0, 25.0);
        rtd.add_point(6.0, 75.0);
        rtd.temperature_of(5.0, 1.0, 25.0, 1.0).unwrap();
        let err = rtd.temperature_of(6.0, 1.0, 25.0, 1.0).unwrap_err();
        assert!(matches!(err, RtdError::Runaway { .. }));
    }

    #[test]
    fn reset_with_disabled_autoseed_keeps_single_point() {
        let mut rtd = RtdEstimator::new(0.05, 30.0);
        rtd.add_point(5.0, 25.0);
        rtd.reset(true);
        rtd.temperature_of(5.0, 1.0, 25.0, 1.5).unwrap();
        assert_eq!(rtd.points().len(), 1);
    }

    proptest! {
        // Property 1: RTD round-trip, spec section 8.
        #[test]
        fn round_trip_within_calibration_range(
            r1 in 1.0f64..10.0,
            r2 in 10.0f64..50.0,
            t1 in -20.0f64..100.0,
            t2 in 100.0f64..300.0,
            frac in 0.0f64..1.0,
        ) {
            let mut rtd = RtdEstimator::new(0.05, 1000.0);
            rtd.add_point(r1, t1);
            rtd.add_point(r2, t2);
            let target_t = t1 + frac * (t2 - t1);
            let table = PiecewiseLinear::from_points([(r1, t1), (r2, t2)]);
            let r = table.invert(target_t);
            let got = rtd.temperature_of(r, 1.0, t1, 1.5).unwrap();
            prop_assert!((got - target_t).abs() < 1e-6);
        }

        // Property 2: single-point auto-seed, spec section 8.
        #[test]
        fn single_point_auto_seed_within_tolerance(
            r0 in 1.0f64..50.0,
            t0 in -20.0f64..200.0,
            delta in -50.0f64..50.0,
        ) {
            let mut rtd = RtdEstimator::new(0.0, 1000.0);
            rtd.add_point(r0, t0);
            let r = RtdEstimator::copper_resistance_at(r0, t0, t0 + delta);
            let got = rtd.temperature_of(r, 1.0, t0, 1.5).unwrap();
            prop_assert!((got - (t0 + delta)).abs() < 1e-3);
        }
    }
}
