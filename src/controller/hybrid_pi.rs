//! Feed-forward + PI controller with back-calculation anti-windup
//! (spec section 4.3.1), grounded on the photoacoustic thermal daemon's
//! `PidController` (anti-windup clamp over f64 gains) and the teacher's
//! `auto_tuner`/`predictive_thermal` pairing of a PI loop with a model-based
//! feed-forward term.

use crate::error::ControllerError;
use crate::predictor::Predictor;

use super::ControlInput;

#[derive(Debug, Clone, Copy)]
pub struct HybridPiParams {
    pub kp: f64,
    pub ki: f64,
    pub kaw: f64,
    pub feed_forward_gain: f64,
    pub anti_windup_clamp_percent: f64,
    pub anticipation_samples: u32,
    pub settling_window_samples: u32,
}

impl Default for HybridPiParams {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.05,
            kaw: 0.5,
            feed_forward_gain: 0.8,
            anti_windup_clamp_percent: 80.0,
            anticipation_samples: 4,
            settling_window_samples: 5,
        }
    }
}

pub struct HybridPi {
    params: HybridPiParams,
    pub(super) predictor: Predictor,
    integral: f64,
    ticks: u32,
}

impl HybridPi {
    pub fn new(params: HybridPiParams, predictor: Predictor) -> Result<Self, ControllerError> {
        if params.feed_forward_gain > 0.0 && !predictor.has_power_tables() {
            return Err(ControllerError::FeedForwardRequiresPowerTable);
        }
        Ok(Self {
            params,
            predictor,
            integral: 0.0,
            ticks: 0,
        })
    }

    pub fn reset(&mut self) {
        self.predictor.reset();
        self.integral = 0.0;
        self.ticks = 0;
    }

    pub fn compute(&mut self, input: ControlInput, p_min: f64, p_max: f64) -> (f64, f64) {
        let predicted = self
            .predictor
            .predict_surface(input.element_temperature, input.ambient, input.dt);

        let feed_forward = if self.params.feed_forward_gain > 0.0 {
            self.predictor
                .predict_required_power(input.target_ahead, input.ambient, input.dt, p_min, p_max)
                .map(|p| self.params.feed_forward_gain * p)
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let error = input.target_now - predicted;

        let in_settling_window = self.ticks < self.params.settling_window_samples;
        self.ticks += 1;

        let previous_integral = self.integral;
        if !in_settling_window {
            self.integral += error * self.params.ki * input.dt;
        }

        let clamp = (self.params.anti_windup_clamp_percent / 100.0) * p_max;
        self.integral = self.integral.clamp(-clamp, clamp);

        let p_unsat = feed_forward + self.params.kp * error + self.integral;
        let p_sat = p_unsat.clamp(p_min, p_max);

        if p_sat != p_unsat {
            let saturated_high = p_unsat > p_max;
            let error_pushes_same_direction =
                (saturated_high && error > 0.0) || (!saturated_high && error < 0.0);
            if error_pushes_same_direction {
                // Back-calculation: undo the increment this tick just made.
                self.integral = previous_integral - self.params.kaw * (p_unsat - p_sat) * input.dt;
                self.integral = self.integral.clamp(-clamp, clamp);
            }
        }

        (p_sat, predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::{Predictor, TemperatureBand};

    fn predictor_with_power() -> Predictor {
        Predictor::from_bands(&[
            TemperatureBand::new(25.0, 8.0, 12.0).with_power(6.0, 1.2),
            TemperatureBand::new(220.0, 12.0, 18.0).with_power(8.0, 0.9),
        ])
    }

    #[test]
    fn feed_forward_without_power_table_fails_construction() {
        let predictor = Predictor::from_bands(&[TemperatureBand::new(25.0, 8.0, 12.0)]);
        let params = HybridPiParams {
            feed_forward_gain: 0.5,
            ..HybridPiParams::default()
        };
        let result = HybridPi::new(params, predictor);
        assert!(matches!(result, Err(ControllerError::FeedForwardRequiresPowerTable)));
    }

    #[test]
    fn integral_is_suppressed_during_settling_window() {
        let params = HybridPiParams {
            feed_forward_gain: 0.0,
            settling_window_samples: 3,
            ..HybridPiParams::default()
        };
        let mut pi = HybridPi::new(params, predictor_with_power()).unwrap();
        let input = ControlInput {
            element_temperature: 25.0,
            target_now: 150.0,
            target_ahead: 150.0,
            ambient: 25.0,
            dt: 1.5,
        };
        for _ in 0..3 {
            pi.compute(input, 0.0, 120.0);
        }
        assert_eq!(pi.integral, 0.0);
        pi.compute(input, 0.0, 120.0);
        assert_ne!(pi.integral, 0.0);
    }

    #[test]
    fn integral_stays_within_anti_windup_clamp() {
        // Property 5: PI anti-windup, spec section 8.
        let params = HybridPiParams {
            feed_forward_gain: 0.0,
            settling_window_samples: 0,
            anti_windup_clamp_percent: 20.0,
            ..HybridPiParams::default()
        };
        let mut pi = HybridPi::new(params, predictor_with_power()).unwrap();
        let input = ControlInput {
            element_temperature: 25.0,
            target_now: 1000.0, // sustained large positive error
            target_ahead: 1000.0,
            ambient: 25.0,
            dt: 1.5,
        };
        let p_max = 120.0;
        for _ in 0..500 {
            pi.compute(input, 0.0, p_max);
            assert!(pi.integral.abs() <= 0.20 * p_max + 1e-9);
        }
    }
}
