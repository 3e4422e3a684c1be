//! Hysteresis on/off controller (spec section 4.3.2).

use crate::numeric::PiecewiseLinear;
use crate::predictor::Predictor;

use super::ControlInput;

#[derive(Debug, Clone)]
pub struct BangBangParams {
    pub hysteresis_low: f64,
    pub hysteresis_high: f64,
    pub on_power: OnPower,
}

#[derive(Debug, Clone)]
pub enum OnPower {
    Fixed(f64),
    Curve(PiecewiseLinear),
}

impl OnPower {
    fn eval(&self, temperature: f64) -> f64 {
        match self {
            OnPower::Fixed(p) => *p,
            OnPower::Curve(curve) => curve.eval(temperature),
        }
    }
}

pub struct BangBang {
    params: BangBangParams,
    pub(super) predictor: Predictor,
    on: bool,
}

impl BangBang {
    pub fn new(params: BangBangParams, predictor: Predictor) -> Self {
        Self {
            params,
            predictor,
            on: false,
        }
    }

    pub fn reset(&mut self) {
        self.predictor.reset();
        self.on = false;
    }

    pub fn compute(&mut self, input: ControlInput, p_min: f64, p_max: f64) -> (f64, f64) {
        let predicted = self
            .predictor
            .predict_surface(input.element_temperature, input.ambient, input.dt);
        // Note: opposite sign convention from HybridPI's `target - predicted`.
        // Here `error` is `predicted - target` so "error < -low" reads as
        // "predicted is more than `low` below target" (too cold, turn on).
        let error = predicted - input.target_now;

        if !self.on && error < -self.params.hysteresis_low {
            self.on = true;
        } else if self.on && error >= self.params.hysteresis_high {
            self.on = false;
        }

        let power = if self.on {
            self.params.on_power.eval(predicted).clamp(p_min, p_max)
        } else {
            p_min
        };

        (power, predicted)
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}
