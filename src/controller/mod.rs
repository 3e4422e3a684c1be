//! Controller variants (spec section 4.3): a small closed set picked at
//! configuration time rather than dynamic dispatch by name, per the
//! design-notes redesign flag.

mod bang_bang;
mod hybrid_pi;

pub use bang_bang::{BangBang, BangBangParams, OnPower};
pub use hybrid_pi::{HybridPi, HybridPiParams};

use crate::error::ControllerError;
use crate::predictor::Predictor;

/// A tick's inputs to the controller: measured element temperature, the
/// profile's current and anticipated target, ambient, and sample period.
#[derive(Debug, Clone, Copy)]
pub struct ControlInput {
    pub element_temperature: f64,
    pub target_now: f64,
    pub target_ahead: f64,
    pub ambient: f64,
    pub dt: f64,
}

/// The two controller variants, as a closed tagged sum rather than a
/// trait object picked by reflection (design-notes redesign flag).
pub enum Controller {
    HybridPi(HybridPi),
    BangBang(BangBang),
}

impl Controller {
    pub fn hybrid_pi(params: HybridPiParams, predictor: Predictor) -> Result<Self, ControllerError> {
        Ok(Controller::HybridPi(HybridPi::new(params, predictor)?))
    }

    pub fn bang_bang(params: BangBangParams, predictor: Predictor) -> Self {
        Controller::BangBang(BangBang::new(params, predictor))
    }

    pub fn reset(&mut self) {
        match self {
            Controller::HybridPi(c) => c.reset(),
            Controller::BangBang(c) => c.reset(),
        }
    }

    /// Runs one tick, returning the unsaturated-then-clamped power request
    /// and the predicted surface temperature used to compute it.
    pub fn compute(&mut self, input: ControlInput, p_min: f64, p_max: f64) -> (f64, f64) {
        match self {
            Controller::HybridPi(c) => c.compute(input, p_min, p_max),
            Controller::BangBang(c) => c.compute(input, p_min, p_max),
        }
    }

    pub fn predictor(&self) -> &Predictor {
        match self {
            Controller::HybridPi(c) => &c.predictor,
            Controller::BangBang(c) => &c.predictor,
        }
    }
}
