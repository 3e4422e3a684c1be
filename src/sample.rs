//! The per-tick data record and its mutable builder.
//!
//! Per the design notes, the old "Status with a `last` backlink forming a
//! cycle" shape is replaced: `Sample` is a plain immutable record, and
//! history is kept as a ring buffer owned by [`crate::event_loop::EventLoop`].

/// A single tick's fully-resolved measurement and control record.
///
/// Immutable once built; [`SampleBuilder`] assembles one per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub now: f64,
    pub period: f64,
    pub voltage: f64,
    pub current: f64,
    pub resistance: Option<f64>,
    pub power: f64,
    pub temperature: Option<f64>,
    pub predicted_temperature: f64,
    pub ambient: f64,
    pub device_temperature: Option<f64>,
    pub stage: String,
    pub set_power: f64,
}

impl Sample {
    pub fn invariants_hold(&self, maximum_temperature_rate: f64, previous: Option<&Sample>) -> bool {
        if self.period <= 0.0 {
            return false;
        }
        if self.resistance.is_none() != self.temperature.is_none() {
            return false;
        }
        if let (Some(prev), Some(t), Some(pt)) =
            (previous, self.temperature, previous.and_then(|p| p.temperature))
        {
            let rate = (t - pt).abs() / self.period;
            if rate > maximum_temperature_rate {
                return false;
            }
        }
        true
    }
}

/// Accumulates a [`Sample`]'s fields across a tick's poll/estimate/predict/
/// control stages, in the order `§4.5` fixes.
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    now: f64,
    period: f64,
    voltage: f64,
    current: f64,
    resistance: Option<f64>,
    power: f64,
    temperature: Option<f64>,
    predicted_temperature: f64,
    ambient: f64,
    device_temperature: Option<f64>,
    stage: String,
    set_power: f64,
}

impl SampleBuilder {
    pub fn new(now: f64, period: f64, ambient: f64, stage: impl Into<String>) -> Self {
        Self {
            now,
            period,
            voltage: 0.0,
            current: 0.0,
            resistance: None,
            power: 0.0,
            temperature: None,
            predicted_temperature: ambient,
            ambient,
            device_temperature: None,
            stage: stage.into(),
            set_power: 0.0,
        }
    }

    /// Attach the polled voltage/current, computing resistance and power
    /// when current is above the interface's minimum measurable threshold.
    pub fn with_poll(mut self, voltage: f64, current: f64, minimum_measurable_current: f64) -> Self {
        self.voltage = voltage;
        self.current = current;
        self.power = voltage * current;
        self.resistance = if current >= minimum_measurable_current {
            Some(voltage / current)
        } else {
            None
        };
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_predicted_temperature(mut self, t: f64) -> Self {
        self.predicted_temperature = t;
        self
    }

    pub fn with_device_temperature(mut self, t: Option<f64>) -> Self {
        self.device_temperature = t;
        self
    }

    pub fn with_set_power(mut self, p: f64) -> Self {
        self.set_power = p;
        self
    }

    /// Overrides the resistance/power directly, bypassing `with_poll`'s
    /// threshold computation; used by tests that stage synthetic traces.
    pub fn with_resistance_and_power(mut self, resistance: f64, power: f64) -> Self {
        self.resistance = Some(resistance);
        self.power = power;
        self
    }

    pub fn build(self) -> Sample {
        Sample {
            now: self.now,
            period: self.period,
            voltage: self.voltage,
            current: self.current,
            resistance: self.resistance,
            power: self.power,
            temperature: self.temperature,
            predicted_temperature: self.predicted_temperature,
            ambient: self.ambient,
            device_temperature: self.device_temperature,
            stage: self.stage,
            set_power: self.set_power,
        }
    }
}

/// A calibration point recorded by, or fed into, the RTD estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub resistance: f64,
    pub temperature: f64,
    pub thermal_resistance: Option<f64>,
    pub heat_capacity: Option<f64>,
}

impl CalibrationPoint {
    pub fn new(resistance: f64, temperature: f64) -> Self {
        Self {
            resistance,
            temperature,
            thermal_resistance: None,
            heat_capacity: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_computes_resistance_above_threshold() {
        let s = SampleBuilder::new(0.0, 1.5, 25.0, "idle")
            .with_poll(10.0, 2.0, 0.05)
            .build();
        assert_eq!(s.resistance, Some(5.0));
        assert_eq!(s.power, 20.0);
    }

    #[test]
    fn builder_omits_resistance_below_threshold() {
        let s = SampleBuilder::new(0.0, 1.5, 25.0, "idle")
            .with_poll(10.0, 0.01, 0.05)
            .build();
        assert_eq!(s.resistance, None);
    }

    #[test]
    fn invariants_reject_nonpositive_period() {
        let s = SampleBuilder::new(0.0, 0.0, 25.0, "idle").build();
        assert!(!s.invariants_hold(30.0, None));
    }

    #[test]
    fn invariants_reject_runaway_rate() {
        let prev = SampleBuilder::new(0.0, 1.0, 25.0, "idle")
            .with_temperature(Some(25.0))
            .build();
        let cur = SampleBuilder::new(1.0, 1.0, 25.0, "idle")
            .with_temperature(Some(100.0))
            .build();
        assert!(!cur.invariants_hold(30.0, Some(&prev)));
    }
}
