//! The periodic control loop (spec section 4.5): poll -> estimate ->
//! predict -> control -> apply, with bounded I/O timeouts, a ring buffer
//! of history (design-notes redesign flag replacing the "last" backlink
//! cycle), and signal-latched graceful shutdown. Grounded on the
//! thermal-governor tool's `governor()` loop (signal_hook flag checked
//! once per iteration, `thread::sleep` pacing).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::controller::{ControlInput, Controller};
use crate::error::EventLoopError;
use crate::power_supply::PowerSupply;
use crate::profile::Profile;
use crate::rtd::RtdEstimator;
use crate::sample::{Sample, SampleBuilder};
use crate::thermometer::ReferenceThermometer;

const DEFAULT_PERIOD: f64 = 1.5;
const DEFAULT_MAXIMUM_TEMPERATURE_RATE: f64 = 30.0;
const DEFAULT_HISTORY_CAPACITY: usize = 64;
const DEFAULT_MAX_CONSECUTIVE_POLL_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct SafetyLimits {
    pub element_cutoff_temperature: f64,
    pub maximum_temperature_rate: f64,
    /// Transient poll failures are tolerated (spec section 7) up to this
    /// many in a row; the next one escalates to a fatal device-unreachable
    /// error instead of retaining stale V/I forever.
    pub max_consecutive_poll_failures: u32,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            element_cutoff_temperature: 260.0,
            maximum_temperature_rate: DEFAULT_MAXIMUM_TEMPERATURE_RATE,
            max_consecutive_poll_failures: DEFAULT_MAX_CONSECUTIVE_POLL_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventLoopConfig {
    pub period: f64,
    pub ambient: f64,
    pub safety: SafetyLimits,
    pub history_capacity: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            ambient: 25.0,
            safety: SafetyLimits::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// A ring buffer of recent samples, replacing the "last"-backlink cycle
/// the design notes flag for removal; history lives on the EventLoop, not
/// on each Sample.
pub struct History {
    buffer: Vec<Sample>,
    capacity: usize,
    next: usize,
    len: usize,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            len: 0,
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(sample);
        } else {
            self.buffer[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    pub fn latest(&self) -> Option<&Sample> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.next + self.capacity - 1) % self.capacity;
        self.buffer.get(idx)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// An opaque on/off external actuator (spec section 1 non-goals: active
/// cooling is out of scope as a *control loop*, but the shutdown sequence
/// still flips this switch). No temperature-based logic lives here.
pub trait FanControl {
    fn set(&mut self, on: bool);
}

/// Installs SIGINT/SIGTERM/SIGQUIT handlers that latch a shared flag,
/// checked once per tick boundary (never mid-tick), per spec sections
/// 4.5/5.
pub fn install_shutdown_signal() -> std::io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGQUIT, Arc::clone(&flag))?;
    Ok(flag)
}

pub struct EventLoop<P: PowerSupply, T: ReferenceThermometer> {
    config: EventLoopConfig,
    supply: P,
    thermometer: Option<T>,
    rtd: RtdEstimator,
    controller: Controller,
    profile: Profile,
    history: History,
    shutdown: Arc<AtomicBool>,
    start_time: f64,
    anticipation_periods: f64,
    fan: Option<Box<dyn FanControl + Send>>,
    consecutive_poll_failures: u32,
}

impl<P: PowerSupply, T: ReferenceThermometer> EventLoop<P, T> {
    pub fn new(
        config: EventLoopConfig,
        supply: P,
        thermometer: Option<T>,
        rtd: RtdEstimator,
        controller: Controller,
        profile: Profile,
        shutdown: Arc<AtomicBool>,
        anticipation_periods: f64,
    ) -> Self {
        Self {
            history: History::new(config.history_capacity),
            config,
            supply,
            thermometer,
            rtd,
            controller,
            profile,
            shutdown,
            start_time: 0.0,
            anticipation_periods,
            fan: None,
            consecutive_poll_failures: 0,
        }
    }

    /// Attaches an opaque fan actuator, started during the shutdown
    /// sequence (spec section 4.5). Not wired by default; most supplies
    /// have no fan at all.
    pub fn set_fan(&mut self, fan: Box<dyn FanControl + Send>) {
        self.fan = Some(fan);
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Read-only access to the owned supply, for callers that want to
    /// observe its state (e.g. confirming the supply-off invariant after a
    /// fatal exit) without compromising the EventLoop's exclusive
    /// ownership of it.
    pub fn supply(&self) -> &P {
        &self.supply
    }

    /// Mutable access to the owned supply, for tests that need to perturb
    /// its simulated state between ticks.
    pub fn supply_mut(&mut self) -> &mut P {
        &mut self.supply
    }

    /// Runs one tick to completion, given wall-clock `now` (seconds since
    /// an arbitrary epoch) and `elapsed` (seconds since run start). Returns
    /// the built sample, or a fatal error after ensuring the supply is off.
    pub fn tick(&mut self, elapsed: f64) -> Result<Sample, EventLoopError> {
        let period = self.config.period;
        let ambient = self.config.ambient;

        let (voltage, current) = match self.supply.poll() {
            Ok(vi) => {
                self.consecutive_poll_failures = 0;
                vi
            }
            Err(e) => {
                self.consecutive_poll_failures += 1;
                if self.consecutive_poll_failures > self.config.safety.max_consecutive_poll_failures {
                    error!(
                        "poll failed {} times in a row, last error: {e}",
                        self.consecutive_poll_failures
                    );
                    self.shutdown_supply();
                    return Err(EventLoopError::DeviceUnreachable {
                        consecutive_failures: self.consecutive_poll_failures,
                        last_error: e.to_string(),
                    });
                }
                warn!(
                    "poll failed ({}/{} consecutive), retaining last known value: {e}",
                    self.consecutive_poll_failures, self.config.safety.max_consecutive_poll_failures
                );
                self.history
                    .latest()
                    .map(|s| (s.voltage, s.current))
                    .unwrap_or((0.0, 0.0))
            }
        };

        let mut builder = SampleBuilder::new(elapsed, period, ambient, "run")
            .with_poll(voltage, current, self.supply.minimum_measurable_current());

        let resistance = voltage / current.max(f64::EPSILON);
        let temperature_result = self
            .rtd
            .temperature_of(resistance, current, ambient, period);

        let temperature = match temperature_result {
            Ok(t) => Some(t),
            Err(crate::error::RtdError::Unavailable) => None,
            Err(e @ crate::error::RtdError::Runaway { .. }) => {
                error!("runaway detected: {e}");
                self.shutdown_supply();
                return Err(EventLoopError::Runaway(e.to_string()));
            }
        };
        builder = builder.with_temperature(temperature);

        if temperature.unwrap_or(ambient) >= self.config.safety.element_cutoff_temperature {
            error!("element cutoff temperature exceeded");
            self.shutdown_supply();
            return Err(EventLoopError::Runaway(
                "element cutoff temperature exceeded".to_string(),
            ));
        }

        if let Some(thermometer) = &self.thermometer {
            if let Some(reading) = thermometer.latest() {
                builder = builder.with_device_temperature(Some(reading.hot));
            }
        }

        let element_t = temperature.unwrap_or(ambient);
        let target_now = self.profile.target_at(elapsed);
        let target_ahead = self
            .profile
            .target_at(elapsed + self.anticipation_periods * period);

        let input = ControlInput {
            element_temperature: element_t,
            target_now,
            target_ahead,
            ambient,
            dt: period,
        };

        let limits = self.supply.limits();
        let (power, predicted) = self.controller.compute(input, limits.power.0, limits.power.1);
        let power = limits.clamp_power(power);

        builder = builder
            .with_predicted_temperature(predicted)
            .with_set_power(power);

        if let Err(e) = self.supply.set_power(power) {
            warn!("set_power failed: {e}");
        }

        let sample = builder.build();
        if !sample.invariants_hold(self.config.safety.maximum_temperature_rate, self.history.latest()) {
            error!("sample invariant violated, treating as runaway");
            self.shutdown_supply();
            return Err(EventLoopError::Runaway(
                "sample failed invariant check".to_string(),
            ));
        }

        debug!(
            "tick elapsed={:.1} T={:?} predicted={:.1} power={:.1}",
            elapsed, sample.temperature, sample.predicted_temperature, sample.set_power
        );

        self.history.push(sample.clone());
        Ok(sample)
    }

    fn shutdown_supply(&mut self) {
        if let Err(e) = self.supply.on(false) {
            error!("failed to command supply off during shutdown: {e}");
        }
        if let Some(thermometer) = &mut self.thermometer {
            let _ = thermometer.stop();
        }
        if let Some(fan) = &mut self.fan {
            fan.set(true);
        }
    }

    /// Runs until the profile completes or a fatal error or shutdown
    /// signal occurs. A tick that overruns by more than one period is
    /// logged and the missed target is skipped, per spec section 4.5 (no
    /// catch-up).
    pub fn run(&mut self) -> Result<(), EventLoopError> {
        self.start_time = 0.0;
        self.controller.reset();
        let mut elapsed = 0.0;
        let period = self.config.period;

        if let Some(thermometer) = &mut self.thermometer {
            thermometer.start().ok();
        }

        info!("starting event loop, profile duration {:.1}s", self.profile.duration());

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown signal latched, stopping after current tick");
                self.shutdown_supply();
                return Err(EventLoopError::Signal);
            }

            let tick_start = std::time::Instant::now();
            match self.tick(elapsed) {
                Ok(_) => {}
                Err(e) => {
                    self.shutdown_supply();
                    return Err(e);
                }
            }

            let tick_duration = tick_start.elapsed().as_secs_f64();
            if tick_duration > period {
                warn!("tick overran period ({tick_duration:.2}s > {period:.2}s), skipping catch-up");
            } else {
                std::thread::sleep(Duration::from_secs_f64(period - tick_duration));
            }

            elapsed += period;
            if elapsed >= self.profile.duration() {
                info!("profile complete, shutting down cleanly");
                self.shutdown_supply();
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{BangBangParams, OnPower};
    use crate::power_supply::{Limits, MockPowerSupply};
    use crate::predictor::{Predictor, TemperatureBand};
    use crate::thermometer::MultimeterThermometer;

    fn test_loop() -> EventLoop<MockPowerSupply, MultimeterThermometer> {
        let limits = Limits::new((0.0, 60.0), (0.0, 10.0), (0.0, 120.0));
        let mut supply = MockPowerSupply::new(5.0, limits, 0.05);
        supply.on(true).unwrap();
        let rtd = {
            let mut rtd = RtdEstimator::new(0.05, 1000.0);
            rtd.add_point(5.0, 25.0);
            rtd.add_point(6.0, 75.0);
            rtd
        };
        let predictor = Predictor::from_bands(&[TemperatureBand::new(25.0, 8.0, 12.0)]);
        let controller = Controller::bang_bang(
            BangBangParams {
                hysteresis_low: 1.0,
                hysteresis_high: 0.0,
                on_power: OnPower::Fixed(50.0),
            },
            predictor,
        );
        let profile = Profile::new([(0.0, 25.0), (10.0, 25.0)]);
        let shutdown = Arc::new(AtomicBool::new(false));
        EventLoop::new(
            EventLoopConfig::default(),
            supply,
            None,
            rtd,
            controller,
            profile,
            shutdown,
            4.0,
        )
    }

    #[test]
    fn idle_profile_keeps_predicted_temperature_near_ambient() {
        // Scenario A, spec section 8.
        let mut event_loop = test_loop();
        let mut last = 25.0;
        for i in 0..20 {
            let sample = event_loop.tick(i as f64 * 1.5).unwrap();
            last = sample.predicted_temperature;
        }
        assert!((last - 25.0).abs() < 0.5);
    }

    #[test]
    fn supply_is_commanded_off_on_shutdown_signal() {
        // Property 6 / Scenario F: supply-off invariant.
        let mut event_loop = test_loop();
        event_loop.shutdown.store(true, Ordering::SeqCst);
        let result = event_loop.run();
        assert!(matches!(result, Err(EventLoopError::Signal)));
        assert_eq!(event_loop.supply.off_calls.last(), Some(&false));
    }

    #[test]
    fn history_ring_buffer_wraps_without_growing() {
        let mut event_loop = test_loop();
        event_loop.config.history_capacity = 4;
        event_loop.history = History::new(4);
        for i in 0..10 {
            event_loop.tick(i as f64 * 1.5).unwrap();
        }
        assert_eq!(event_loop.history.len(), 4);
    }

    #[test]
    fn poll_failures_are_tolerated_until_the_cap_then_escalate() {
        let mut event_loop = test_loop();
        event_loop.config.safety.max_consecutive_poll_failures = 2;
        event_loop.supply_mut().fail_next_polls = 3;

        event_loop.tick(0.0).expect("first failure tolerated");
        event_loop.tick(1.5).expect("second failure tolerated");
        let result = event_loop.tick(3.0);

        assert!(matches!(
            result,
            Err(EventLoopError::DeviceUnreachable { consecutive_failures: 3, .. })
        ));
        assert_eq!(event_loop.supply().off_calls.last(), Some(&false));
    }

    #[test]
    fn a_successful_poll_resets_the_consecutive_failure_count() {
        let mut event_loop = test_loop();
        event_loop.config.safety.max_consecutive_poll_failures = 1;
        event_loop.supply_mut().fail_next_polls = 1;

        event_loop.tick(0.0).expect("one failure tolerated");
        event_loop.tick(1.5).expect("poll recovers, resets counter");
        event_loop.supply_mut().fail_next_polls = 1;
        event_loop.tick(3.0).expect("fresh failure is within the cap again");
    }

    struct RecordingFan {
        started: Arc<AtomicBool>,
    }

    impl FanControl for RecordingFan {
        fn set(&mut self, on: bool) {
            self.started.store(on, Ordering::SeqCst);
        }
    }

    #[test]
    fn fan_is_started_during_shutdown_when_attached() {
        let mut event_loop = test_loop();
        let started = Arc::new(AtomicBool::new(false));
        event_loop.set_fan(Box::new(RecordingFan {
            started: Arc::clone(&started),
        }));
        event_loop.shutdown_supply();
        assert!(started.load(Ordering::SeqCst));
    }
}
