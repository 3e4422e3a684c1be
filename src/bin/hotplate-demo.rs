//! Smoke-test wiring: runs the control core against the in-memory mock
//! power supply so the crate's pieces link and tick end to end. Not the
//! CLI/HTTP glue named out of scope in the core's spec — just proof the
//! core runs.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use hotplate_core::controller::{BangBangParams, Controller, OnPower};
use hotplate_core::event_loop::{EventLoop, EventLoopConfig};
use hotplate_core::power_supply::{Limits, MockPowerSupply, PowerSupply};
use hotplate_core::predictor::{Predictor, TemperatureBand};
use hotplate_core::thermometer::MultimeterThermometer;
use hotplate_core::{Profile, RtdEstimator};

fn main() {
    env_logger::init();

    let limits = Limits::new((0.0, 60.0), (0.0, 10.0), (0.0, 120.0));
    let mut supply = MockPowerSupply::new(4.2, limits, 0.05);
    supply.on(true).expect("mock supply does not fail");

    let mut rtd = RtdEstimator::new(0.05, 1000.0);
    rtd.add_point(4.2, 25.0);
    rtd.add_point(5.5, 150.0);

    let predictor = Predictor::from_bands(&[
        TemperatureBand::new(25.0, 8.0, 12.0).with_power(6.0, 1.2),
        TemperatureBand::new(150.0, 10.0, 15.0).with_power(7.0, 1.0),
        TemperatureBand::new(220.0, 12.0, 18.0).with_power(8.0, 0.9),
    ]);

    let controller = Controller::bang_bang(
        BangBangParams {
            hysteresis_low: 1.0,
            hysteresis_high: 0.0,
            on_power: OnPower::Fixed(80.0),
        },
        predictor,
    );

    let profile = Profile::new([(0.0, 25.0), (60.0, 150.0), (300.0, 150.0)]);
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut event_loop: EventLoop<MockPowerSupply, MultimeterThermometer> = EventLoop::new(
        EventLoopConfig::default(),
        supply,
        None,
        rtd,
        controller,
        profile,
        shutdown,
        4.0,
    );

    match event_loop.run() {
        Ok(()) => log::info!("demo run completed cleanly"),
        Err(e) => {
            log::error!("demo run ended: {e}");
            std::process::exit(1);
        }
    }
}
