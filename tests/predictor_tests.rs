use hotplate_core::{Predictor, TemperatureBand};

fn predictor() -> Predictor {
    Predictor::from_bands(&[
        TemperatureBand::new(25.0, 8.0, 12.0).with_power(6.0, 1.2),
        TemperatureBand::new(150.0, 10.0, 15.0).with_power(7.0, 1.0),
        TemperatureBand::new(220.0, 12.0, 18.0).with_power(8.0, 0.9),
    ])
}

#[test]
fn two_stage_prediction_pulls_surface_toward_element_then_ambient() {
    let mut p = predictor();
    let surface = p.predict_surface(200.0, 25.0, 1.5);
    // First tick: surface starts at ambient and moves toward element, then
    // loses some of that toward ambient — strictly between the two.
    assert!(surface > 25.0 && surface < 200.0);
}

#[test]
fn required_power_search_brackets_target_within_one_tick() {
    let p = predictor();
    let power = p
        .predict_required_power(40.0, 25.0, 1.5, 0.0, 120.0)
        .expect("power tables present");
    assert!((0.0..=120.0).contains(&power));
}

#[test]
fn scalar_bands_promote_to_single_point_table() {
    let p = Predictor::from_scalars(9.0, 14.0, Some(6.5), Some(1.1));
    assert!(p.has_power_tables());
}
