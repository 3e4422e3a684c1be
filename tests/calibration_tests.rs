use hotplate_core::calibration::file::{BandParameter, CalibrationFile};
use hotplate_core::calibration::postprocess::{equilibrium, partition_by_stage, thermal_resistance};
use hotplate_core::calibration::search::{minimum_search_1d, Bound};
use hotplate_core::CalibrationPoint;

#[test]
fn calibration_file_round_trips_sections_in_sorted_order() {
    let file = CalibrationFile {
        temperatures: vec![CalibrationPoint::new(6.0, 125.0), CalibrationPoint::new(5.0, 25.0)],
        thermal_resistance: vec![BandParameter {
            temperature: 150.0,
            value: 2.4,
        }],
        heat_capacity: vec![BandParameter {
            temperature: 150.0,
            value: 42.0,
        }],
    };
    let text = file.serialize();
    assert!(text.find("resistance: 5").unwrap() < text.find("resistance: 6").unwrap());
    let parsed = CalibrationFile::parse(&text).unwrap();
    assert_eq!(parsed.temperatures.len(), 2);
}

#[test]
fn minimum_search_recovers_rtheta_within_tolerance() {
    // Scenario E (tau/Rtheta recovery), spec section 8, simplified to a
    // direct search over a known quadratic cost centered on the true Rtheta.
    let true_rtheta = 2.4;
    let bound = Bound::new(0.1, 10.0);
    let recovered = minimum_search_1d(bound, 12, 8, 1e-4, |r| (r - true_rtheta).powi(2));
    let error_pct = (recovered - true_rtheta).abs() / true_rtheta * 100.0;
    assert!(error_pct < 2.0, "error {error_pct}% exceeds 2% tolerance");
}

#[test]
fn thermal_resistance_from_equilibrium_matches_known_case() {
    let r = thermal_resistance(245.0, 100.0, 25.0).unwrap();
    assert!((r - 2.2).abs() < 1e-9);
}

#[test]
fn partition_discards_configured_leading_samples_per_segment() {
    use hotplate_core::sample::SampleBuilder;
    let samples: Vec<_> = (0..8)
        .map(|i| {
            SampleBuilder::new(i as f64 * 1.5, 1.5, 25.0, "rising-10")
                .with_resistance_and_power(5.0 + i as f64 * 0.1, 10.0)
                .with_temperature(Some(30.0 + i as f64))
                .build()
        })
        .collect();
    let segments = partition_by_stage(&samples, Some(4));
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].samples.len(), 4);
    let (_, t_eq, _) = equilibrium(&segments[0], 4).unwrap();
    assert!(t_eq > 33.0);
}
