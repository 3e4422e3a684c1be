use hotplate_core::Profile;

#[test]
fn exact_midpoint_matches_spec_example() {
    let profile = Profile::new([(0.0, 25.0), (60.0, 150.0), (120.0, 220.0)]);
    assert_eq!(profile.target_at(90.0), 185.0);
}

#[test]
fn negative_time_clamps_to_first_control_point() {
    // Open question resolution (DESIGN.md): clamp to the first control point.
    let profile = Profile::new([(0.0, 25.0), (60.0, 150.0)]);
    assert_eq!(profile.target_at(-30.0), 25.0);
}

#[test]
fn time_past_end_holds_final_value() {
    let profile = Profile::new([(0.0, 25.0), (60.0, 150.0)]);
    assert_eq!(profile.target_at(600.0), 150.0);
}
