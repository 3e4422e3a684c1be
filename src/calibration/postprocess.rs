//! Segment partitioning and curve fitting over recorded step-response
//! samples (spec section 4.6 "Postprocess"), grounded on the teacher's
//! `CalibrationManager` stage bookkeeping and `SafetyMonitor`-style
//! iterative convergence checks.

use crate::calibration::search::{biased_squared_error, minimum_search_1d, Bound};
use crate::error::CalibrationError;
use crate::predictor::{Predictor, TemperatureBand};
use crate::sample::Sample;

const DEFAULT_DISCARD_SAMPLES: usize = 4;
const HEAT_CAPACITY_TOLERANCE: f64 = 0.05;
const HEAT_CAPACITY_MAX_ITERATIONS: usize = 50;

/// A recorded step segment: a labelled run of constant-power samples.
#[derive(Debug, Clone)]
pub struct Segment {
    pub label: String,
    pub power: f64,
    pub rising: bool,
    pub samples: Vec<Sample>,
}

/// Splits a flat recording into segments by stage label, grouping
/// `rising-<P>`/`falling-<P>` runs and discarding the configured number of
/// leading samples from each (spec section 4.6).
pub fn partition_by_stage(samples: &[Sample], discard_samples: Option<usize>) -> Vec<Segment> {
    let discard = discard_samples.unwrap_or(DEFAULT_DISCARD_SAMPLES);
    let mut segments: Vec<Segment> = Vec::new();

    for sample in samples {
        match segments.last_mut() {
            Some(seg) if seg.label == sample.stage => seg.samples.push(sample.clone()),
            _ => {
                let rising = sample.stage.starts_with("rising-");
                let power = sample
                    .stage
                    .rsplit('-')
                    .next()
                    .and_then(|p| p.parse::<f64>().ok())
                    .unwrap_or(sample.power);
                segments.push(Segment {
                    label: sample.stage.clone(),
                    power,
                    rising,
                    samples: vec![sample.clone()],
                });
            }
        }
    }

    for seg in &mut segments {
        if seg.samples.len() > discard {
            seg.samples.drain(0..discard);
        } else {
            seg.samples.clear();
        }
    }
    segments.retain(|s| !s.samples.is_empty());
    segments
}

/// Range-weighted blend of the last `n` samples' resistance/temperature,
/// per spec section 4.6 "equilibrium R, T, P via range-weighted blend".
/// Later samples (closer to the end of the segment) are weighted more
/// heavily, linearly from 1 up to `n`.
pub fn equilibrium(segment: &Segment, n: usize) -> Option<(f64, f64, f64)> {
    let tail: Vec<&Sample> = segment
        .samples
        .iter()
        .rev()
        .take(n)
        .filter(|s| s.temperature.is_some() && s.resistance.is_some())
        .collect();
    if tail.is_empty() {
        return None;
    }

    let mut weight_sum = 0.0;
    let mut r_sum = 0.0;
    let mut t_sum = 0.0;
    let mut p_sum = 0.0;

    for (i, sample) in tail.iter().rev().enumerate() {
        let weight = (i + 1) as f64;
        weight_sum += weight;
        r_sum += weight * sample.resistance.unwrap();
        t_sum += weight * sample.temperature.unwrap();
        p_sum += weight * sample.power;
    }

    Some((r_sum / weight_sum, t_sum / weight_sum, p_sum / weight_sum))
}

pub fn thermal_resistance(t_eq: f64, p_eq: f64, ambient: f64) -> Option<f64> {
    if p_eq.abs() < f64::EPSILON {
        return None;
    }
    Some((t_eq - ambient) / p_eq)
}

/// Iterative first-order-step fit for heat capacity (spec section 4.6):
/// converges when successive estimates of the final temperature differ by
/// less than `HEAT_CAPACITY_TOLERANCE`, diverging after
/// `HEAT_CAPACITY_MAX_ITERATIONS`.
///
/// Model: a first-order thermal step `T(t) = T_final - (T_final - T0) *
/// exp(-t/tau)`, `tau = R_theta * C_th`. Each iteration alternates between
/// the two halves of the fit: first `tau` is log-linearized from the trace
/// against the current `T_final` guess, then `T_final` is re-estimated by
/// linear least-squares against that `tau` (the model is linear in
/// `T_final` once `tau` is fixed), and `C_th` is refined from the
/// resulting `tau`.
pub fn fit_heat_capacity(
    segment: &Segment,
    thermal_resistance: f64,
    segment_label: &str,
) -> Result<f64, CalibrationError> {
    if segment.samples.len() < 3 {
        return Err(CalibrationError::InsufficientSamples {
            segment: segment_label.to_string(),
            have: segment.samples.len(),
            need: 3,
        });
    }

    let t0 = segment.samples[0].temperature.unwrap_or(segment.samples[0].ambient);
    let mut t_final = segment
        .samples
        .last()
        .and_then(|s| s.temperature)
        .unwrap_or(t0);

    let mut previous_t_final = t_final;
    let mut heat_capacity = 50.0; // initial guess, refined below

    for _ in 0..HEAT_CAPACITY_MAX_ITERATIONS {
        let mut sum_tau_weighted = 0.0;
        let mut sum_weight = 0.0;

        for window in segment.samples.windows(2) {
            let (prev, cur) = (&window[0], &window[1]);
            let (Some(t_prev), Some(t_cur)) = (prev.temperature, cur.temperature) else {
                continue;
            };
            let denom_prev = t_final - t_prev;
            let denom_cur = t_final - t_cur;
            if denom_prev.abs() < 1e-6 || denom_cur.abs() < 1e-6 {
                continue;
            }
            let ratio = denom_cur / denom_prev;
            if ratio <= 0.0 || ratio >= 1.0 {
                continue;
            }
            let dt = cur.now - prev.now;
            if dt <= 0.0 {
                continue;
            }
            let tau = -dt / ratio.ln();
            if tau.is_finite() && tau > 0.0 {
                let weight = dt;
                sum_tau_weighted += tau * weight;
                sum_weight += weight;
            }
        }

        if sum_weight < f64::EPSILON {
            return Err(CalibrationError::Diverged {
                segment: segment_label.to_string(),
                reason: "no usable sample pairs for time-constant fit".to_string(),
            });
        }

        let tau = sum_tau_weighted / sum_weight;
        heat_capacity = tau / thermal_resistance;

        previous_t_final = t_final;

        // Re-estimate T_final by linear least-squares against the fitted
        // tau: T(t) - T0*exp(-t/tau) = T_final * (1 - exp(-t/tau)).
        let t0_time = segment.samples[0].now;
        let mut weighted_sum = 0.0;
        let mut weight_sq_sum = 0.0;
        for sample in &segment.samples {
            let Some(t) = sample.temperature else { continue };
            let dt = sample.now - t0_time;
            let decay = (-dt / tau).exp();
            let weight = 1.0 - decay;
            weighted_sum += (t - t0 * decay) * weight;
            weight_sq_sum += weight * weight;
        }
        if weight_sq_sum > f64::EPSILON {
            t_final = weighted_sum / weight_sq_sum;
        }

        if (t_final - previous_t_final).abs() < HEAT_CAPACITY_TOLERANCE {
            return Ok(heat_capacity);
        }
    }

    Err(CalibrationError::Diverged {
        segment: segment_label.to_string(),
        reason: format!(
            "heat capacity estimate did not converge after {HEAT_CAPACITY_MAX_ITERATIONS} iterations"
        ),
    })
}

/// Fits the delay time-constant by 1-D minimum search over squared error
/// between a low-pass-filtered element-T trace and a reference surface-T
/// trace (spec section 4.6). `above_threshold` selects which of the two
/// separate fits (above/below the profile threshold) this call performs.
pub fn fit_delay_time_constant(
    element_trace: &[(f64, f64)],
    reference_trace: &[(f64, f64)],
    ambient: f64,
    tau_bounds: Bound,
) -> f64 {
    let objective = |tau: f64| -> f64 {
        let mut filtered = element_trace.first().map(|(_, t)| *t).unwrap_or(ambient);
        let mut last_time = element_trace.first().map(|(t, _)| *t).unwrap_or(0.0);
        let mut error = 0.0;

        for (i, &(time, element_t)) in element_trace.iter().enumerate() {
            let dt = (time - last_time).max(1e-6);
            last_time = time;
            let alpha = dt / (dt + tau);
            filtered += alpha * (element_t - filtered);

            if let Some(&(_, reference_t)) = reference_trace.get(i) {
                error += biased_squared_error(reference_t, filtered, ambient);
            }
        }
        error
    };

    minimum_search_1d(tau_bounds, 10, 8, 1e-3, objective)
}

/// Partitions samples into the default 4 rising bands (100-250C) plus a
/// flat 25C band, per spec section 4.6, and runs the two 2-D minimum
/// searches per band to produce a tuned [`Predictor`].
pub fn tune_predictor_bands(segments: &[Segment], ambient: f64, dt: f64) -> Predictor {
    const BAND_EDGES: [f64; 5] = [25.0, 100.0, 150.0, 200.0, 250.0];

    let mut bands = Vec::new();
    for &center in &BAND_EDGES {
        let trace: Vec<(f64, f64)> = segments
            .iter()
            .flat_map(|s| s.samples.iter())
            .filter_map(|sample| sample.temperature.map(|t| (sample.now, t)))
            .filter(|(_, t)| (t - center).abs() < 50.0)
            .collect();

        if trace.len() < 4 {
            bands.push(TemperatureBand::new(center, 10.0, 15.0).with_power(8.0, 1.0));
            continue;
        }

        let reference_trace = trace.clone();
        let inner_outer_objective = |params: &[f64]| -> f64 {
            let (inner, outer) = (params[0], params[1]);
            let predictor_bands = [TemperatureBand::new(center, inner, outer)];
            let mut predictor = Predictor::from_bands(&predictor_bands);
            let mut error = 0.0;
            for &(_, t) in &trace {
                let predicted = predictor.predict_surface(t, ambient, dt);
                error += biased_squared_error(t, predicted, ambient);
            }
            error
        };

        let bounds = vec![Bound::new(1.0, 60.0), Bound::new(1.0, 60.0)];
        let inner_outer = crate::calibration::search::minimum_search(bounds, 8, 5, 1e-3, inner_outer_objective);

        let power_objective = |params: &[f64]| -> f64 {
            let (power_tau, power_gain) = (params[0], params[1]);
            let predictor_bands =
                [TemperatureBand::new(center, inner_outer[0], inner_outer[1]).with_power(power_tau, power_gain)];
            let mut predictor = Predictor::from_bands(&predictor_bands);
            let mut error = 0.0;
            let assumed_power = 50.0;
            for &(_, t) in &reference_trace {
                let predicted_element = predictor.predict_element(assumed_power, ambient, dt).unwrap_or(ambient);
                error += biased_squared_error(t, predicted_element, ambient);
            }
            error
        };
        let power_bounds = vec![Bound::new(1.0, 60.0), Bound::new(0.1, 5.0)];
        let power_params = crate::calibration::search::minimum_search(power_bounds, 8, 5, 1e-3, power_objective);

        bands.push(
            TemperatureBand::new(center, inner_outer[0], inner_outer[1])
                .with_power(power_params[0], power_params[1]),
        );
    }

    Predictor::from_bands(&bands)
}
