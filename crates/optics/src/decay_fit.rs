//! Fluorescence decay fitting.
//!
//! Fits `y(t) = A + B·exp(-t/τ)` without iteration:
//!
//! 1. With `S(t)` the running trapezoidal integral of `y`, the model
//!    satisfies `y(t) - y(t0) = c1·S(t) + c2·(t - t0)` with `c1 = -1/τ`.
//!    A two-term least-squares solve gives `c1`.
//! 2. With `τ` fixed, `A` and `B` are a linear least-squares solve on
//!    `{1, exp(-(t - t0)/τ)}`.
//! 3. The residual is the mean absolute deviation from the fitted curve.
//!
//! All sums accumulate in `f64`. An optional reference curve (the LED
//! excitation captured by a calibration run) can be subtracted first.

/// Smallest sample count a fit accepts.
pub const MIN_SAMPLES: usize = 3;

/// Relative distance to a reference timestamp that counts as a direct hit.
pub const TIMESTAMP_TOLERANCE: f32 = 1e-3;

/// Reasons a decay fit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FitError {
    /// Fewer than [`MIN_SAMPLES`] points.
    TooFewSamples,
    /// The normal equations have no unique solution.
    Singular,
    /// The fitted decay rate is zero or negative.
    NonPositiveRate,
}

/// Result of [`fit_exponential`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecayFit {
    /// Time constant, in the unit of the sample times.
    pub tau: f64,
    /// Decay rate `1/τ`.
    pub tau_inv: f64,
    /// Baseline `A`.
    pub offset: f64,
    /// Amplitude `B` at the first sample time.
    pub scale: f64,
    /// Mean absolute residual.
    pub residual: f64,
}

/// Uniformly sampled reference curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceCurve<'a> {
    /// Time of the first sample.
    pub t0: f32,
    /// Sample spacing.
    pub period: f32,
    /// Samples.
    pub samples: &'a [f32],
}

impl ReferenceCurve<'_> {
    /// Reference value at time `t`.
    ///
    /// Uses the nearest sample when `t` falls within the timestamp tolerance
    /// of it, interpolates linearly otherwise, and holds the edge samples
    /// outside the captured range.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )] // position is clamped to 0..len-1 before each cast
    pub fn value_at(&self, t: f32) -> f32 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0.0;
        };
        if !(self.period > 0.0) {
            return *first;
        }
        let last_index = self.samples.len().saturating_sub(1);
        let position = (t - self.t0) / self.period;
        if !(position > 0.0) {
            return *first;
        }
        if position >= last_index as f32 {
            return *last;
        }

        let nearest = libm::roundf(position);
        if libm::fabsf(position - nearest) <= TIMESTAMP_TOLERANCE {
            return self.samples.get(nearest as usize).copied().unwrap_or(*last);
        }

        let below = libm::floorf(position);
        let index = below as usize;
        let frac = position - below;
        let lo = self.samples.get(index).copied().unwrap_or(*last);
        let hi = self.samples.get(index.saturating_add(1)).copied().unwrap_or(*last);
        lo + (hi - lo) * frac
    }
}

/// Subtract `reference` from `data`, sample `i` of which was taken at
/// `t0 + i·period`.
#[allow(clippy::cast_precision_loss)] // sample indices stay far below 2^24
pub fn subtract_reference(data: &mut [f32], t0: f32, period: f32, reference: &ReferenceCurve<'_>) {
    for (i, sample) in data.iter_mut().enumerate() {
        let t = t0 + i as f32 * period;
        *sample -= reference.value_at(t);
    }
}

/// Fit samples taken at explicit `times`. Extra entries of the longer slice are ignored.
pub fn fit_exponential(times: &[f32], values: &[f32]) -> Result<DecayFit, FitError> {
    let samples = times
        .iter()
        .zip(values)
        .map(|(t, y)| (f64::from(*t), f64::from(*y)));
    fit_samples(samples)
}

/// Fit samples taken at `t0 + i·period`.
#[allow(clippy::cast_precision_loss)] // sample indices stay far below 2^52
pub fn fit_uniform(t0: f32, period: f32, values: &[f32]) -> Result<DecayFit, FitError> {
    let (t0, period) = (f64::from(t0), f64::from(period));
    let samples = values
        .iter()
        .enumerate()
        .map(move |(i, y)| (t0 + i as f64 * period, f64::from(*y)));
    fit_samples(samples)
}

fn fit_samples<I>(samples: I) -> Result<DecayFit, FitError>
where
    I: Iterator<Item = (f64, f64)> + Clone,
{
    let mut iter = samples.clone();
    let (t0, y0) = iter.next().ok_or(FitError::TooFewSamples)?;
    if samples.clone().count() < MIN_SAMPLES {
        return Err(FitError::TooFewSamples);
    }

    // Step 1: integral least squares for the rate.
    let (mut s_ss, mut s_st, mut s_tt, mut s_sy, mut s_ty) = (0.0f64, 0.0, 0.0, 0.0, 0.0);
    let (mut integral, mut prev_t, mut prev_y) = (0.0f64, t0, y0);
    for (t, y) in iter {
        integral += 0.5 * (y + prev_y) * (t - prev_t);
        let dt = t - t0;
        let dy = y - y0;
        s_ss += integral * integral;
        s_st += integral * dt;
        s_tt += dt * dt;
        s_sy += integral * dy;
        s_ty += dt * dy;
        prev_t = t;
        prev_y = y;
    }
    let det = s_ss * s_tt - s_st * s_st;
    if !is_solvable(det, s_ss * s_tt) {
        return Err(FitError::Singular);
    }
    let c1 = (s_sy * s_tt - s_ty * s_st) / det;
    let tau_inv = -c1;
    if !(tau_inv > 0.0) || !tau_inv.is_finite() {
        return Err(FitError::NonPositiveRate);
    }

    // Step 2: linear least squares for offset and scale.
    let decay = |t: f64| libm::exp(-tau_inv * (t - t0));
    let (mut n, mut s_e, mut s_ee, mut s_y, mut s_ey) = (0.0f64, 0.0, 0.0, 0.0, 0.0);
    for (t, y) in samples.clone() {
        let e = decay(t);
        n += 1.0;
        s_e += e;
        s_ee += e * e;
        s_y += y;
        s_ey += e * y;
    }
    let det = n * s_ee - s_e * s_e;
    if !is_solvable(det, n * s_ee) {
        return Err(FitError::Singular);
    }
    let offset = (s_y * s_ee - s_e * s_ey) / det;
    let scale = (n * s_ey - s_e * s_y) / det;

    // Step 3: goodness of fit.
    let residual = samples
        .map(|(t, y)| libm::fabs(y - (offset + scale * decay(t))))
        .sum::<f64>()
        / n;

    Ok(DecayFit {
        tau: 1.0 / tau_inv,
        tau_inv,
        offset,
        scale,
        residual,
    })
}

fn is_solvable(det: f64, magnitude: f64) -> bool {
    det.is_finite() && magnitude > 0.0 && libm::fabs(det) > magnitude * 1e-12
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(tau: f64, offset: f64, scale: f64, period: f64, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let t = i as f64 * period;
                (offset + scale * (-t / tau).exp()) as f32
            })
            .collect()
    }

    #[test]
    fn test_recovers_clean_decay() {
        let values = synthetic(8.0, 120.0, 4000.0, 0.25, 160);
        let fit = fit_uniform(0.0, 0.25, &values).unwrap();
        assert!((fit.tau - 8.0).abs() / 8.0 < 0.01, "tau {}", fit.tau);
        assert!((fit.offset - 120.0).abs() < 5.0, "offset {}", fit.offset);
        assert!((fit.scale - 4000.0).abs() / 4000.0 < 0.01, "scale {}", fit.scale);
        assert!(fit.residual < 2.0, "residual {}", fit.residual);
    }

    #[test]
    fn test_explicit_times_match_uniform() {
        let values = synthetic(5.0, 0.0, 100.0, 0.5, 60);
        let times: Vec<f32> = (0..60).map(|i| i as f32 * 0.5).collect();
        let a = fit_exponential(&times, &values).unwrap();
        let b = fit_uniform(0.0, 0.5, &values).unwrap();
        assert!((a.tau - b.tau).abs() < 1e-3);
    }

    #[test]
    fn test_rejects_degenerate_input() {
        assert_eq!(fit_uniform(0.0, 1.0, &[1.0, 2.0]), Err(FitError::TooFewSamples));
        assert_eq!(fit_uniform(0.0, 1.0, &[]), Err(FitError::TooFewSamples));
        assert_eq!(fit_uniform(0.0, 1.0, &[5.0; 20]), Err(FitError::Singular));
    }

    #[test]
    fn test_growing_curve_is_not_a_decay() {
        let values: Vec<f32> = (0..30).map(|i| (i as f32 * 0.1).exp()).collect();
        assert_eq!(fit_uniform(0.0, 1.0, &values), Err(FitError::NonPositiveRate));
    }

    #[test]
    fn test_reference_lookup_hits_interpolates_and_clamps() {
        let samples = [0.0f32, 10.0, 20.0, 30.0];
        let reference = ReferenceCurve { t0: 1.0, period: 2.0, samples: &samples };
        assert_eq!(reference.value_at(3.0), 10.0, "exact timestamp");
        assert!((reference.value_at(4.0) - 15.0).abs() < 1e-5, "midpoint");
        assert_eq!(reference.value_at(-5.0), 0.0, "before range");
        assert_eq!(reference.value_at(100.0), 30.0, "after range");
    }

    #[test]
    fn test_subtract_reference_in_place() {
        let samples = [1.0f32, 2.0, 3.0];
        let reference = ReferenceCurve { t0: 0.0, period: 1.0, samples: &samples };
        let mut data = [5.0f32, 5.0, 5.0, 5.0, 5.0];
        subtract_reference(&mut data, 0.0, 0.5, &reference);
        assert_eq!(data, [4.0, 3.5, 3.0, 2.5, 2.0]);
    }
}
