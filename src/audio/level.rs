//! Frame energy measurement.

/// Root-mean-square energy of a frame of samples.
///
/// Uses the population mean (divides by `N`). An empty frame has zero energy.
#[must_use]
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt()
}
