//! Stability and signal quality scores shown next to live readings

/// Population standard deviation and mean of `values`
fn mean_stdev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    Some((mean, var.max(0.0).sqrt()))
}

/// Coefficient of variation mapped to 0..=100:
/// `max(0, min(100, (1 - 10 * CV) * 100))`.
///
/// Needs at least two points. A zero mean scores 100 when the signal is
/// flat and 0 otherwise.
pub fn stability_score(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let (mean, stdev) = mean_stdev(values)?;
    if mean == 0.0 {
        return Some(if stdev == 0.0 { 100.0 } else { 0.0 });
    }
    let cv = stdev / mean.abs();
    Some(((1.0 - 10.0 * cv) * 100.0).clamp(0.0, 100.0))
}

/// `min(100, max(50, 100 - 1000 * stdev))`
pub fn signal_quality(stdev: f64) -> f64 {
    (100.0 - 1000.0 * stdev).clamp(50.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_signal_is_fully_stable() {
        assert_eq!(stability_score(&[5.0; 10]), Some(100.0));
        assert_eq!(stability_score(&[0.0; 10]), Some(100.0));
    }

    #[test]
    fn test_stability_needs_two_points() {
        assert_eq!(stability_score(&[]), None);
        assert_eq!(stability_score(&[1.0]), None);
    }

    #[test]
    fn test_noisy_signal_scores_zero() {
        assert_eq!(stability_score(&[1.0, 10.0, 1.0, 10.0]), Some(0.0));
        assert_eq!(stability_score(&[-1.0, 1.0]), Some(0.0));
    }

    #[test]
    fn test_stability_midrange() {
        // mean 10, stdev 0.5 -> CV 0.05 -> 50%
        let score = stability_score(&[9.5, 10.5]).unwrap();
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_signal_quality_bounds() {
        assert_eq!(signal_quality(0.0), 100.0);
        assert_eq!(signal_quality(0.01), 90.0);
        assert_eq!(signal_quality(1.0), 50.0);
    }
}
