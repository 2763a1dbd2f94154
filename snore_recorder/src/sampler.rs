//! Reduces a frequency magnitude snapshot to a single volume reading.

/// Largest value a magnitude bin can hold.
const FULL_SCALE: f64 = u8::MAX as f64;

/// Computes the volume of one magnitude snapshot.
///
/// The volume is the mean bin magnitude divided by 255, so it always lies in
/// `[0, 1]`. An empty snapshot reads as silence instead of dividing by zero.
///
/// # Example
/// ```
/// use snore_recorder::sampler::sample;
/// assert_eq!(sample(&[255, 255]), 1.0);
/// assert_eq!(sample(&[]), 0.0);
/// ```
pub fn sample(magnitudes: &[u8]) -> f64 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let sum: u64 = magnitudes.iter().map(|&m| u64::from(m)).sum();
    sum as f64 / magnitudes.len() as f64 / FULL_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_empty_snapshot_is_silent() {
        assert_eq!(sample(&[]), 0.0);
    }

    #[test]
    fn test_mean_over_full_scale() {
        let magnitudes = [0, 51, 102, 153, 204, 255];
        let expected = 765.0 / 6.0 / 255.0;
        assert!((sample(&magnitudes) - expected).abs() < 1e-12, "Expected {}, got {}", expected, sample(&magnitudes));
    }

    #[test]
    fn test_extremes_stay_in_unit_range() {
        assert_eq!(sample(&[0; 128]), 0.0);
        assert_eq!(sample(&[255; 128]), 1.0);
    }

    #[test]
    fn test_every_constant_level_is_bounded_and_exact() {
        for level in 0..=u8::MAX {
            let volume = sample(&[level; 64]);
            assert!((0.0..=1.0).contains(&volume));
            assert!((volume - f64::from(level) / 255.0).abs() < 1e-12, "Level {} gave {}", level, volume);
        }
    }
}
