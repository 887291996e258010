use crate::error::{Error, Result};

const TOLERANCE: f64 = 1e-6;

/// Maps the value range of `values` exactly onto [-1, 1]:
/// `2 * (t - min) / (max - min) - 1`, clamped.
///
/// A constant tensor has no range to map and fails with `DegenerateRange`;
/// a range wider than `f64::MAX` fails with `UnboundedRange`.
pub fn rescale(values: &[f64]) -> Result<Vec<f64>> {
    if values.is_empty() {
        return Err(Error::EmptyTensor);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::NonFinite);
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range == 0.0 {
        return Err(Error::DegenerateRange { value: min });
    }
    if !range.is_finite() {
        return Err(Error::UnboundedRange { min, max });
    }

    let mut rescaled: Vec<f64> = values
        .iter()
        .map(|&v| (v - min) / range * 2.0 - 1.0)
        .collect();

    debug_assert!(
        (rescaled.iter().copied().fold(f64::INFINITY, f64::min) + 1.0).abs() < TOLERANCE,
        "rescaled minimum is not -1"
    );
    debug_assert!(
        (rescaled.iter().copied().fold(f64::NEG_INFINITY, f64::max) - 1.0).abs() < TOLERANCE,
        "rescaled maximum is not 1"
    );

    for v in rescaled.iter_mut() {
        *v = v.clamp(-1.0, 1.0);
    }

    Ok(rescaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_rescale_hits_both_ends() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let len = rng.gen_range(2..300);
            let spread = rng.gen_range(1e-3..1e3);
            let values: Vec<f64> = (0..len)
                .map(|_| rng.gen_range(-spread..spread))
                .collect();
            if values.iter().all(|&v| v == values[0]) {
                continue;
            }

            let rescaled = rescale(&values).unwrap();
            let min = rescaled.iter().copied().fold(f64::INFINITY, f64::min);
            let max = rescaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            assert!((min + 1.0).abs() < TOLERANCE, "min {}", min);
            assert!((max - 1.0).abs() < TOLERANCE, "max {}", max);
            assert!(rescaled.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_rescale_is_affine() {
        let rescaled = rescale(&[0.0, 1.0, 2.0, 4.0]).unwrap();
        assert_eq!(rescaled, vec![-1.0, -0.5, 0.0, 1.0]);
    }

    #[test]
    fn test_rescale_keeps_symmetric_unit_range() {
        let values = [-1.0, -0.25, 0.0, 0.5, 1.0];
        assert_eq!(rescale(&values).unwrap(), values.to_vec());
    }

    #[test]
    fn test_constant_tensor_fails() {
        match rescale(&[0.3, 0.3, 0.3]) {
            Err(Error::DegenerateRange { value }) => assert_eq!(value, 0.3),
            other => panic!("expected DegenerateRange, got {:?}", other),
        }
        assert!(matches!(
            rescale(&[5.0]),
            Err(Error::DegenerateRange { .. })
        ));
    }

    #[test]
    fn test_empty_and_non_finite_fail() {
        assert!(matches!(rescale(&[]), Err(Error::EmptyTensor)));
        assert!(matches!(
            rescale(&[0.0, f64::NAN, 1.0]),
            Err(Error::NonFinite)
        ));
        assert!(matches!(
            rescale(&[0.0, f64::INFINITY]),
            Err(Error::NonFinite)
        ));
    }

    #[test]
    fn test_overflowing_range_fails() {
        match rescale(&[-1e308, 0.0, 1e308]) {
            Err(Error::UnboundedRange { min, max }) => {
                assert_eq!(min, -1e308);
                assert_eq!(max, 1e308);
            }
            other => panic!("expected UnboundedRange, got {:?}", other),
        }

        // Half of the representable range still maps onto [-1, 1]
        let rescaled = rescale(&[-1e308, 0.0, 5e307]).unwrap();
        assert_eq!(rescaled[0], -1.0);
        assert_eq!(rescaled[2], 1.0);
        assert!(rescaled.iter().all(|v| v.is_finite()));
    }
}
