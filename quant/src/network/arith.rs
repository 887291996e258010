use crate::config::Int;

// Sums are carried exactly in i128 and narrowed once per output value.
// A narrowed value saturates, and a saturated value exceeds every usable bound.

/// Wide accumulator for sums of `Int` products. `None` once the sum leaves
/// the i128 range.
pub type Wide = Option<i128>;

#[inline(always)]
pub fn widen(value: Int) -> Wide {
    Some(value as i128)
}

#[inline(always)]
pub fn mul_add(acc: Wide, x: Int, w: Int) -> Wide {
    // An i64 product always fits in i128
    acc?.checked_add(x as i128 * w as i128)
}

#[inline(always)]
pub fn narrow(acc: Wide) -> Int {
    match acc {
        Some(value) => value.clamp(Int::MIN as i128, Int::MAX as i128) as Int,
        None => Int::MAX,
    }
}

#[inline(always)]
pub fn dot_product_from(init: Int, a: &[Int], b: &[Int]) -> Int {
    narrow(
        a.iter()
            .zip(b)
            .fold(widen(init), |acc, (&x, &w)| mul_add(acc, x, w)),
    )
}

#[inline(always)]
pub fn dot_product(a: &[Int], b: &[Int]) -> Int {
    dot_product_from(0, a, b)
}

#[inline(always)]
pub fn square_in_place(values: &mut [Int]) {
    for val in values.iter_mut() {
        *val = val.saturating_mul(*val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product() {
        assert_eq!(dot_product(&[1, -2, 3], &[4, 5, -6]), 4 - 10 - 18);
        assert_eq!(dot_product(&[], &[]), 0);
        assert_eq!(dot_product_from(7, &[2], &[3]), 13);
    }

    #[test]
    fn test_square_saturates() {
        let mut values = [3, -4, Int::MAX];
        square_in_place(&mut values);
        assert_eq!(values, [9, 16, Int::MAX]);
    }

    #[test]
    fn test_dot_product_saturates() {
        assert_eq!(dot_product(&[Int::MAX, Int::MAX], &[2, 2]), Int::MAX);
        assert_eq!(dot_product(&[Int::MIN, Int::MIN], &[1, 1]), Int::MIN);
    }

    #[test]
    fn test_partial_sums_beyond_int_range_are_exact() {
        // Running sum reaches 3 * 2^62 before the last term brings it back
        let big = 1 << 62;
        assert_eq!(dot_product(&[big, big, big, -big], &[1, 1, 1, 2]), big);
        assert_eq!(dot_product_from(-big, &[big, big], &[1, 1]), big);
    }

    #[test]
    fn test_wide_overflow_saturates() {
        let terms = [Int::MIN; 4];
        assert_eq!(dot_product(&terms, &terms), Int::MAX);
        assert_eq!(narrow(None), Int::MAX);
    }
}
