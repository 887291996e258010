//! Centered residues: the plaintext encoding a modular arithmetic backend
//! consumes. A signed value `v` in `[-floor((t-1)/2), floor(t/2)]` maps to
//! `v mod t`; for an even modulus `t/2` is positive only.

use crate::config::Int;
use crate::error::{Error, Result};

pub fn encode(values: &[Int], modulus: u64) -> Result<Vec<u64>> {
    let half = modulus / 2;
    let neg_half = modulus.saturating_sub(1) / 2;

    values
        .iter()
        .map(|&value| {
            let limit = if value < 0 { neg_half } else { half };
            if value.unsigned_abs() > limit {
                return Err(Error::Encoding { value, modulus });
            }
            Ok(if value < 0 {
                modulus - value.unsigned_abs()
            } else {
                value as u64
            })
        })
        .collect()
}

/// Inverse of `encode`: residues above `t/2` are read as negative.
pub fn decode(residues: &[u64], modulus: u64) -> Vec<Int> {
    let half = modulus / 2;

    residues
        .iter()
        .map(|&r| {
            let r = r % modulus.max(1);
            if r > half {
                (r as i128 - modulus as i128) as Int
            } else {
                r as Int
            }
        })
        .collect()
}
