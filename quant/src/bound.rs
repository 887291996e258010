use std::fmt;

use crate::error::{Error, Result};
use crate::network::Stage;

/// Largest safe absolute magnitude, tied to a downstream arithmetic modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bound(u64);

impl Bound {
    pub const fn new(magnitude: u64) -> Self {
        Self(magnitude)
    }

    /// Bound for values encoded modulo `modulus`: a magnitude is admitted
    /// iff it is strictly below `modulus / 2` (real division).
    pub const fn half_modulus(modulus: u64) -> Self {
        Self(modulus / 2 + modulus % 2)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn admits(self, magnitude: u64) -> bool {
        magnitude < self.0
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a forward pass fails as soon as the peak reaches the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Enforcement {
    #[default]
    Disabled,
    Enforced(Bound),
}

impl Enforcement {
    pub fn check(&self, stage: &Stage, magnitude: u64) -> Result<()> {
        match *self {
            Enforcement::Enforced(bound) if !bound.admits(magnitude) => Err(Error::Overflow {
                stage: stage.clone(),
                magnitude,
                bound,
            }),
            _ => Ok(()),
        }
    }

    pub fn bound(&self) -> Option<Bound> {
        match *self {
            Enforcement::Enforced(bound) => Some(bound),
            Enforcement::Disabled => None,
        }
    }
}
