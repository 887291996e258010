use crate::bound::Bound;

/// Integer width used for parameters, inputs and every intermediate value.
/// Must exceed the largest intermediate product expected; 64 bits covers
/// the bundled topologies for any bound below 2^63. Sums are accumulated
/// exactly and saturate at the width's limits when stored, never wrapping.
pub use utils::Int;

/// Default plaintext modulus, a 32-bit NTT-friendly prime.
pub const DEFAULT_MODULUS: u64 = 4_293_918_721;

pub const DEFAULT_IMG_SCALE: u64 = 2;

pub const DEFAULT_SEED_WEIGHT_SCALE: u64 = 1;

/// Largest pixel value of an 8-bit grayscale image.
pub const PIXEL_MAX: f64 = 255.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationConfig {
    /// Fixed image scale; pixels are mapped to `trunc(pixel / 255 * img_scale)`.
    pub img_scale: u64,

    /// Weight scale the doubling starts from. Never evaluated itself.
    pub seed_weight_scale: u64,

    /// Smallest inadmissible peak magnitude.
    pub bound: Bound,

    /// Bisect between the last accepted and first rejected scale.
    pub refine: bool,

    /// Evaluate validation samples on the rayon pool.
    pub parallel: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            img_scale: DEFAULT_IMG_SCALE,
            seed_weight_scale: DEFAULT_SEED_WEIGHT_SCALE,
            bound: Bound::half_modulus(DEFAULT_MODULUS),
            refine: false,
            parallel: true,
        }
    }
}
