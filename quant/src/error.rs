use std::path::PathBuf;

use thiserror::Error;

use crate::bound::Bound;
use crate::config::Int;
use crate::network::Stage;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Rescaling a constant tensor would divide by zero.
    #[error("cannot rescale a constant tensor (every element is {value})")]
    DegenerateRange { value: f64 },

    #[error("cannot rescale an empty tensor")]
    EmptyTensor,

    #[error("tensor contains a non-finite value")]
    NonFinite,

    #[error("value range [{min}, {max}] is wider than f64 can represent")]
    UnboundedRange { min: f64, max: f64 },

    #[error("parameter `{name}`: {source}")]
    Parameter {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("parameter `{name}` is missing")]
    MissingParameter { name: String },

    /// The running peak magnitude reached the bound with enforcement active.
    /// The scale pair is unsafe for the target modulus.
    #[error("magnitude {magnitude} reached bound {bound} at {stage}")]
    Overflow {
        stage: Stage,
        magnitude: u64,
        bound: Bound,
    },

    #[error("no weight scale above {seed} stays within bound at image scale {img_scale}")]
    CalibrationExhausted { img_scale: u64, seed: u64 },

    #[error("scale overflow while quantizing `{layer}`")]
    ScaleOverflow { layer: String },

    #[error("scales must be at least 1 (image scale {img_scale}, weight scale {weight_scale})")]
    InvalidScale { img_scale: u64, weight_scale: u64 },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("parameter `{name}` has {actual} values, expected {expected}")]
    ParamLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("validation set is empty")]
    EmptyDataset,

    #[error("failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("value {value} does not fit modulus {modulus}")]
    Encoding { value: Int, modulus: u64 },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn in_parameter(self, name: impl Into<String>) -> Self {
        Error::Parameter {
            name: name.into(),
            source: Box::new(self),
        }
    }
}
