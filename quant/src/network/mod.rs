pub mod arith;
pub mod conv;
pub mod inference;
pub mod linear;
pub mod model;
pub mod quantize;
pub mod rescale;
pub mod topology;

pub use conv::ConvLayer;
pub use inference::{EvalContext, Evaluation, Stage};
pub use linear::LinearLayer;
pub use model::Network;
pub use quantize::{QuantizedLayer, QuantizedNetwork, ScaleState};
pub use rescale::rescale;
pub use topology::{ConvSpec, LayerSpec, Topology, Variant};

/// Side length of the square grayscale input images.
pub const INPUT_SIDE: usize = 28;

/// Number of output classes (digits).
pub const NUM_CLASSES: usize = 10;

/// Channels produced by the first convolution in both variants.
pub const CONV_CHANNELS: usize = 5;

pub const CONV_KERNEL: usize = 5;

pub const CONV_PADDING: usize = 1;

/// Width of the hidden linear layer of the standard variant.
pub const HIDDEN_SIZE: usize = 100;
