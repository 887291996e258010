use std::fmt;

use utils::{tensor::max_abs, IntTensor};

use crate::bound::{Bound, Enforcement};
use crate::config::Int;
use crate::error::{Error, Result};

use super::arith::square_in_place;
use super::quantize::{QuantizedLayer, QuantizedNetwork};

/// Position of a layer in the forward pass, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub index: usize,
    pub layer: String,
}

impl Stage {
    pub fn new(index: usize, layer: &str) -> Self {
        Self {
            index,
            layer: layer.to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.index, self.layer)
    }
}

/// Running state of one forward pass: the peak absolute magnitude seen so
/// far, the enforcement mode and the per-stage maxima.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvalContext {
    peak: u64,
    enforcement: Enforcement,
    trace: Vec<(Stage, u64)>,
}

impl EvalContext {
    pub fn new(enforcement: Enforcement) -> Self {
        Self {
            peak: 0,
            enforcement,
            trace: Vec::new(),
        }
    }

    /// Records magnitudes without ever failing.
    pub fn probing() -> Self {
        Self::new(Enforcement::Disabled)
    }

    /// Fails as soon as the peak reaches `bound`.
    pub fn enforcing(bound: Bound) -> Self {
        Self::new(Enforcement::Enforced(bound))
    }

    /// Starts from a peak carried over from earlier passes.
    pub fn with_peak(mut self, peak: u64) -> Self {
        self.peak = peak;
        self
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    /// Largest magnitude of each stage's output, in evaluation order.
    pub fn trace(&self) -> &[(Stage, u64)] {
        &self.trace
    }

    fn observe(&mut self, stage: Stage, values: &[Int]) -> Result<()> {
        let magnitude = max_abs(values);
        self.peak = self.peak.max(magnitude);
        self.enforcement.check(&stage, self.peak)?;
        self.trace.push((stage, magnitude));
        Ok(())
    }
}

/// Output of a forward pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub scores: IntTensor,
    pub context: EvalContext,
}

impl Evaluation {
    /// Index of the highest score, ties resolved to the lowest index.
    pub fn predicted(&self) -> Option<usize> {
        self.scores.argmax()
    }

    pub fn peak_magnitude(&self) -> u64 {
        self.context.peak()
    }
}

impl QuantizedNetwork {
    /// Runs `input` (shape `[channels, height, width]`) through every layer
    /// using integer arithmetic only.
    pub fn forward(&self, input: &IntTensor, mut context: EvalContext) -> Result<Evaluation> {
        let expected = self.topology.input_shape();
        if input.shape() != expected.as_slice() {
            return Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                actual: input.shape().to_vec(),
            });
        }

        let mut shape = input.shape().to_vec();
        let mut x = input.data().to_vec();

        for (i, layer) in self.layers.iter().enumerate() {
            match layer {
                QuantizedLayer::Conv2d(conv) => {
                    let spec = conv.spec();
                    let (height, width) = (shape[1], shape[2]);
                    let (out_height, out_width) = spec.output_size(height, width).ok_or_else(|| {
                        Error::ShapeMismatch {
                            expected: vec![spec.in_channels, spec.kernel, spec.kernel],
                            actual: shape.clone(),
                        }
                    })?;

                    let mut output = vec![0; spec.out_channels * out_height * out_width];
                    conv.forward(&x, height, width, &mut output);
                    x = output;
                    shape = vec![spec.out_channels, out_height, out_width];
                }
                QuantizedLayer::Flatten => shape = vec![x.len()],
                QuantizedLayer::Square => square_in_place(&mut x),
                QuantizedLayer::Linear(linear) => {
                    let mut output = vec![0; linear.output_size()];
                    linear.forward(&x, &mut output);
                    x = output;
                    shape = vec![linear.output_size()];
                }
            }

            context.observe(Stage::new(i + 1, layer.label()), &x)?;
        }

        let len = x.len();
        let scores = IntTensor::new(shape, x).ok_or_else(|| Error::ShapeMismatch {
            expected: self.topology.output_shape().unwrap_or_default(),
            actual: vec![len],
        })?;

        Ok(Evaluation { scores, context })
    }
}
