use crate::config::Int;
use crate::error::Result;

use super::arith::{mul_add, narrow, widen};
use super::linear::check_len;
use super::topology::ConvSpec;

/// Integer 2D convolution with zero padding.
///
/// Weights are laid out `[out][in][ky][kx]`, activations `[channel][y][x]`,
/// both row-major, matching the float model so flattening keeps the same
/// element order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvLayer {
    name: String,
    spec: ConvSpec,
    weights: Box<[Int]>,
    biases: Box<[Int]>,
}

impl ConvLayer {
    pub fn new(name: &str, spec: ConvSpec, weights: Vec<Int>, biases: Vec<Int>) -> Result<Self> {
        check_len(&format!("{}.weight", name), spec.weight_len(), &weights)?;
        check_len(&format!("{}.bias", name), spec.out_channels, &biases)?;

        Ok(Self {
            name: name.to_string(),
            spec,
            weights: weights.into_boxed_slice(),
            biases: biases.into_boxed_slice(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ConvSpec {
        &self.spec
    }

    pub fn weights(&self) -> &[Int] {
        &self.weights
    }

    pub fn biases(&self) -> &[Int] {
        &self.biases
    }

    /// `input` is `[in_channels][height][width]`; `output` must hold
    /// `out_channels * out_height * out_width` values.
    pub fn forward(&self, input: &[Int], height: usize, width: usize, output: &mut [Int]) {
        let ConvSpec {
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
        } = self.spec;
        let Some((out_height, out_width)) = self.spec.output_size(height, width) else {
            return;
        };

        for oc in 0..out_channels {
            let bias = self.biases[oc];
            for oy in 0..out_height {
                for ox in 0..out_width {
                    let mut acc = widen(bias);

                    for ic in 0..in_channels {
                        let plane = &input[ic * height * width..(ic + 1) * height * width];
                        let filter = &self.weights[(oc * in_channels + ic) * kernel * kernel..]
                            [..kernel * kernel];

                        for ky in 0..kernel {
                            // Rows falling into the padding contribute zero
                            let Some(iy) = (oy * stride + ky).checked_sub(padding) else {
                                continue;
                            };
                            if iy >= height {
                                continue;
                            }
                            for kx in 0..kernel {
                                let Some(ix) = (ox * stride + kx).checked_sub(padding) else {
                                    continue;
                                };
                                if ix >= width {
                                    continue;
                                }
                                acc = mul_add(
                                    acc,
                                    plane[iy * width + ix],
                                    filter[ky * kernel + kx],
                                );
                            }
                        }
                    }

                    output[(oc * out_height + oy) * out_width + ox] = narrow(acc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kernel: usize, stride: usize, padding: usize) -> ConvSpec {
        ConvSpec {
            in_channels: 1,
            out_channels: 1,
            kernel,
            stride,
            padding,
        }
    }

    #[test]
    fn test_valid_convolution() {
        // 3x3 input, 2x2 all-ones kernel, stride 1, no padding
        let conv = ConvLayer::new("conv1", spec(2, 1, 0), vec![1; 4], vec![100]).unwrap();
        let input = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut output = [0; 4];
        conv.forward(&input, 3, 3, &mut output);
        assert_eq!(output, [112, 116, 124, 128]);
    }

    #[test]
    fn test_padding_is_zero() {
        // 2x2 input, 3x3 kernel picking the centre, padding 1 -> identity
        let mut weights = vec![0; 9];
        weights[4] = 1;
        let conv = ConvLayer::new("conv1", spec(3, 1, 1), weights, vec![0]).unwrap();
        let input = [1, -2, 3, -4];
        let mut output = [0; 4];
        conv.forward(&input, 2, 2, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_accumulation_is_exact_past_int_range() {
        // Four 1x1 channels: the running sum peaks at 3 * 2^62 and ends at 2^62
        let big = 1 << 62;
        let spec = ConvSpec {
            in_channels: 4,
            out_channels: 1,
            kernel: 1,
            stride: 1,
            padding: 0,
        };
        let conv = ConvLayer::new("conv1", spec, vec![1, 1, 1, -2], vec![0]).unwrap();
        let mut output = [0; 1];
        conv.forward(&[big, big, big, big], 1, 1, &mut output);
        assert_eq!(output, [big]);

        // A sum that really leaves the range saturates
        let conv = ConvLayer::new("conv1", spec, vec![1, 1, 1, 1], vec![0]).unwrap();
        conv.forward(&[big, big, big, big], 1, 1, &mut output);
        assert_eq!(output, [Int::MAX]);
    }

    #[test]
    fn test_stride_and_channels() {
        let spec = ConvSpec {
            in_channels: 2,
            out_channels: 2,
            kernel: 1,
            stride: 2,
            padding: 0,
        };
        // out0 = in0 + in1, out1 = in0 - in1
        let conv = ConvLayer::new("conv1", spec, vec![1, 1, 1, -1], vec![0, 1]).unwrap();
        let input = [
            1, 2, 3, 4, // channel 0, 2x2
            10, 20, 30, 40, // channel 1, 2x2
        ];
        let mut output = [0; 2];
        conv.forward(&input, 2, 2, &mut output);
        assert_eq!(output, [11, 1 - 9]);
    }
}
