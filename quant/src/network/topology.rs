use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::{
    CONV_CHANNELS, CONV_KERNEL, CONV_PADDING, HIDDEN_SIZE, INPUT_SIDE, NUM_CLASSES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl ConvSpec {
    /// Output (height, width) for an input of the given size, or `None` if
    /// the kernel does not fit the padded input.
    pub fn output_size(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let side = |n: usize| {
            let padded = n + 2 * self.padding;
            (padded >= self.kernel && self.stride > 0)
                .then(|| (padded - self.kernel) / self.stride + 1)
        };
        Some((side(height)?, side(width)?))
    }

    pub fn weight_shape(&self) -> [usize; 4] {
        [self.out_channels, self.in_channels, self.kernel, self.kernel]
    }

    pub fn weight_len(&self) -> usize {
        self.weight_shape().iter().product()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSpec {
    Conv2d {
        name: String,
        spec: ConvSpec,
    },
    Flatten,
    /// Elementwise `x * x`; squares the tracked scale.
    Square,
    Linear {
        name: String,
        in_features: usize,
        out_features: usize,
    },
}

impl LayerSpec {
    pub fn conv2d(name: &str, spec: ConvSpec) -> Self {
        LayerSpec::Conv2d {
            name: name.to_string(),
            spec,
        }
    }

    pub fn linear(name: &str, in_features: usize, out_features: usize) -> Self {
        LayerSpec::Linear {
            name: name.to_string(),
            in_features,
            out_features,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            LayerSpec::Conv2d { name, .. } | LayerSpec::Linear { name, .. } => name,
            LayerSpec::Flatten => "flatten",
            LayerSpec::Square => "square",
        }
    }

    /// Weight and bias shapes of a parametrized layer.
    pub fn param_shapes(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        match self {
            LayerSpec::Conv2d { spec, .. } => {
                Some((spec.weight_shape().to_vec(), vec![spec.out_channels]))
            }
            LayerSpec::Linear {
                in_features,
                out_features,
                ..
            } => Some((vec![*out_features, *in_features], vec![*out_features])),
            LayerSpec::Flatten | LayerSpec::Square => None,
        }
    }
}

/// Shape of the signal between two layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Map {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat(usize),
}

impl Signal {
    fn dims(self) -> Vec<usize> {
        match self {
            Signal::Map {
                channels,
                height,
                width,
            } => vec![channels, height, width],
            Signal::Flat(n) => vec![n],
        }
    }

    fn len(self) -> usize {
        self.dims().iter().product()
    }
}

/// Declarative layer list consumed by both the float and the integer model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    input_shape: [usize; 3],
    layers: Vec<LayerSpec>,
}

impl Topology {
    /// Checks that every layer accepts the shape produced by its predecessor.
    pub fn new(input_shape: [usize; 3], layers: Vec<LayerSpec>) -> Result<Self> {
        let topology = Self {
            input_shape,
            layers,
        };
        topology.output_shape()?;
        Ok(topology)
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    /// Shape of the final score tensor.
    pub fn output_shape(&self) -> Result<Vec<usize>> {
        let [channels, height, width] = self.input_shape;
        let mut signal = Signal::Map {
            channels,
            height,
            width,
        };

        for layer in &self.layers {
            signal = match (layer, signal) {
                (
                    LayerSpec::Conv2d { spec, .. },
                    Signal::Map {
                        channels,
                        height,
                        width,
                    },
                ) if channels == spec.in_channels => {
                    let (height, width) = spec.output_size(height, width).ok_or_else(|| {
                        Error::ShapeMismatch {
                            expected: vec![spec.in_channels, spec.kernel, spec.kernel],
                            actual: signal.dims(),
                        }
                    })?;
                    Signal::Map {
                        channels: spec.out_channels,
                        height,
                        width,
                    }
                }
                (LayerSpec::Conv2d { spec, .. }, _) => {
                    return Err(Error::ShapeMismatch {
                        expected: vec![spec.in_channels],
                        actual: signal.dims(),
                    })
                }
                (LayerSpec::Flatten, signal) => Signal::Flat(signal.len()),
                (LayerSpec::Square, signal) => signal,
                (
                    LayerSpec::Linear {
                        in_features,
                        out_features,
                        ..
                    },
                    Signal::Flat(n),
                ) if n == *in_features => Signal::Flat(*out_features),
                (LayerSpec::Linear { in_features, .. }, _) => {
                    return Err(Error::ShapeMismatch {
                        expected: vec![*in_features],
                        actual: signal.dims(),
                    })
                }
            };
        }

        Ok(signal.dims())
    }

    /// Parameter names in declaration order: `<layer>.weight`, `<layer>.bias`.
    pub fn param_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|layer| layer.param_shapes().is_some())
            .flat_map(|layer| {
                let name = layer.label();
                [format!("{}.weight", name), format!("{}.bias", name)]
            })
            .collect()
    }
}

/// The two built-in classifier topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// conv (stride 2) -> square -> linear 845x100 -> square -> linear 100x10
    Standard,
    /// conv (stride 4) -> square -> linear 245x10
    Small,
}

impl Variant {
    pub fn topology(self) -> Topology {
        let conv = |stride| ConvSpec {
            in_channels: 1,
            out_channels: CONV_CHANNELS,
            kernel: CONV_KERNEL,
            stride,
            padding: CONV_PADDING,
        };

        let layers = match self {
            Variant::Standard => vec![
                LayerSpec::conv2d("conv1", conv(2)),
                LayerSpec::Flatten,
                LayerSpec::Square,
                LayerSpec::linear("lin1", CONV_CHANNELS * 13 * 13, HIDDEN_SIZE),
                LayerSpec::Square,
                LayerSpec::linear("lin2", HIDDEN_SIZE, NUM_CLASSES),
            ],
            Variant::Small => vec![
                LayerSpec::conv2d("conv1", conv(4)),
                LayerSpec::Flatten,
                LayerSpec::Square,
                LayerSpec::linear("lin1", CONV_CHANNELS * 7 * 7, NUM_CLASSES),
            ],
        };

        Topology {
            input_shape: [1, INPUT_SIDE, INPUT_SIDE],
            layers,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Standard => write!(f, "standard"),
            Variant::Small => write!(f, "small"),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Variant::Standard),
            "small" => Ok(Variant::Small),
            other => Err(format!("unknown variant '{}' (standard, small)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_topologies_are_consistent() {
        assert_eq!(
            Variant::Standard.topology().output_shape().unwrap(),
            vec![NUM_CLASSES]
        );
        assert_eq!(
            Variant::Small.topology().output_shape().unwrap(),
            vec![NUM_CLASSES]
        );
    }

    #[test]
    fn test_conv_output_sizes() {
        let standard = ConvSpec {
            in_channels: 1,
            out_channels: 5,
            kernel: 5,
            stride: 2,
            padding: 1,
        };
        assert_eq!(standard.output_size(28, 28), Some((13, 13)));

        let small = ConvSpec { stride: 4, ..standard };
        assert_eq!(small.output_size(28, 28), Some((7, 7)));
        assert_eq!(small.output_size(2, 2), None);
    }

    #[test]
    fn test_param_names() {
        assert_eq!(
            Variant::Small.topology().param_names(),
            vec!["conv1.weight", "conv1.bias", "lin1.weight", "lin1.bias"]
        );
        assert_eq!(Variant::Standard.topology().param_names().len(), 6);
    }

    #[test]
    fn test_rejects_linear_on_feature_map() {
        let result = Topology::new(
            [1, 4, 4],
            vec![LayerSpec::linear("lin1", 16, 2)],
        );
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rejects_wrong_in_features() {
        let spec = ConvSpec {
            in_channels: 1,
            out_channels: 2,
            kernel: 2,
            stride: 2,
            padding: 0,
        };
        let result = Topology::new(
            [1, 4, 4],
            vec![
                LayerSpec::conv2d("conv1", spec),
                LayerSpec::Flatten,
                LayerSpec::linear("lin1", 9, 2),
            ],
        );
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("Small".parse::<Variant>().unwrap(), Variant::Small);
        assert_eq!("standard".parse::<Variant>().unwrap(), Variant::Standard);
        assert!("large".parse::<Variant>().is_err());
    }
}
