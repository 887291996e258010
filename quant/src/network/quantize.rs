use candle_core::{DType, Tensor};

use crate::config::Int;
use crate::error::{Error, Result};

use super::conv::ConvLayer;
use super::linear::LinearLayer;
use super::model::{FloatLayer, Network};
use super::rescale::rescale;
use super::topology::{LayerSpec, Topology};

/// Cumulative multiplicative scale of the signal: seeded by the image scale,
/// multiplied by the weight scale after each parametrized layer, squared
/// after each square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScaleState(u128);

impl ScaleState {
    pub fn new(img_scale: u64) -> Self {
        Self(img_scale as u128)
    }

    pub fn value(self) -> u128 {
        self.0
    }

    pub fn after_layer(self, weight_scale: u64) -> Option<Self> {
        self.0.checked_mul(weight_scale as u128).map(Self)
    }

    pub fn after_square(self) -> Option<Self> {
        self.0.checked_mul(self.0).map(Self)
    }

    /// Scale after the given layer, `None` if it no longer fits.
    pub fn after(self, layer: &LayerSpec, weight_scale: u64) -> Option<Self> {
        match layer {
            LayerSpec::Conv2d { .. } | LayerSpec::Linear { .. } => self.after_layer(weight_scale),
            LayerSpec::Square => self.after_square(),
            LayerSpec::Flatten => Some(self),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantizedLayer {
    Conv2d(ConvLayer),
    Flatten,
    Square,
    Linear(LinearLayer),
}

impl QuantizedLayer {
    pub fn label(&self) -> &str {
        match self {
            QuantizedLayer::Conv2d(conv) => conv.name(),
            QuantizedLayer::Flatten => "flatten",
            QuantizedLayer::Square => "square",
            QuantizedLayer::Linear(linear) => linear.name(),
        }
    }
}

/// Integer-only model derived from a float `Network` at a fixed
/// (image scale, weight scale) pair. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedNetwork {
    pub(crate) topology: Topology,
    pub(crate) layers: Vec<QuantizedLayer>,
    img_scale: u64,
    weight_scale: u64,
    output_scale: ScaleState,
}

impl QuantizedNetwork {
    /// Quantizes every parameter of `network`:
    /// `weight = round(rescale(w) * weight_scale)`,
    /// `bias = round(rescale(b) * weight_scale * scale_before_layer)`.
    /// The float model is left untouched.
    pub fn quantize(network: &Network, img_scale: u64, weight_scale: u64) -> Result<Self> {
        check_scales(img_scale, weight_scale)?;

        let mut scale = ScaleState::new(img_scale);
        let mut layers = Vec::with_capacity(network.layers.len());

        for (layer, spec) in network.layers.iter().zip(network.topology().layers()) {
            let quantized = match layer {
                FloatLayer::Conv2d { name, conv } => {
                    let LayerSpec::Conv2d { spec: conv_spec, .. } = spec else {
                        unreachable!("float layers are built from the topology");
                    };
                    let (weights, biases) =
                        quantize_params(name, conv.weight(), conv.bias(), weight_scale, scale)?;
                    QuantizedLayer::Conv2d(ConvLayer::new(name, *conv_spec, weights, biases)?)
                }
                FloatLayer::Linear { name, linear } => {
                    let (weights, biases) = quantize_params(
                        name,
                        linear.weight(),
                        linear.bias(),
                        weight_scale,
                        scale,
                    )?;
                    let (output_size, input_size) = linear.weight().dims2()?;
                    QuantizedLayer::Linear(LinearLayer::new(
                        name,
                        input_size,
                        output_size,
                        weights,
                        biases,
                    )?)
                }
                FloatLayer::Flatten => QuantizedLayer::Flatten,
                FloatLayer::Square => QuantizedLayer::Square,
            };

            scale = scale
                .after(spec, weight_scale)
                .ok_or_else(|| Error::ScaleOverflow {
                    layer: spec.label().to_string(),
                })?;

            log::debug!(
                "Quantized {} (scale after layer: {})",
                quantized.label(),
                scale.value()
            );
            layers.push(quantized);
        }

        Ok(Self {
            topology: network.topology().clone(),
            layers,
            img_scale,
            weight_scale,
            output_scale: scale,
        })
    }

    /// Rebuilds a quantized network from already-integer parameters, looked
    /// up by name (`conv1.weight`, `conv1.bias`, ...).
    pub fn from_parameters<F>(
        topology: Topology,
        img_scale: u64,
        weight_scale: u64,
        mut lookup: F,
    ) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Vec<Int>>,
    {
        check_scales(img_scale, weight_scale)?;

        let mut scale = ScaleState::new(img_scale);
        let mut layers = Vec::with_capacity(topology.layers().len());

        for spec in topology.layers() {
            layers.push(match spec {
                LayerSpec::Conv2d { name, spec } => ConvLayer::new(
                    name,
                    *spec,
                    lookup(&format!("{}.weight", name))?,
                    lookup(&format!("{}.bias", name))?,
                )
                .map(QuantizedLayer::Conv2d)?,
                LayerSpec::Linear {
                    name,
                    in_features,
                    out_features,
                } => LinearLayer::new(
                    name,
                    *in_features,
                    *out_features,
                    lookup(&format!("{}.weight", name))?,
                    lookup(&format!("{}.bias", name))?,
                )
                .map(QuantizedLayer::Linear)?,
                LayerSpec::Flatten => QuantizedLayer::Flatten,
                LayerSpec::Square => QuantizedLayer::Square,
            });

            scale = scale
                .after(spec, weight_scale)
                .ok_or_else(|| Error::ScaleOverflow {
                    layer: spec.label().to_string(),
                })?;
        }

        Ok(Self {
            topology,
            layers,
            img_scale,
            weight_scale,
            output_scale: scale,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn layers(&self) -> &[QuantizedLayer] {
        &self.layers
    }

    pub fn img_scale(&self) -> u64 {
        self.img_scale
    }

    pub fn weight_scale(&self) -> u64 {
        self.weight_scale
    }

    /// Scale of the output scores relative to the float model's outputs.
    pub fn output_scale(&self) -> ScaleState {
        self.output_scale
    }

    /// Parameters in declaration order, named like the float model's.
    pub fn named_parameters(&self) -> Vec<(String, &[Int])> {
        let mut params = Vec::new();
        for layer in &self.layers {
            let (name, weights, biases) = match layer {
                QuantizedLayer::Conv2d(conv) => (conv.name(), conv.weights(), conv.biases()),
                QuantizedLayer::Linear(linear) => {
                    (linear.name(), linear.weights(), linear.biases())
                }
                QuantizedLayer::Flatten | QuantizedLayer::Square => continue,
            };
            params.push((format!("{}.weight", name), weights));
            params.push((format!("{}.bias", name), biases));
        }
        params
    }

    /// Integer scores divided back by the output scale.
    pub fn dequantize(&self, scores: &[Int]) -> Vec<f64> {
        let scale = self.output_scale.value() as f64;
        scores.iter().map(|&s| s as f64 / scale).collect()
    }
}

fn check_scales(img_scale: u64, weight_scale: u64) -> Result<()> {
    if img_scale == 0 || weight_scale == 0 {
        return Err(Error::InvalidScale {
            img_scale,
            weight_scale,
        });
    }
    Ok(())
}

fn quantize_params(
    name: &str,
    weight: &Tensor,
    bias: Option<&Tensor>,
    weight_scale: u64,
    scale: ScaleState,
) -> Result<(Vec<Int>, Vec<Int>)> {
    let weight_name = format!("{}.weight", name);
    let bias_name = format!("{}.bias", name);
    let bias = bias.ok_or_else(|| Error::MissingParameter {
        name: bias_name.clone(),
    })?;

    let weight_factor = weight_scale as f64;
    let bias_factor = weight_factor * scale.value() as f64;

    let weights = quantize_tensor(&weight_name, weight, weight_factor)?;
    let biases = quantize_tensor(&bias_name, bias, bias_factor)?;

    Ok((weights, biases))
}

/// `round(rescale(t) * factor)` elementwise, row-major.
pub fn quantize_tensor(name: &str, tensor: &Tensor, factor: f64) -> Result<Vec<Int>> {
    let values = tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
    quantize_values(name, &values, factor)
}

pub fn quantize_values(name: &str, values: &[f64], factor: f64) -> Result<Vec<Int>> {
    rescale(values)
        .map_err(|e| e.in_parameter(name))?
        .into_iter()
        .map(|r| {
            to_int(r * factor).ok_or_else(|| Error::ScaleOverflow {
                layer: name.to_string(),
            })
        })
        .collect()
}

// Rounds half away from zero; `None` outside the integer width
fn to_int(value: f64) -> Option<Int> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63

    let rounded = value.round();
    (rounded.is_finite() && rounded < LIMIT && rounded >= -LIMIT).then_some(rounded as Int)
}
