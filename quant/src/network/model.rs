use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, VarBuilder, VarMap};
use utils::{argmax, values::load_values};

use crate::error::{Error, Result};
use crate::samples::{Sample, Samples};

use super::topology::{LayerSpec, Topology};

/// Number of images per batch when running the float reference model.
const BATCH_SIZE: usize = 256;

pub(crate) enum FloatLayer {
    Conv2d { name: String, conv: Conv2d },
    Flatten,
    Square,
    Linear { name: String, linear: Linear },
}

/// Candle-compatible float model (used as quantizer input and accuracy reference).
/// Produced by an external trainer and treated as read-only.
pub struct Network {
    topology: Topology,
    pub(crate) layers: Vec<FloatLayer>,
}

impl Network {
    pub fn new(vs: &VarBuilder, topology: Topology) -> Result<Self> {
        let mut layers = Vec::with_capacity(topology.layers().len());

        for layer in topology.layers() {
            layers.push(match layer {
                LayerSpec::Conv2d { name, spec } => {
                    let config = Conv2dConfig {
                        padding: spec.padding,
                        stride: spec.stride,
                        ..Default::default()
                    };
                    FloatLayer::Conv2d {
                        name: name.clone(),
                        conv: conv2d(
                            spec.in_channels,
                            spec.out_channels,
                            spec.kernel,
                            config,
                            vs.pp(name),
                        )?,
                    }
                }
                LayerSpec::Flatten => FloatLayer::Flatten,
                LayerSpec::Square => FloatLayer::Square,
                LayerSpec::Linear {
                    name,
                    in_features,
                    out_features,
                } => FloatLayer::Linear {
                    name: name.clone(),
                    linear: linear(*in_features, *out_features, vs.pp(name))?,
                },
            });
        }

        Ok(Self { topology, layers })
    }

    /// Loads trained weights from a safetensors file written by `VarMap::save`.
    pub fn load_safetensors(path: &Path, topology: Topology, device: &Device) -> Result<Self> {
        let mut varmap = VarMap::new();
        let network = {
            let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
            Self::new(&vs, topology)?
        };
        varmap.load(path)?;
        Ok(network)
    }

    /// Loads trained weights from a directory holding one `<param>.csv` file
    /// per parameter, each a single line of comma-separated reals.
    pub fn load_csv(dir: &Path, topology: Topology, device: &Device) -> Result<Self> {
        let mut tensors = HashMap::new();

        for layer in topology.layers() {
            let Some((weight_shape, bias_shape)) = layer.param_shapes() else {
                continue;
            };
            for (suffix, shape) in [("weight", weight_shape), ("bias", bias_shape)] {
                let name = format!("{}.{}", layer.label(), suffix);
                let path = dir.join(format!("{}.csv", name));
                let values: Vec<f64> = load_values(&path).map_err(|e| Error::Parse {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

                let expected: usize = shape.iter().product();
                if values.len() != expected {
                    return Err(Error::ParamLength {
                        name,
                        expected,
                        actual: values.len(),
                    });
                }

                tensors.insert(name, Tensor::from_vec(values, shape, device)?);
            }
        }

        Self::from_tensors(tensors, topology, device)
    }

    /// Builds the model from named tensors (`conv1.weight`, `conv1.bias`, ...).
    pub fn from_tensors(
        tensors: HashMap<String, Tensor>,
        topology: Topology,
        device: &Device,
    ) -> Result<Self> {
        for name in topology.param_names() {
            if !tensors.contains_key(&name) {
                return Err(Error::MissingParameter { name });
            }
        }
        let vs = VarBuilder::from_tensors(tensors, DType::F64, device);
        Self::new(&vs, topology)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn dtype(&self) -> DType {
        self.layers
            .iter()
            .find_map(|layer| match layer {
                FloatLayer::Conv2d { conv, .. } => Some(conv.weight().dtype()),
                FloatLayer::Linear { linear, .. } => Some(linear.weight().dtype()),
                _ => None,
            })
            .unwrap_or(DType::F32)
    }

    /// Predicted class for each image, evaluated in batches.
    pub fn predict(&self, samples: &[Sample], device: &Device) -> Result<Vec<usize>> {
        let mut predictions = Vec::with_capacity(samples.len());

        for batch in samples.chunks(BATCH_SIZE) {
            let x = Samples::batch_tensor(batch, device)?.to_dtype(self.dtype())?;
            let scores = self.forward(&x)?.to_dtype(DType::F64)?.to_vec2::<f64>()?;
            predictions.extend(scores.iter().map(|row| argmax(row).unwrap_or(0)));
        }

        Ok(predictions)
    }

    /// Fraction of samples the float model classifies correctly.
    pub fn accuracy(&self, samples: &Samples, device: &Device) -> Result<f64> {
        if samples.is_empty() {
            return Err(Error::EmptyDataset);
        }
        let predictions = self.predict(samples.as_slice(), device)?;
        let correct = predictions
            .iter()
            .zip(samples.iter())
            .filter(|(p, s)| **p == s.label as usize)
            .count();
        Ok(correct as f64 / samples.len() as f64)
    }
}

impl Module for Network {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = x.clone();
        for layer in &self.layers {
            x = match layer {
                FloatLayer::Conv2d { conv, .. } => x.apply(conv)?,
                FloatLayer::Flatten => x.flatten_from(1)?,
                FloatLayer::Square => x.sqr()?,
                FloatLayer::Linear { linear, .. } => x.apply(linear)?,
            };
        }
        Ok(x)
    }
}
