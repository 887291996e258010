use std::collections::HashMap;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::network::{ConvSpec, LayerSpec, QuantizedNetwork, Topology, Variant, INPUT_SIDE};
use crate::samples::{Sample, Samples};
use crate::Network;


/// Builds a float model whose parameters are multiples of 1/16 spanning
/// exactly [-1, 1], so rescaling is the identity and quantizing at weight
/// scale 16 is exact.
pub(crate) fn dyadic_network(variant: Variant, seed: u64) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    build_network(variant.topology(), |len| {
        let mut values: Vec<f64> = (0..len)
            .map(|_| rng.gen_range(-16..=16) as f64 / 16.0)
            .collect();
        values[0] = -1.0;
        values[len - 1] = 1.0;
        values
    })
}

/// Continuous parameters spanning exactly [-1, 1]: rescaling keeps the float
/// model, quantizing only rounds it.
pub(crate) fn unit_range_network(variant: Variant, seed: u64) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    build_network(variant.topology(), |len| {
        let mut values: Vec<f64> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
        values[0] = -1.0;
        values[len - 1] = 1.0;
        values
    })
}

pub(crate) fn random_network(variant: Variant, seed: u64) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    build_network(variant.topology(), |len| {
        (0..len).map(|_| rng.gen_range(-0.5..0.5)).collect()
    })
}

fn build_network<F>(topology: Topology, mut values: F) -> Network
where
    F: FnMut(usize) -> Vec<f64>,
{
    let mut tensors = HashMap::new();
    for layer in topology.layers() {
        let Some((weight_shape, bias_shape)) = layer.param_shapes() else {
            continue;
        };
        for (suffix, shape) in [("weight", weight_shape), ("bias", bias_shape)] {
            let len = shape.iter().product();
            let tensor = Tensor::from_vec(values(len), shape, &Device::Cpu).unwrap();
            tensors.insert(format!("{}.{}", layer.label(), suffix), tensor);
        }
    }
    Network::from_tensors(tensors, topology, &Device::Cpu).unwrap()
}

/// Digits made only of black and white pixels with random labels.
pub(crate) fn binary_samples(count: usize, seed: u64) -> Samples {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..count)
        .map(|_| {
            let pixels = (0..INPUT_SIDE * INPUT_SIDE)
                .map(|_| if rng.gen_bool(0.3) { 255 } else { 0 })
                .collect();
            Sample::mnist(pixels, rng.gen_range(0..10)).unwrap()
        })
        .collect();
    Samples::from_vec(samples)
}

pub(crate) fn random_samples(count: usize, seed: u64) -> Samples {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..count)
        .map(|_| {
            let pixels = (0..INPUT_SIDE * INPUT_SIDE).map(|_| rng.gen()).collect();
            Sample::mnist(pixels, rng.gen_range(0..10)).unwrap()
        })
        .collect();
    Samples::from_vec(samples)
}

/// 2x2 input -> conv 2x2 (all ones) -> flatten -> square -> linear (x2 + 1).
/// An all-ones input yields stage maxima 4, 4, 16, 33.
pub(crate) fn tiny_network() -> QuantizedNetwork {
    let conv = ConvSpec {
        in_channels: 1,
        out_channels: 1,
        kernel: 2,
        stride: 1,
        padding: 0,
    };
    let topology = Topology::new(
        [1, 2, 2],
        vec![
            LayerSpec::conv2d("conv1", conv),
            LayerSpec::Flatten,
            LayerSpec::Square,
            LayerSpec::linear("lin1", 1, 1),
        ],
    )
    .unwrap();

    QuantizedNetwork::from_parameters(topology, 1, 1, |name| {
        Ok(match name {
            "conv1.weight" => vec![1, 1, 1, 1],
            "conv1.bias" => vec![0],
            "lin1.weight" => vec![2],
            "lin1.bias" => vec![1],
            _ => unreachable!(),
        })
    })
    .unwrap()
}
