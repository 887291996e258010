use crate::config::Int;
use crate::error::{Error, Result};

use super::arith::dot_product_from;

// Integer linear layer, weights row-major [out][in]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearLayer {
    name: String,
    weights: Box<[Int]>,
    biases: Box<[Int]>,
    input_size: usize,
    output_size: usize,
}

impl LinearLayer {
    pub fn new(
        name: &str,
        input_size: usize,
        output_size: usize,
        weights: Vec<Int>,
        biases: Vec<Int>,
    ) -> Result<Self> {
        check_len(&format!("{}.weight", name), input_size * output_size, &weights)?;
        check_len(&format!("{}.bias", name), output_size, &biases)?;

        Ok(Self {
            name: name.to_string(),
            weights: weights.into_boxed_slice(),
            biases: biases.into_boxed_slice(),
            input_size,
            output_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weights(&self) -> &[Int] {
        &self.weights
    }

    pub fn biases(&self) -> &[Int] {
        &self.biases
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn forward(&self, input: &[Int], output: &mut [Int]) {
        for (i, val) in output.iter_mut().enumerate().take(self.output_size) {
            let offset = i * self.input_size;
            let weights_row = &self.weights[offset..offset + self.input_size];
            *val = dot_product_from(self.biases[i], input, weights_row);
        }
    }
}

pub(crate) fn check_len(name: &str, expected: usize, values: &[Int]) -> Result<()> {
    if values.len() != expected {
        return Err(Error::ParamLength {
            name: name.to_string(),
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}
