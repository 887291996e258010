/// Integer width of every quantized value and intermediate.
pub type Int = i64;

/// Dense row-major integer tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntTensor {
    shape: Vec<usize>,
    data: Vec<Int>,
}

impl IntTensor {
    /// Returns `None` if the number of elements does not match the shape.
    pub fn new(shape: Vec<usize>, data: Vec<Int>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0; len],
        }
    }

    pub fn from_vec(data: Vec<Int>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[Int] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Int] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<Int> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reshape(self, shape: Vec<usize>) -> Option<Self> {
        Self::new(shape, self.data)
    }

    pub fn flatten(self) -> Self {
        Self::from_vec(self.data)
    }

    /// Largest absolute value, 0 for an empty tensor.
    pub fn max_abs(&self) -> u64 {
        max_abs(&self.data)
    }

    pub fn argmax(&self) -> Option<usize> {
        argmax(&self.data)
    }
}

#[inline]
pub fn max_abs(values: &[Int]) -> u64 {
    values.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0)
}

/// Index of the first maximum. Incomparable values (NaN) never win.
pub fn argmax<T: PartialOrd + Copy>(values: &[T]) -> Option<usize> {
    let mut best: Option<(usize, T)> = None;
    for (i, &v) in values.iter().enumerate() {
        let better = match best {
            Some((_, b)) => v > b,
            None => v.partial_cmp(&v).is_some(),
        };
        if better {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}
