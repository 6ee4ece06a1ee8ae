//! Dense tensors exchanged with the model ports.
//!
//! The ports consume and produce small sets of named, row-major tensors. Only two element types
//! cross that boundary: `f32` for pixels, embeddings, hidden states and logits, and `i64` for
//! token ids and attention masks.

use std::collections::BTreeMap;

use crate::error::Florence2Error;

/// A dense row-major tensor with a dynamic shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Create a tensor from a shape and its flattened data.
    ///
    /// # Errors
    ///
    /// Returns [`Florence2Error::InvalidTensorData`] if the data length is not the product of the
    /// shape.
    pub fn from_shape_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self, Florence2Error> {
        let numel = shape.iter().product::<usize>();
        if numel != data.len() {
            return Err(Florence2Error::InvalidTensorData(data.len(), shape));
        }
        Ok(Self { shape, data })
    }

    /// The shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The total number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

}

impl<T: Clone> Tensor<T> {
    /// Create a tensor filled with a single value.
    pub fn from_shape_val(shape: Vec<usize>, value: T) -> Self {
        let numel = shape.iter().product::<usize>();
        Self {
            data: vec![value; numel],
            shape,
        }
    }

    /// Concatenate two tensors along axis 1, `self` first.
    ///
    /// Both tensors must have the same rank (at least 2) and agree on every axis except axis 1.
    pub fn concat_axis1(&self, other: &Tensor<T>) -> Result<Tensor<T>, Florence2Error> {
        if self.rank() < 2 || self.rank() != other.rank() {
            return Err(Florence2Error::ShapeMismatch {
                name: "concat".to_string(),
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }

        let mismatch = self
            .shape
            .iter()
            .zip(other.shape.iter())
            .enumerate()
            .any(|(axis, (a, b))| axis != 1 && a != b);
        if mismatch {
            return Err(Florence2Error::ShapeMismatch {
                name: "concat".to_string(),
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }

        // contiguous blocks below axis 1 are copied one outer index at a time
        let inner = self.shape[2..].iter().product::<usize>();
        let block_a = self.shape[1] * inner;
        let block_b = other.shape[1] * inner;
        let outer = self.shape[0];

        let mut data = Vec::with_capacity(self.numel() + other.numel());
        for i in 0..outer {
            data.extend_from_slice(&self.data[i * block_a..(i + 1) * block_a]);
            data.extend_from_slice(&other.data[i * block_b..(i + 1) * block_b]);
        }

        let mut shape = self.shape.clone();
        shape[1] += other.shape[1];

        Ok(Tensor { shape, data })
    }
}

/// A tensor of one of the element types accepted by the model ports.
#[derive(Debug, Clone, PartialEq)]
pub enum DynTensor {
    F32(Tensor<f32>),
    I64(Tensor<i64>),
}

impl DynTensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            DynTensor::F32(t) => t.shape(),
            DynTensor::I64(t) => t.shape(),
        }
    }

    /// The name of the element type, as used in error messages.
    pub fn dtype(&self) -> &'static str {
        match self {
            DynTensor::F32(_) => "f32",
            DynTensor::I64(_) => "i64",
        }
    }
}

impl From<Tensor<f32>> for DynTensor {
    fn from(tensor: Tensor<f32>) -> Self {
        DynTensor::F32(tensor)
    }
}

impl From<Tensor<i64>> for DynTensor {
    fn from(tensor: Tensor<i64>) -> Self {
        DynTensor::I64(tensor)
    }
}

/// Named tensors flowing in and out of a model port.
pub type TensorMap = BTreeMap<String, DynTensor>;

/// Remove a `f32` tensor from a port's output map.
pub(crate) fn take_f32(
    map: &mut TensorMap,
    port: &str,
    name: &str,
) -> Result<Tensor<f32>, Florence2Error> {
    match map.remove(name) {
        Some(DynTensor::F32(t)) => Ok(t),
        Some(other) => Err(Florence2Error::DTypeMismatch {
            name: name.to_string(),
            expected: "f32",
            actual: other.dtype(),
        }),
        None => Err(Florence2Error::MissingTensor {
            port: port.to_string(),
            name: name.to_string(),
        }),
    }
}
