use half::{bf16, f16};
use num_traits::NumCast;

use super::{DType, Element};

/// Errors raised while reading or reshaping tensor data.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// The requested element type does not match the stored dtype.
    #[error("Type mismatch: requested {requested}, stored {stored}")]
    TypeMismatch {
        /// Element type asked for
        requested: DType,
        /// Element type held by the buffer
        stored: DType,
    },

    /// The byte buffer does not hold exactly `shape` elements of `dtype`.
    #[error("Buffer of {found} bytes cannot hold a {dtype} tensor of shape {shape:?} ({expected} bytes)")]
    LengthMismatch {
        /// Declared shape
        shape: Vec<usize>,
        /// Declared dtype
        dtype: DType,
        /// Number of bytes required by shape and dtype
        expected: usize,
        /// Number of bytes present
        found: usize,
    },

    /// A value could not be represented in the target dtype.
    #[error("Value {value} is not representable as {dtype}")]
    Cast {
        /// Offending value
        value: f64,
        /// Target dtype
        dtype: DType,
    },

    /// Trailing dimensions selected for removal are not all singletons.
    #[error("Cannot squeeze {count} trailing dims of shape {shape:?}")]
    Squeeze {
        /// Shape of the tensor
        shape: Vec<usize>,
        /// Number of trailing dims requested
        count: usize,
    },
}

/// Data structure for tensors: a little-endian byte buffer, its shape and its dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    /// The raw values, `num_elements * dtype.size()` bytes.
    pub bytes: Vec<u8>,
    /// The shape of the tensor.
    pub shape: Vec<usize>,
    /// The data type of the elements.
    pub dtype: DType,
}

impl TensorData {
    /// Creates new tensor data from a vector of values.
    ///
    /// # Panics
    ///
    /// If the number of values does not match the shape.
    pub fn new<E: Element, S: Into<Vec<usize>>>(values: Vec<E>, shape: S) -> Self {
        let shape = shape.into();
        let num_elements: usize = shape.iter().product();
        assert_eq!(
            num_elements,
            values.len(),
            "Shape {:?} is invalid for input of size {:?}",
            shape,
            values.len(),
        );

        Self {
            bytes: bytemuck::cast_slice(&values).to_vec(),
            shape,
            dtype: E::dtype(),
        }
    }

    /// Creates tensor data from raw bytes, checking that the length agrees with shape and dtype.
    pub fn from_bytes(bytes: Vec<u8>, shape: Vec<usize>, dtype: DType) -> Result<Self, DataError> {
        let expected = shape.iter().product::<usize>() * dtype.size();
        if bytes.len() != expected {
            return Err(DataError::LengthMismatch {
                shape,
                dtype,
                expected,
                found: bytes.len(),
            });
        }

        Ok(Self {
            bytes,
            shape,
            dtype,
        })
    }

    /// Zero-filled tensor data of the given shape and dtype.
    pub fn zeros<S: Into<Vec<usize>>>(shape: S, dtype: DType) -> Self {
        let shape = shape.into();
        let num_bytes = shape.iter().product::<usize>() * dtype.size();

        Self {
            bytes: vec![0; num_bytes],
            shape,
            dtype,
        }
    }

    /// Returns the total number of elements of the tensor data.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns the values as a vector of `E`, which must match the stored dtype.
    pub fn to_vec<E: Element>(&self) -> Result<Vec<E>, DataError> {
        if E::dtype() != self.dtype {
            return Err(DataError::TypeMismatch {
                requested: E::dtype(),
                stored: self.dtype,
            });
        }

        Ok(decode::<E>(&self.bytes))
    }

    /// Reads every element as `f64`, whatever the stored dtype.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self.dtype {
            DType::F64 => decode::<f64>(&self.bytes),
            DType::F32 => widen::<f32>(&self.bytes),
            DType::F16 => widen::<f16>(&self.bytes),
            DType::BF16 => widen::<bf16>(&self.bytes),
            DType::I64 => widen::<i64>(&self.bytes),
            DType::I32 => widen::<i32>(&self.bytes),
            DType::I8 => widen::<i8>(&self.bytes),
            DType::U8 | DType::Bool => widen::<u8>(&self.bytes),
        }
    }

    /// Casts the values to another dtype.
    ///
    /// Integer targets truncate toward zero; values outside the target range fail.
    pub fn convert(self, dtype: DType) -> Result<Self, DataError> {
        if self.dtype == dtype {
            return Ok(self);
        }

        let values = self.to_f64_vec();
        let bytes = match dtype {
            DType::F64 => encode::<f64>(&values, dtype)?,
            DType::F32 => encode::<f32>(&values, dtype)?,
            DType::F16 => encode::<f16>(&values, dtype)?,
            DType::BF16 => encode::<bf16>(&values, dtype)?,
            DType::I64 => encode::<i64>(&values, dtype)?,
            DType::I32 => encode::<i32>(&values, dtype)?,
            DType::I8 => encode::<i8>(&values, dtype)?,
            DType::U8 => encode::<u8>(&values, dtype)?,
            DType::Bool => values.iter().map(|v| (*v != 0.0) as u8).collect(),
        };

        Ok(Self {
            bytes,
            shape: self.shape,
            dtype,
        })
    }

    /// Removes `count` trailing dimensions, all of which must be of size one.
    ///
    /// The row-major layout is unchanged, so only the shape is rewritten.
    pub fn squeeze_trailing(mut self, count: usize) -> Result<Self, DataError> {
        let rank = self.shape.len();
        if count > rank || self.shape[rank - count..].iter().any(|dim| *dim != 1) {
            return Err(DataError::Squeeze {
                shape: self.shape,
                count,
            });
        }

        self.shape.truncate(rank - count);
        Ok(self)
    }
}

fn decode<E: Element>(bytes: &[u8]) -> Vec<E> {
    bytes
        .chunks_exact(core::mem::size_of::<E>())
        .map(bytemuck::pod_read_unaligned::<E>)
        .collect()
}

fn widen<E: Element>(bytes: &[u8]) -> Vec<f64> {
    decode::<E>(bytes)
        .into_iter()
        .map(|value| value.to_f64().unwrap_or(f64::NAN))
        .collect()
}

fn encode<E: Element>(values: &[f64], dtype: DType) -> Result<Vec<u8>, DataError> {
    let mut out = Vec::with_capacity(values.len() * dtype.size());
    for value in values {
        let elem = <E as NumCast>::from(*value).ok_or(DataError::Cast {
            value: *value,
            dtype,
        })?;
        out.extend_from_slice(bytemuck::bytes_of(&elem));
    }
    Ok(out)
}
