use core::fmt;

use half::{bf16, f16};
use num_traits::{NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Supported data types for tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 64-bit floating point
    F64,
    /// 32-bit floating point
    F32,
    /// 16-bit floating point
    F16,
    /// Brain floating point
    BF16,
    /// 64-bit integer
    I64,
    /// 32-bit integer
    I32,
    /// 8-bit integer
    I8,
    /// 8-bit unsigned integer
    U8,
    /// Boolean, stored as one byte per element
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DType::F64 | DType::I64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    /// Returns true for the floating point types.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F64 | DType::F32 | DType::F16 | DType::BF16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F64 => write!(f, "f64"),
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::I64 => write!(f, "i64"),
            DType::I32 => write!(f, "i32"),
            DType::I8 => write!(f, "i8"),
            DType::U8 => write!(f, "u8"),
            DType::Bool => write!(f, "bool"),
        }
    }
}

/// Element type that can be stored in a [`TensorData`](crate::TensorData) buffer.
pub trait Element:
    bytemuck::Pod + NumCast + ToPrimitive + Copy + fmt::Debug + PartialEq + Send + Sync + 'static
{
    /// The data type tag written next to the raw bytes.
    fn dtype() -> DType;
}

macro_rules! element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            fn dtype() -> DType {
                $dtype
            }
        }
    };
}

element!(f64, DType::F64);
element!(f32, DType::F32);
element!(f16, DType::F16);
element!(bf16, DType::BF16);
element!(i64, DType::I64);
element!(i32, DType::I32);
element!(i8, DType::I8);
element!(u8, DType::U8);
