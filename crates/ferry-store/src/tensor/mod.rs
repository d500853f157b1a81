mod data;
mod dtype;

pub use data::{DataError, TensorData};
pub use dtype::{DType, Element};
