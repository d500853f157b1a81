#![warn(missing_docs)]

//! `ferry-store` aligns the named weight tensors of two representations of the same
//! network and transfers their values across.
//!
//! A conversion filters the flat views of both networks, orders the retained keys in a
//! comparable way, copies the values pair by pair and injects the auxiliary values that
//! have no flat key in the destination. What differs between representations and
//! architectures is described by declarative [profiles](ArchitectureProfile).

#[macro_use]
extern crate derive_new;

mod collection;
mod config;
mod convert;
mod error;
mod factory;
mod framework;
mod registry;
mod tensor;

/// Key filtering rules and their outcome.
pub mod filter;
/// Structural injection of auxiliary values.
pub mod inject;
/// Networks as module trees.
pub mod module;
/// Natural ordering and key rewriting.
pub mod normalize;
/// Declarative conversion profiles.
pub mod profile;
/// Safetensors persistence.
pub mod safetensors;
/// Per-conversion alignment state.
pub mod session;
/// The transfer engine and its report.
pub mod transfer;

pub use collection::TensorCollection;
pub use config::{ConfigError, ConvertConfig};
pub use convert::{save, Conversion, ConvertRequest, Converter};
pub use error::ConvertError;
pub use factory::{BuildRequest, ModelFactory, ZooFactory};
pub use framework::Framework;
pub use module::Network;
pub use profile::ArchitectureProfile;
pub use registry::{ConversionPlan, ProfileRegistry};
pub use tensor::{DType, DataError, Element, TensorData};
