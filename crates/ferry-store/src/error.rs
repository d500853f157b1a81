use std::path::PathBuf;

use crate::config::ConfigError;
use crate::safetensors::StoreError;
use crate::{DataError, Framework};

/// Errors raised while planning or running a conversion.
///
/// Every variant is fatal: a conversion either completes or leaves no output behind.
#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    /// The framework identifier is not one of the supported representations.
    #[error("Unsupported framework: {0}")]
    UnsupportedFramework(String),

    /// No profile covers this pair of frameworks.
    #[error("Unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source framework
        from: Framework,
        /// Destination framework
        to: Framework,
    },

    /// The filtered key lists cannot be aligned one to one.
    #[error(
        "Parameter count mismatch: {source_count} source keys, {destination_count} destination keys"
    )]
    ParameterCountMismatch {
        /// Number of retained source keys
        source_count: usize,
        /// Number of retained destination keys
        destination_count: usize,
    },

    /// An aligned pair holds tensors of different shapes.
    #[error(
        "Shape mismatch: source `{source_key}` {source_shape:?}, destination `{destination_key}` {destination_shape:?}"
    )]
    ShapeMismatch {
        /// Source key
        source_key: String,
        /// Destination key or structural path
        destination_key: String,
        /// Shape of the source tensor
        source_shape: Vec<usize>,
        /// Shape of the destination tensor
        destination_shape: Vec<usize>,
    },

    /// An aligned pair does not share the same role token.
    #[error("Role mismatch: source `{source_key}` is a {source_role}, destination `{destination_key}` is a {destination_role}")]
    RoleMismatch {
        /// Source key
        source_key: String,
        /// Destination key
        destination_key: String,
        /// Leaf token of the source key
        source_role: String,
        /// Leaf token of the destination key
        destination_role: String,
    },

    /// A declared checkpoint does not exist.
    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// A key named by the plan is absent from the network.
    #[error("Tensor `{key}` not found in the {framework} network")]
    MissingTensor {
        /// The flat key
        key: String,
        /// Framework of the network searched
        framework: Framework,
    },

    /// An auxiliary key has no anchor sibling to locate its destination.
    #[error("Cannot resolve auxiliary key `{key}`: no anchor for owner `{owner}`")]
    UnresolvedAuxiliary {
        /// The auxiliary source key
        key: String,
        /// Its owner key
        owner: String,
    },

    /// A structural path does not lead to a module.
    #[error("Path `{path}` does not resolve to a module")]
    UnresolvedPath {
        /// The path, joined with `/`
        path: String,
    },

    /// The resolved module holds no field of that name.
    #[error("Module `{path}` has no field `{field}`")]
    MissingField {
        /// The module path, joined with `/`
        path: String,
        /// The field name
        field: String,
    },

    /// A rewrite table cannot be folded and unfolded without loss for this key.
    #[error("Invalid rewrite for key `{key}`: {reason}")]
    InvalidRewrite {
        /// The offending key
        key: String,
        /// What went wrong
        reason: String,
    },

    /// A profile failed validation.
    #[error("Invalid profile `{name}`: {reason}")]
    InvalidProfile {
        /// Profile name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// The same destination was targeted twice during one conversion.
    #[error("Destination `{0}` is written more than once")]
    DuplicateWrite(String),

    /// Destination keys were left at their default initialization.
    #[error(
        "{} destination keys were not covered, first: `{}`",
        .0.len(),
        .0.first().map(String::as_str).unwrap_or_default()
    )]
    Uncovered(Vec<String>),

    /// Tensor data could not be read or converted.
    #[error("Tensor data error: {0}")]
    Data(#[from] DataError),

    /// Reading or writing a checkpoint failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be read or written.
    #[error("{0}")]
    Config(#[from] ConfigError),
}
