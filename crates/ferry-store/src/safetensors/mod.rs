//! Checkpoint persistence in the safetensors format.
//!
//! Every representation is stored as one flat collection. Static-graph MXNet
//! checkpoints keep their two partitions apart through the `arg:` and `aux:` key
//! prefixes and carry their symbolic graph in the `symbol` metadata entry.

mod store;

pub use store::{SafetensorsStore, StoreError, KEY_ORDER_METADATA};

use std::path::Path;

use crate::TensorCollection;

/// A static-graph checkpoint: the symbolic graph plus argument and auxiliary parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MxCheckpoint {
    /// Symbolic graph JSON, when the file carries one.
    pub symbol: Option<String>,
    /// Learnable parameters.
    pub arg_params: TensorCollection,
    /// Auxiliary states such as moving statistics.
    pub aux_params: TensorCollection,
}

impl MxCheckpoint {
    /// Prefix of argument parameters.
    pub const ARG_PREFIX: &'static str = "arg:";
    /// Prefix of auxiliary parameters.
    pub const AUX_PREFIX: &'static str = "aux:";
    /// Metadata entry holding the symbolic graph.
    pub const SYMBOL_METADATA: &'static str = "symbol";

    /// Load a checkpoint. Keys without a partition prefix are arguments.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (tensors, metadata) = SafetensorsStore::from_file(path.as_ref()).load_with_metadata()?;
        Ok(Self::from_collection(
            tensors,
            metadata.get(Self::SYMBOL_METADATA).cloned(),
        ))
    }

    /// Split a prefixed collection into its partitions.
    pub fn from_collection(tensors: TensorCollection, symbol: Option<String>) -> Self {
        let mut checkpoint = Self {
            symbol,
            ..Default::default()
        };

        for (key, data) in tensors {
            match key.strip_prefix(Self::AUX_PREFIX) {
                Some(name) => {
                    checkpoint.aux_params.insert(name, data);
                }
                None => {
                    let name = key.strip_prefix(Self::ARG_PREFIX).unwrap_or(&key);
                    checkpoint.arg_params.insert(name, data);
                }
            }
        }

        checkpoint
    }

    /// Merge both partitions back into one prefixed collection.
    pub fn to_collection(&self) -> TensorCollection {
        let args = self
            .arg_params
            .iter()
            .map(|(key, data)| (format!("{}{key}", Self::ARG_PREFIX), data.clone()));
        let auxs = self
            .aux_params
            .iter()
            .map(|(key, data)| (format!("{}{key}", Self::AUX_PREFIX), data.clone()));
        args.chain(auxs).collect()
    }

    /// Save the checkpoint.
    pub fn save(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<(), StoreError> {
        let mut store = SafetensorsStore::from_file(path.as_ref()).overwrite(overwrite);
        if let Some(symbol) = &self.symbol {
            store = store.metadata(Self::SYMBOL_METADATA, symbol.clone());
        }
        store.save(&self.to_collection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TensorData;

    #[test]
    fn partitions_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preresnet200b.safetensors");
        let mut checkpoint = MxCheckpoint {
            symbol: Some(r#"{"nodes": []}"#.to_string()),
            ..Default::default()
        };
        checkpoint
            .arg_params
            .insert("conv0_weight", TensorData::new(vec![1.0f32; 4], [1, 1, 2, 2]));
        checkpoint
            .aux_params
            .insert("bn0_moving_mean", TensorData::new(vec![0.0f32], [1]));

        checkpoint.save(&path, false).unwrap();
        let loaded = MxCheckpoint::load(&path).unwrap();

        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn unprefixed_keys_are_arguments() {
        let tensors: TensorCollection = [("fc1_bias", TensorData::new(vec![0.0f32], [1]))]
            .into_iter()
            .collect();

        let checkpoint = MxCheckpoint::from_collection(tensors, None);

        assert!(checkpoint.arg_params.contains_key("fc1_bias"));
        assert!(checkpoint.aux_params.is_empty());
    }
}
