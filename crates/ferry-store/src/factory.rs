use std::path::{Path, PathBuf};

use crate::module::FieldKind;
use crate::safetensors::{MxCheckpoint, SafetensorsStore};
use crate::{ConvertConfig, ConvertError, DType, Framework, Network, TensorCollection, TensorData};

const STATE_DICT_PREFIX: &str = "state_dict.";

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Representation.
    pub framework: Framework,
    /// Architecture name.
    pub architecture: String,
    /// Number of output classes.
    pub num_classes: usize,
    /// Start from pretrained values instead of the default initialization.
    pub pretrained: bool,
    /// Checkpoint loaded over the initial values.
    pub checkpoint: Option<PathBuf>,
}

impl BuildRequest {
    /// Request a freshly initialized network with 1000 classes.
    pub fn new(framework: Framework, architecture: impl Into<String>) -> Self {
        Self {
            framework,
            architecture: architecture.into(),
            num_classes: 1000,
            pretrained: false,
            checkpoint: None,
        }
    }

    /// Set the number of classes.
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Start from pretrained values.
    pub fn with_pretrained(mut self, pretrained: bool) -> Self {
        self.pretrained = pretrained;
        self
    }

    /// Load a checkpoint over the initial values. Empty paths are ignored.
    pub fn with_checkpoint(mut self, checkpoint: Option<PathBuf>) -> Self {
        self.checkpoint = checkpoint.filter(|path| !path.as_os_str().is_empty());
        self
    }
}

/// Builds networks by architecture name.
pub trait ModelFactory {
    /// Build the network described by `request`.
    fn build(&self, request: &BuildRequest) -> Result<Network, ConvertError>;
}

/// Factory reading network templates from a directory.
///
/// Templates live at `<root>/<framework>/<architecture>.safetensors`, pretrained ones at
/// `<architecture>.pretrained.safetensors`. A declared checkpoint is loaded over the
/// template, or alone when there is none.
#[derive(Debug, Clone)]
pub struct ZooFactory {
    root: Option<PathBuf>,
    dtype: DType,
}

impl ZooFactory {
    /// Factory reading templates under `root`.
    pub fn new(root: Option<PathBuf>, dtype: DType) -> Self {
        Self { root, dtype }
    }

    /// Factory configured from the conversion settings.
    pub fn from_config(config: &ConvertConfig) -> Self {
        Self::new(config.zoo_dir.clone(), config.dtype)
    }

    /// Template location for a request.
    pub fn template_path(&self, request: &BuildRequest) -> Option<PathBuf> {
        let suffix = if request.pretrained {
            "pretrained.safetensors"
        } else {
            "safetensors"
        };
        self.root.as_ref().map(|root| {
            root.join(request.framework.name())
                .join(format!("{}.{suffix}", request.architecture))
        })
    }

    fn build_mxnet(
        &self,
        request: &BuildRequest,
        checkpoint: &Path,
    ) -> Result<Network, ConvertError> {
        let checkpoint = MxCheckpoint::load(checkpoint)?;
        let mut network = Network::new(Framework::MxNet, request.architecture.clone());
        for (key, data) in checkpoint.arg_params {
            network.insert_field(&key, self.cast(data)?, FieldKind::Param);
        }
        for (key, data) in checkpoint.aux_params {
            network.insert_field(&key, self.cast(data)?, FieldKind::Buffer);
        }
        Ok(network)
    }

    fn overlay(
        &self,
        network: &mut Network,
        tensors: TensorCollection,
    ) -> Result<(), ConvertError> {
        for (key, data) in tensors {
            let data = self.cast(data)?;
            let existing = network.require(&key)?;
            if existing.shape != data.shape {
                return Err(ConvertError::ShapeMismatch {
                    destination_key: key.clone(),
                    destination_shape: existing.shape.clone(),
                    source_shape: data.shape,
                    source_key: key,
                });
            }
            network.assign(&key, data)?;
        }
        Ok(())
    }

    fn cast(&self, data: TensorData) -> Result<TensorData, ConvertError> {
        if data.dtype.is_float() && data.dtype != self.dtype {
            Ok(data.convert(self.dtype)?)
        } else {
            Ok(data)
        }
    }
}

impl ModelFactory for ZooFactory {
    fn build(&self, request: &BuildRequest) -> Result<Network, ConvertError> {
        if let Some(checkpoint) = &request.checkpoint {
            if !checkpoint.is_file() {
                return Err(ConvertError::MissingFile(checkpoint.clone()));
            }
        }

        log::info!(
            "Building {}-model {} ({} classes)",
            request.framework,
            request.architecture,
            request.num_classes
        );

        if request.framework == Framework::MxNet {
            return match &request.checkpoint {
                Some(checkpoint) => self.build_mxnet(request, checkpoint),
                None => Err(ConvertError::MissingFile(PathBuf::from(format!(
                    "{}-symbol.json",
                    request.architecture
                )))),
            };
        }

        let template = self.template_path(request).filter(|path| path.is_file());
        let checkpoint = match &request.checkpoint {
            Some(path) => {
                log::info!("Loading model: {}", path.display());
                Some(unwrap_state_dict(SafetensorsStore::from_file(path).load()?))
            }
            None => None,
        };

        match (template, checkpoint) {
            (Some(template), checkpoint) => {
                let tensors = SafetensorsStore::from_file(&template).load()?;
                let mut network = Network::new(request.framework, request.architecture.clone());
                for (key, data) in tensors {
                    network.insert(&key, self.cast(data)?);
                }
                if let Some(checkpoint) = checkpoint {
                    self.overlay(&mut network, checkpoint)?;
                }
                Ok(network)
            }
            (None, Some(checkpoint)) => {
                let mut network = Network::new(request.framework, request.architecture.clone());
                for (key, data) in checkpoint {
                    network.insert(&key, self.cast(data)?);
                }
                Ok(network)
            }
            (None, None) => {
                let path = self.template_path(request).unwrap_or_else(|| {
                    PathBuf::from(request.framework.name())
                        .join(format!("{}.safetensors", request.architecture))
                });
                Err(ConvertError::MissingFile(path))
            }
        }
    }
}

/// Strip the `state_dict.` wrapper of PyTorch training checkpoints.
fn unwrap_state_dict(tensors: TensorCollection) -> TensorCollection {
    let wrapped =
        !tensors.is_empty() && tensors.keys().all(|key| key.starts_with(STATE_DICT_PREFIX));
    if !wrapped {
        return tensors;
    }
    tensors
        .into_iter()
        .map(|(key, data)| (key[STATE_DICT_PREFIX.len()..].to_string(), data))
        .collect()
}
