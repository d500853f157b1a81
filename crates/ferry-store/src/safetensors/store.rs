use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ::safetensors::tensor::{Dtype, TensorView};
use ::safetensors::SafeTensors;

use crate::normalize::sort_natural;
use crate::{DType, DataError, TensorCollection, TensorData};

/// Metadata entry recording the native key order.
pub const KEY_ORDER_METADATA: &str = "ferry.key_order";

/// Errors raised while reading or writing safetensors files.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The safetensors payload is malformed.
    #[error("Safetensors error: {0}")]
    Safetensors(String),

    /// The file holds a dtype without counterpart.
    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    /// Saving would replace an existing file.
    #[error("File {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// A metadata entry cannot be interpreted.
    #[error("Invalid metadata `{key}`: {reason}")]
    Metadata {
        /// Metadata key
        key: String,
        /// What went wrong
        reason: String,
    },

    /// A tensor buffer does not agree with its header.
    #[error("Tensor data error: {0}")]
    Data(#[from] DataError),
}

/// Store reading and writing a [`TensorCollection`] in the safetensors format.
///
/// The native key order is kept in the metadata, so a collection loads back in the
/// order it was saved. Files written by other tools load in natural key order.
#[derive(Debug, Clone)]
pub struct SafetensorsStore {
    path: PathBuf,
    metadata: HashMap<String, String>,
    overwrite: bool,
}

impl SafetensorsStore {
    /// Store backed by a file.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("format".to_string(), "ferry".to_string());
        metadata.insert("producer".to_string(), "ferry-store".to_string());
        metadata.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

        Self {
            path: path.into(),
            metadata,
            overwrite: false,
        }
    }

    /// Add a metadata entry written with the tensors.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Allow saving over an existing file.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the collection to the backing file.
    pub fn save(&self, tensors: &TensorCollection) -> Result<(), StoreError> {
        if self.path.exists() && !self.overwrite {
            return Err(StoreError::AlreadyExists(self.path.clone()));
        }

        let bytes = self.to_bytes(tensors)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, bytes)?;

        log::info!("Saved {} tensors to {}", tensors.len(), self.path.display());
        Ok(())
    }

    /// Read the collection from the backing file.
    pub fn load(&self) -> Result<TensorCollection, StoreError> {
        self.load_with_metadata().map(|(tensors, _)| tensors)
    }

    /// Read the collection and the metadata from the backing file.
    pub fn load_with_metadata(
        &self,
    ) -> Result<(TensorCollection, HashMap<String, String>), StoreError> {
        let data = std::fs::read(&self.path)?;
        let loaded = Self::from_bytes(&data)?;
        log::debug!("Loaded {} tensors from {}", loaded.0.len(), self.path.display());
        Ok(loaded)
    }

    /// Serialize the collection with this store's metadata.
    pub fn to_bytes(&self, tensors: &TensorCollection) -> Result<Vec<u8>, StoreError> {
        let views = tensors
            .iter()
            .map(|(key, data)| {
                TensorView::new(to_safetensors_dtype(data.dtype), data.shape.clone(), &data.bytes)
                    .map(|view| (key.to_string(), view))
                    .map_err(|err| StoreError::Safetensors(format!("{key}: {err}")))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut metadata = self.metadata.clone();
        let order = serde_json::to_string(&tensors.key_list()).map_err(|err| StoreError::Metadata {
            key: KEY_ORDER_METADATA.to_string(),
            reason: err.to_string(),
        })?;
        metadata.insert(KEY_ORDER_METADATA.to_string(), order);

        ::safetensors::serialize(views, Some(metadata))
            .map_err(|err| StoreError::Safetensors(err.to_string()))
    }

    /// Deserialize a collection and its metadata.
    pub fn from_bytes(
        data: &[u8],
    ) -> Result<(TensorCollection, HashMap<String, String>), StoreError> {
        let tensors =
            SafeTensors::deserialize(data).map_err(|err| StoreError::Safetensors(err.to_string()))?;
        let (_, header) = SafeTensors::read_metadata(data)
            .map_err(|err| StoreError::Safetensors(err.to_string()))?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let mut names: Vec<String> = tensors
            .names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        match metadata.get(KEY_ORDER_METADATA) {
            Some(order) => {
                let order: Vec<String> =
                    serde_json::from_str(order).map_err(|err| StoreError::Metadata {
                        key: KEY_ORDER_METADATA.to_string(),
                        reason: err.to_string(),
                    })?;
                let mut expected = names.clone();
                let mut recorded = order.clone();
                expected.sort();
                recorded.sort();
                if expected != recorded {
                    return Err(StoreError::Metadata {
                        key: KEY_ORDER_METADATA.to_string(),
                        reason: "recorded keys differ from the stored tensors".to_string(),
                    });
                }
                names = order;
            }
            None => sort_natural(&mut names),
        }

        let mut collection = TensorCollection::new();
        for name in names {
            let view = tensors
                .tensor(&name)
                .map_err(|err| StoreError::Safetensors(format!("{name}: {err}")))?;
            let data = TensorData::from_bytes(
                view.data().to_vec(),
                view.shape().to_vec(),
                from_safetensors_dtype(view.dtype())?,
            )?;
            collection.insert(name, data);
        }

        Ok((collection, metadata))
    }
}

fn to_safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F64 => Dtype::F64,
        DType::F32 => Dtype::F32,
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
        DType::I64 => Dtype::I64,
        DType::I32 => Dtype::I32,
        DType::I8 => Dtype::I8,
        DType::U8 => Dtype::U8,
        DType::Bool => Dtype::BOOL,
    }
}

fn from_safetensors_dtype(dtype: Dtype) -> Result<DType, StoreError> {
    match dtype {
        Dtype::F64 => Ok(DType::F64),
        Dtype::F32 => Ok(DType::F32),
        Dtype::F16 => Ok(DType::F16),
        Dtype::BF16 => Ok(DType::BF16),
        Dtype::I64 => Ok(DType::I64),
        Dtype::I32 => Ok(DType::I32),
        Dtype::I8 => Ok(DType::I8),
        Dtype::U8 => Ok(DType::U8),
        Dtype::BOOL => Ok(DType::Bool),
        other => Err(StoreError::UnsupportedDtype(format!("{other:?}"))),
    }
}
