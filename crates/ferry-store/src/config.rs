use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ArchitectureProfile, DType};

/// Configuration IO error.
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid format.
    InvalidFormat(String),

    /// File not found.
    FileNotFound(String),

    /// The file could not be written.
    Write(String),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut message = "Config error => ".to_string();

        match self {
            Self::InvalidFormat(err) => {
                message += format!("Invalid format: {err}").as_str();
            }
            Self::FileNotFound(err) => {
                message += format!("File not found: {err}").as_str();
            }
            Self::Write(err) => {
                message += format!("Cannot write: {err}").as_str();
            }
        };

        f.write_str(message.as_str())
    }
}

impl std::error::Error for ConfigError {}

/// Settings threaded through model construction and transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Element type of float tensors built by the factory.
    pub dtype: DType,
    /// Number of output classes of the built networks.
    pub num_classes: usize,
    /// Accept destination keys left at their default value.
    pub allow_unmatched: bool,
    /// Profiles registered after the built-in ones.
    pub profiles: Vec<ArchitectureProfile>,
    /// Directory holding the network templates.
    pub zoo_dir: Option<PathBuf>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            dtype: DType::F32,
            num_classes: 1000,
            allow_unmatched: false,
            profiles: Vec::new(),
            zoo_dir: None,
        }
    }
}

impl ConvertConfig {
    /// Saves the configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|err| ConfigError::InvalidFormat(format!("{err}")))?;
        std::fs::write(file.as_ref(), content).map_err(|err| {
            ConfigError::Write(format!("{}: {err}", file.as_ref().display()))
        })
    }

    /// Loads the configuration from a file.
    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file.as_ref())
            .map_err(|_| ConfigError::FileNotFound(file.as_ref().to_string_lossy().to_string()))?;
        Self::from_json(&content)
    }

    /// Parses the configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|err| ConfigError::InvalidFormat(format!("{err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Framework;

    #[test]
    fn missing_fields_take_defaults() {
        let config = ConvertConfig::from_json(r#"{"num_classes": 10}"#).unwrap();

        assert_eq!(config.num_classes, 10);
        assert_eq!(config.dtype, DType::F32);
        assert!(!config.allow_unmatched);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("convert.json");
        let config = ConvertConfig {
            dtype: DType::F16,
            allow_unmatched: true,
            profiles: vec![ArchitectureProfile::new("extra", Framework::PyTorch, Framework::Gluon)],
            zoo_dir: Some(PathBuf::from("zoo")),
            ..Default::default()
        };

        config.save(&file).unwrap();
        let loaded = ConvertConfig::load(&file).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn load_missing_file() {
        let err = ConvertConfig::load("/nonexistent/convert.json").unwrap_err();

        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn invalid_json() {
        let err = ConvertConfig::from_json("{").unwrap_err();

        assert!(err.to_string().starts_with("Config error => Invalid format"));
    }
}
