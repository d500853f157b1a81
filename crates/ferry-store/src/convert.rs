use std::path::{Path, PathBuf};

use crate::factory::{BuildRequest, ModelFactory, ZooFactory};
use crate::module::FieldKind;
use crate::registry::ConversionPlan;
use crate::safetensors::{MxCheckpoint, SafetensorsStore, StoreError};
use crate::session::ConversionSession;
use crate::transfer::{TransferEngine, TransferReport};
use crate::{ConvertConfig, ConvertError, Framework, Network, ProfileRegistry};

/// One conversion to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertRequest {
    /// Source framework identifier.
    pub source_framework: String,
    /// Destination framework identifier.
    pub destination_framework: String,
    /// Source architecture.
    pub source_model: String,
    /// Destination architecture.
    pub destination_model: String,
    /// Checkpoint holding the source values.
    pub source_params: Option<PathBuf>,
    /// Where the converted checkpoint is written.
    pub output: PathBuf,
    /// Replace an existing output file.
    pub overwrite: bool,
}

impl ConvertRequest {
    /// Create a request without a source checkpoint.
    pub fn new(
        source_framework: impl Into<String>,
        destination_framework: impl Into<String>,
        source_model: impl Into<String>,
        destination_model: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_framework: source_framework.into(),
            destination_framework: destination_framework.into(),
            source_model: source_model.into(),
            destination_model: destination_model.into(),
            source_params: None,
            output: output.into(),
            overwrite: false,
        }
    }

    /// Load the source values from a checkpoint.
    pub fn with_source_params(mut self, path: Option<PathBuf>) -> Self {
        self.source_params = path;
        self
    }

    /// Replace an existing output file.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// A finished conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    /// The merged plan that drove it.
    pub plan: ConversionPlan,
    /// What was written.
    pub report: TransferReport,
    /// The checkpoint written.
    pub output: PathBuf,
}

/// Runs conversions end to end: plan, build, align, transfer, persist.
pub struct Converter<F = ZooFactory> {
    registry: ProfileRegistry,
    config: ConvertConfig,
    factory: F,
}

impl Converter<ZooFactory> {
    /// Converter with the built-in profiles, the configured extra profiles and a zoo factory.
    pub fn from_config(config: ConvertConfig) -> Result<Self, ConvertError> {
        let mut registry = ProfileRegistry::builtin();
        registry.extend(config.profiles.iter().cloned())?;
        let factory = ZooFactory::from_config(&config);
        Ok(Self::new(registry, config, factory))
    }
}

impl<F: ModelFactory> Converter<F> {
    /// Create a converter.
    pub fn new(registry: ProfileRegistry, config: ConvertConfig, factory: F) -> Self {
        Self {
            registry,
            config,
            factory,
        }
    }

    /// Registered profiles.
    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Settings in use.
    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Run a conversion. The output is written only when every step succeeded.
    pub fn convert(&self, request: &ConvertRequest) -> Result<Conversion, ConvertError> {
        let source_framework: Framework = request.source_framework.parse()?;
        let destination_framework: Framework = request.destination_framework.parse()?;

        let plan = self.registry.plan(
            source_framework,
            destination_framework,
            &request.source_model,
            &request.destination_model,
        )?;

        if request.output.exists() && !request.overwrite {
            return Err(StoreError::AlreadyExists(request.output.clone()).into());
        }

        let source = self.factory.build(
            &BuildRequest::new(source_framework, request.source_model.clone())
                .with_num_classes(self.config.num_classes)
                .with_checkpoint(request.source_params.clone()),
        )?;
        let mut destination = self.factory.build(
            &BuildRequest::new(destination_framework, request.destination_model.clone())
                .with_num_classes(self.config.num_classes),
        )?;

        let report = self.transfer(&plan, &source, &mut destination)?;
        save(&destination, &request.output, request.overwrite)?;

        Ok(Conversion {
            plan,
            report,
            output: request.output.clone(),
        })
    }

    /// Align two built networks and copy the values, without persisting anything.
    ///
    /// With `allow_unmatched` configured, every plan accepts partial coverage.
    pub fn transfer(
        &self,
        plan: &ConversionPlan,
        source: &Network,
        destination: &mut Network,
    ) -> Result<TransferReport, ConvertError> {
        let mut plan = plan.clone();
        plan.allow_partial |= self.config.allow_unmatched;

        let session = ConversionSession::prepare(&plan, source, destination)?;
        TransferEngine::new(&plan).run(&session, source, destination)
    }
}

/// Persist a network in its framework's checkpoint layout.
pub fn save(network: &Network, path: &Path, overwrite: bool) -> Result<(), ConvertError> {
    match network.framework() {
        Framework::MxNet => {
            let checkpoint = MxCheckpoint {
                symbol: None,
                arg_params: network.collect_kind(FieldKind::Param),
                aux_params: network.collect_kind(FieldKind::Buffer),
            };
            checkpoint.save(path, overwrite)?;
        }
        framework => {
            SafetensorsStore::from_file(path)
                .overwrite(overwrite)
                .metadata("framework", framework.name())
                .metadata("architecture", network.architecture())
                .save(&network.to_collection())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, TensorData};

    struct FixedFactory {
        source: Network,
        destination: Network,
    }

    impl ModelFactory for FixedFactory {
        fn build(&self, request: &BuildRequest) -> Result<Network, ConvertError> {
            if request.framework == self.source.framework() && request.checkpoint.is_some() {
                Ok(self.source.clone())
            } else {
                Ok(self.destination.clone())
            }
        }
    }

    fn converter(source: Network, destination: Network) -> Converter<FixedFactory> {
        Converter::new(
            ProfileRegistry::builtin(),
            ConvertConfig::default(),
            FixedFactory {
                source,
                destination,
            },
        )
    }

    fn networks() -> (Network, Network) {
        let mut source = Network::new(Framework::PyTorch, "net");
        source.insert("conv.weight", TensorData::new(vec![1.0f32, 2.0], [2]));
        source.insert("bn.num_batches_tracked", TensorData::new(vec![7i64], [1]));
        let mut destination = Network::new(Framework::Gluon, "net");
        destination.insert("features.0.weight", TensorData::zeros([2], DType::F32));
        (source, destination)
    }

    #[test]
    fn unknown_framework_is_rejected_first() {
        let (source, destination) = networks();
        let request = ConvertRequest::new("keras", "gluon", "net", "net", "out.safetensors");

        let err = converter(source, destination).convert(&request).unwrap_err();

        assert!(matches!(err, ConvertError::UnsupportedFramework(name) if name == "keras"));
    }

    #[test]
    fn converted_checkpoint_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("net.safetensors");
        let (source, destination) = networks();
        let request = ConvertRequest::new("pytorch", "gluon", "net", "net", &output)
            .with_source_params(Some(PathBuf::from("net.pth")));

        let conversion = converter(source, destination).convert(&request).unwrap();

        assert_eq!(conversion.report.applied.len(), 1);
        let saved = SafetensorsStore::from_file(&output).load().unwrap();
        assert_eq!(
            saved.get("features.0.weight").unwrap().to_vec::<f32>().unwrap(),
            vec![1.0, 2.0]
        );
    }

    #[test]
    fn failed_transfer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("net.safetensors");
        let (source, _) = networks();
        let mut destination = Network::new(Framework::Gluon, "net");
        destination.insert("features.0.weight", TensorData::zeros([3], DType::F32));
        let request = ConvertRequest::new("pytorch", "gluon", "net", "net", &output)
            .with_source_params(Some(PathBuf::from("net.pth")));

        let err = converter(source, destination).convert(&request).unwrap_err();

        assert!(matches!(err, ConvertError::ShapeMismatch { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn existing_output_is_kept_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("net.safetensors");
        std::fs::write(&output, b"previous").unwrap();
        let (source, destination) = networks();
        let request = ConvertRequest::new("pytorch", "gluon", "net", "net", &output)
            .with_source_params(Some(PathBuf::from("net.pth")));

        let err = converter(source, destination).convert(&request).unwrap_err();

        assert!(matches!(err, ConvertError::Store(StoreError::AlreadyExists(_))));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous");
    }

    #[test]
    fn mxnet_networks_are_saved_as_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.safetensors");
        let mut network = Network::new(Framework::MxNet, "net");
        network.insert_field("fc1_weight", TensorData::new(vec![1.0f32], [1]), FieldKind::Param);
        network.insert_field(
            "bn0_moving_var",
            TensorData::new(vec![1.0f32], [1]),
            FieldKind::Buffer,
        );

        save(&network, &path, false).unwrap();
        let checkpoint = MxCheckpoint::load(&path).unwrap();

        assert_eq!(checkpoint.arg_params.key_list(), vec!["fc1_weight"]);
        assert_eq!(checkpoint.aux_params.key_list(), vec!["bn0_moving_var"]);
    }
}
