use std::path::PathBuf;

use ferry_store::{ConvertConfig, ConvertError, ConvertRequest};

/// Convert models between framework representations (Gluon/PyTorch/Chainer/MXNet).
#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ConvertArgs {
    /// Source model framework name.
    #[arg(long = "src-fwk")]
    pub src_fwk: String,

    /// Destination model framework name.
    #[arg(long = "dst-fwk")]
    pub dst_fwk: String,

    /// Source model name.
    #[arg(long = "src-model")]
    pub src_model: String,

    /// Destination model name.
    #[arg(long = "dst-model")]
    pub dst_model: String,

    /// Source model parameter file.
    #[arg(long = "src-params")]
    pub src_params: Option<PathBuf>,

    /// Destination model parameter file.
    #[arg(long = "dst-params")]
    pub dst_params: Option<PathBuf>,

    /// Directory of the saved model and log files.
    #[arg(long = "save-dir")]
    pub save_dir: Option<PathBuf>,

    /// Filename of the log file.
    #[arg(long = "logging-file-name", default_value = "train.log")]
    pub logging_file_name: String,

    /// Directory holding the network templates.
    #[arg(long = "zoo-dir")]
    pub zoo_dir: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of classes.
    #[arg(long = "num-classes")]
    pub num_classes: Option<usize>,

    /// Replace an existing destination file.
    #[arg(long)]
    pub overwrite: bool,
}

impl ConvertArgs {
    /// Where the converted checkpoint is written.
    pub fn output_path(&self) -> PathBuf {
        match (&self.dst_params, &self.save_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join(format!("{}.safetensors", self.dst_model)),
            (None, None) => PathBuf::from(format!("{}.safetensors", self.dst_model)),
        }
    }

    /// Configuration file contents with the command line overrides applied.
    pub fn config(&self) -> Result<ConvertConfig, ConvertError> {
        let mut config = match &self.config {
            Some(path) => ConvertConfig::load(path)?,
            None => ConvertConfig::default(),
        };
        if let Some(num_classes) = self.num_classes {
            config.num_classes = num_classes;
        }
        if let Some(zoo_dir) = &self.zoo_dir {
            config.zoo_dir = Some(zoo_dir.clone());
        }
        Ok(config)
    }

    /// The conversion to run.
    pub fn request(&self) -> ConvertRequest {
        ConvertRequest::new(
            self.src_fwk.clone(),
            self.dst_fwk.clone(),
            self.src_model.clone(),
            self.dst_model.clone(),
            self.output_path(),
        )
        .with_source_params(self.src_params.clone())
        .with_overwrite(self.overwrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    const REQUIRED: [&str; 9] = [
        "ferry-convert",
        "--src-fwk",
        "gluon",
        "--dst-fwk",
        "pytorch",
        "--src-model",
        "resnet18",
        "--dst-model",
        "resnet18",
    ];

    fn parse(extra: &[&str]) -> ConvertArgs {
        ConvertArgs::try_parse_from(REQUIRED.iter().chain(extra.iter()).copied()).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);

        assert_eq!(args.logging_file_name, "train.log");
        assert_eq!(args.src_params, None);
        assert!(!args.overwrite);
        assert_eq!(args.config().unwrap(), ConvertConfig::default());
    }

    #[test]
    fn framework_names_are_required() {
        let result = ConvertArgs::try_parse_from(["ferry-convert", "--src-fwk", "gluon"]);

        assert!(result.is_err());
    }

    #[rstest]
    #[case(&[], "resnet18.safetensors")]
    #[case(&["--save-dir", "out"], "out/resnet18.safetensors")]
    #[case(&["--save-dir", "out", "--dst-params", "net.safetensors"], "net.safetensors")]
    fn output_path(#[case] extra: &[&str], #[case] expected: &str) {
        assert_eq!(parse(extra).output_path(), PathBuf::from(expected));
    }

    #[test]
    fn overrides_apply_on_top_of_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("convert.json");
        std::fs::write(&file, r#"{"num_classes": 10, "allow_unmatched": true}"#).unwrap();
        let file = file.to_string_lossy().to_string();

        let config = parse(&["--config", &file, "--zoo-dir", "zoo"]).config().unwrap();

        assert_eq!(config.num_classes, 10);
        assert!(config.allow_unmatched);
        assert_eq!(config.zoo_dir, Some(PathBuf::from("zoo")));

        let config = parse(&["--config", &file, "--num-classes", "100"]).config().unwrap();
        assert_eq!(config.num_classes, 100);
    }

    #[test]
    fn request_carries_the_identifiers() {
        let request = parse(&["--src-params", "resnet18.params", "--overwrite"]).request();

        assert_eq!(request.source_framework, "gluon");
        assert_eq!(request.destination_framework, "pytorch");
        assert_eq!(request.source_params, Some(PathBuf::from("resnet18.params")));
        assert!(request.overwrite);
    }
}
