use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConvertError;

/// A representation family: the way one training framework packages the parameters
/// of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// Gluon (imperative MXNet) blocks, `.` separated parameter paths.
    Gluon,
    /// PyTorch state dicts, `.` separated, buffers included.
    PyTorch,
    /// Chainer links, `/` separated named parameters; persistent values live on the links.
    Chainer,
    /// Static-graph MXNet checkpoints split into argument and auxiliary parameters.
    MxNet,
}

impl Framework {
    /// All supported frameworks.
    pub const ALL: [Framework; 4] = [
        Framework::Gluon,
        Framework::PyTorch,
        Framework::Chainer,
        Framework::MxNet,
    ];

    /// Identifier used on the command line and in profiles.
    pub fn name(&self) -> &'static str {
        match self {
            Framework::Gluon => "gluon",
            Framework::PyTorch => "pytorch",
            Framework::Chainer => "chainer",
            Framework::MxNet => "mxnet",
        }
    }

    /// Separator between the components of a key.
    pub fn separator(&self) -> char {
        match self {
            Framework::Gluon | Framework::PyTorch => '.',
            Framework::Chainer => '/',
            Framework::MxNet => '_',
        }
    }

    /// Prefix carried by every key of the flat view.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Framework::Chainer => "/",
            _ => "",
        }
    }

    /// Leaf names that are persistent buffers rather than learnable parameters.
    ///
    /// MXNet buffers are identified by the `aux:` partition of the checkpoint instead.
    pub fn buffer_names(&self) -> &'static [&'static str] {
        match self {
            Framework::PyTorch => &["running_mean", "running_var", "num_batches_tracked"],
            Framework::Chainer => &["avg_mean", "avg_var", "N", "index"],
            Framework::Gluon | Framework::MxNet => &[],
        }
    }

    /// Whether the flat named-tensor view exposes buffers next to parameters.
    pub fn flat_view_includes_buffers(&self) -> bool {
        matches!(self, Framework::PyTorch)
    }

    /// Split a flat key into its structural path.
    pub fn split_key(&self, key: &str) -> Vec<String> {
        let key = key.strip_prefix(self.key_prefix()).unwrap_or(key);
        key.split(self.separator()).map(str::to_string).collect()
    }

    /// Join a structural path into a flat key.
    pub fn join_key<S: AsRef<str>>(&self, path: &[S]) -> String {
        let mut key = String::from(self.key_prefix());
        for (i, token) in path.iter().enumerate() {
            if i > 0 {
                key.push(self.separator());
            }
            key.push_str(token.as_ref());
        }
        key
    }

    /// The last component of a key: its role token (`weight`, `bias`, `gamma`, ...).
    pub fn leaf<'a>(&self, key: &'a str) -> &'a str {
        key.rsplit(self.separator()).next().unwrap_or(key)
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Framework {
    type Err = ConvertError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Framework::ALL
            .into_iter()
            .find(|framework| framework.name() == name)
            .ok_or_else(|| ConvertError::UnsupportedFramework(name.to_string()))
    }
}
