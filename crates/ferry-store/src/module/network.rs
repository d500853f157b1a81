use crate::{ConvertError, Framework, TensorCollection, TensorData};

use super::{CollectedKey, Collector, Field, FieldKind, ModuleNode};

/// A materialized network: the parameters of one architecture in one representation.
///
/// The tensors live in a module tree built from the flat keys. The flat view follows
/// the framework's conventions (buffers are hidden unless the framework exposes them),
/// while [`Network::resolve`] gives structural access to every field, buffers included.
#[derive(Debug, Clone)]
pub struct Network {
    framework: Framework,
    architecture: String,
    root: ModuleNode,
    next_position: usize,
}

impl Network {
    /// Create an empty network.
    pub fn new(framework: Framework, architecture: impl Into<String>) -> Self {
        Self {
            framework,
            architecture: architecture.into(),
            root: ModuleNode::default(),
            next_position: 0,
        }
    }

    /// Build a network from a flat collection, classifying buffers by their leaf name.
    pub fn from_collection(
        framework: Framework,
        architecture: impl Into<String>,
        collection: TensorCollection,
    ) -> Self {
        let mut network = Self::new(framework, architecture);
        for (key, data) in collection {
            network.insert(&key, data);
        }
        network
    }

    /// Representation of this network.
    pub fn framework(&self) -> Framework {
        self.framework
    }

    /// Architecture name.
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Root of the module tree.
    pub fn root(&self) -> &ModuleNode {
        &self.root
    }

    /// Insert a tensor under a flat key, classifying it by its leaf name.
    pub fn insert(&mut self, key: &str, data: TensorData) -> Option<TensorData> {
        let kind = if self
            .framework
            .buffer_names()
            .contains(&self.framework.leaf(key))
        {
            FieldKind::Buffer
        } else {
            FieldKind::Param
        };
        self.insert_field(key, data, kind)
    }

    /// Insert a tensor under a flat key with an explicit kind.
    ///
    /// Replacing an existing field keeps its original position.
    pub fn insert_field(
        &mut self,
        key: &str,
        data: TensorData,
        kind: FieldKind,
    ) -> Option<TensorData> {
        let mut path = self.framework.split_key(key);
        let name = path.pop().unwrap_or_default();

        let mut node = &mut self.root;
        for token in path.iter() {
            node = node.child_or_insert(token);
        }

        let position = match node.field(&name) {
            Some(existing) => existing.position,
            None => {
                self.next_position += 1;
                self.next_position - 1
            }
        };

        node.insert_field(
            &name,
            Field {
                data,
                kind,
                position,
            },
        )
        .map(|previous| previous.data)
    }

    /// Keys of the flat view, in original order.
    pub fn named_keys(&self) -> Vec<String> {
        self.collect_keys(self.framework.flat_view_includes_buffers())
            .into_iter()
            .map(|collected| collected.key)
            .collect()
    }

    /// The flat named-tensor view.
    pub fn collect_named_tensors(&self) -> TensorCollection {
        self.collect(self.framework.flat_view_includes_buffers())
    }

    /// Every field, buffers included, in original order.
    pub fn to_collection(&self) -> TensorCollection {
        self.collect(true)
    }

    /// Fields of one kind, in original order.
    pub fn collect_kind(&self, kind: FieldKind) -> TensorCollection {
        self.collect_keys(true)
            .into_iter()
            .filter(|collected| collected.kind == kind)
            .filter_map(|collected| {
                let data = self.tensor(&collected.key)?.clone();
                Some((collected.key, data))
            })
            .collect()
    }

    /// Number of fields, buffers included.
    pub fn len(&self) -> usize {
        self.collect_keys(true).len()
    }

    /// Whether the network holds no field.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field stored under a flat key.
    pub fn field(&self, key: &str) -> Option<&Field> {
        let mut path = self.framework.split_key(key);
        let name = path.pop()?;
        self.resolve(&path).ok()?.field(&name)
    }

    /// Tensor stored under a flat key.
    pub fn tensor(&self, key: &str) -> Option<&TensorData> {
        self.field(key).map(|field| &field.data)
    }

    /// Tensor stored under a flat key, or [`ConvertError::MissingTensor`].
    pub fn require(&self, key: &str) -> Result<&TensorData, ConvertError> {
        self.tensor(key).ok_or_else(|| ConvertError::MissingTensor {
            key: key.to_string(),
            framework: self.framework,
        })
    }

    /// Replace the value of an existing field addressed by a flat key.
    pub fn assign(&mut self, key: &str, data: TensorData) -> Result<TensorData, ConvertError> {
        let mut path = self.framework.split_key(key);
        let name = path.pop().unwrap_or_default();
        self.assign_at(&path, &name, data)
            .map_err(|_| ConvertError::MissingTensor {
                key: key.to_string(),
                framework: self.framework,
            })
    }

    /// Replace the value of field `name` of the module at `path`.
    pub fn assign_at<S: AsRef<str>>(
        &mut self,
        path: &[S],
        name: &str,
        data: TensorData,
    ) -> Result<TensorData, ConvertError> {
        let node = self.resolve_mut(path)?;
        match node.field_mut(name) {
            Some(field) => Ok(core::mem::replace(&mut field.data, data)),
            None => Err(ConvertError::MissingField {
                path: display_path(path),
                field: name.to_string(),
            }),
        }
    }

    /// Walk the module tree along `path`.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Result<&ModuleNode, ConvertError> {
        let mut node = &self.root;
        for token in path {
            node = node
                .child(token.as_ref())
                .ok_or_else(|| ConvertError::UnresolvedPath {
                    path: display_path(path),
                })?;
        }
        Ok(node)
    }

    /// Walk the module tree along `path`, mutably.
    pub fn resolve_mut<S: AsRef<str>>(
        &mut self,
        path: &[S],
    ) -> Result<&mut ModuleNode, ConvertError> {
        let mut node = &mut self.root;
        for token in path {
            node = node
                .child_mut(token.as_ref())
                .ok_or_else(|| ConvertError::UnresolvedPath {
                    path: display_path(path),
                })?;
        }
        Ok(node)
    }

    fn collect_keys(&self, include_buffers: bool) -> Vec<CollectedKey> {
        let mut collector = Collector::new(self.framework, include_buffers);
        self.root.visit(&mut collector);
        collector.into_sorted()
    }

    fn collect(&self, include_buffers: bool) -> TensorCollection {
        self.collect_keys(include_buffers)
            .into_iter()
            .filter_map(|collected| {
                let data = self.tensor(&collected.key)?.clone();
                Some((collected.key, data))
            })
            .collect()
    }
}

pub(crate) fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|token| token.as_ref())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: &[usize]) -> TensorData {
        TensorData::zeros(shape.to_vec(), crate::DType::F32)
    }

    #[test]
    fn flat_view_keeps_insertion_order() {
        let collection: TensorCollection = [
            ("features.10.weight", tensor(&[2])),
            ("features.2.weight", tensor(&[2])),
            ("features.10.bias", tensor(&[2])),
        ]
        .into_iter()
        .collect();

        let network = Network::from_collection(Framework::Gluon, "net", collection);

        assert_eq!(
            network.named_keys(),
            vec!["features.10.weight", "features.2.weight", "features.10.bias"]
        );
    }

    #[test]
    fn pytorch_view_includes_buffers() {
        let mut network = Network::new(Framework::PyTorch, "net");
        network.insert("bn.weight", tensor(&[4]));
        network.insert("bn.running_mean", tensor(&[4]));

        assert_eq!(network.named_keys(), vec!["bn.weight", "bn.running_mean"]);
    }

    #[test]
    fn chainer_view_hides_persistent_values() {
        let mut network = Network::new(Framework::Chainer, "net");
        network.insert("/features/bn/gamma", tensor(&[4]));
        network.insert("/features/bn/avg_mean", tensor(&[4]));

        assert_eq!(network.named_keys(), vec!["/features/bn/gamma"]);
        assert_eq!(network.to_collection().len(), 2);

        let bn = network.resolve(&["features", "bn"]).unwrap();
        assert_eq!(bn.field("avg_mean").unwrap().kind, FieldKind::Buffer);
    }

    #[test]
    fn assign_replaces_existing_field() {
        let mut network = Network::new(Framework::Chainer, "net");
        network.insert("/output/fc/W", tensor(&[2, 2]));

        let previous = network
            .assign("/output/fc/W", TensorData::new(vec![1.0f32; 4], [2, 2]))
            .unwrap();

        assert_eq!(previous, tensor(&[2, 2]));
        assert_eq!(
            network.tensor("/output/fc/W").unwrap().to_vec::<f32>().unwrap(),
            vec![1.0; 4]
        );
    }

    #[test]
    fn assign_rejects_unknown_key() {
        let mut network = Network::new(Framework::Gluon, "net");
        network.insert("output.weight", tensor(&[2]));

        let err = network.assign("output.bias", tensor(&[2])).unwrap_err();

        assert!(matches!(err, ConvertError::MissingTensor { key, .. } if key == "output.bias"));
    }

    #[test]
    fn resolve_reports_the_failing_path() {
        let network = Network::new(Framework::Chainer, "net");

        let err = network.resolve(&["features", "stage1"]).unwrap_err();

        assert!(matches!(err, ConvertError::UnresolvedPath { path } if path == "features/stage1"));
    }

    #[test]
    fn reinsert_keeps_position() {
        let mut network = Network::new(Framework::Gluon, "net");
        network.insert("a.weight", tensor(&[1]));
        network.insert("b.weight", tensor(&[1]));
        network.insert("a.weight", tensor(&[3]));

        assert_eq!(network.named_keys(), vec!["a.weight", "b.weight"]);
        assert_eq!(network.tensor("a.weight").unwrap().shape, vec![3]);
    }
}
